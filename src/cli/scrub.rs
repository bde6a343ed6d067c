//! Scrub command implementation.

use super::{format_bytes, OutputFormat};
use crate::config::Config;
use crate::repository::Repository;
use crate::scrub::{ScrubReport, Scrubber};
use crate::{Error, Result};
use clap::Args;

/// Arguments for the scrub command
#[derive(Args, Debug)]
pub struct ScrubArgs {
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Run the scrub command; an unclean store is reported as an integrity error
pub fn run(args: ScrubArgs, config: &Config) -> Result<()> {
    let repo = Repository::open(config)?;
    let report = Scrubber::new(&repo).run()?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_summary(&report),
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(Error::Integrity {
            reason: format!(
                "{} corrupted blocks, {} damaged versions, {} unreadable records",
                report.corrupted_blocks.len(),
                report.damaged_versions.len(),
                report.invalid_versions.len()
            ),
        })
    }
}

fn print_summary(report: &ScrubReport) {
    println!("Scrub report ({})", report.generated_at.to_rfc3339());
    println!(
        "  Blocks checked: {} ({}, {} on disk)",
        report.blocks_checked,
        format_bytes(report.bytes_checked),
        format_bytes(report.stored_bytes_checked)
    );
    println!("  Versions checked: {}", report.versions_checked);
    println!("  Orphan blocks: {}", report.orphan_blocks.len());

    for fp in &report.corrupted_blocks {
        println!("  CORRUPTED block {}", fp);
    }
    for invalid in &report.invalid_versions {
        println!("  UNREADABLE version {}: {}", invalid.id, invalid.reason);
    }
    for damaged in &report.damaged_versions {
        println!(
            "  DAMAGED version {}: {} missing, {} corrupted blocks",
            damaged.id,
            damaged.missing.len(),
            damaged.corrupted.len()
        );
    }

    if report.is_clean() {
        println!("Store is clean");
    }
}
