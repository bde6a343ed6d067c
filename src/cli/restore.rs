//! Restore command implementation.

use super::format_bytes;
use crate::config::Config;
use crate::repository::Repository;
use crate::restore::RestoreEngine;
use crate::Result;
use clap::Args;
use std::path::PathBuf;

/// Arguments for the restore command
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Version to restore
    pub version_id: u64,

    /// Destination file, replaced only after the restore verifies
    pub output: PathBuf,
}

/// Run the restore command
pub fn run(args: RestoreArgs, config: &Config) -> Result<()> {
    let repo = Repository::open(config)?;
    let report = RestoreEngine::new(&repo).restore(args.version_id, &args.output)?;

    println!("Restored version {} to: {}", report.version_id, report.output.display());
    println!("  Blocks: {}", report.blocks);
    println!("  Size: {}", format_bytes(report.bytes));
    println!("  Duration: {} ms", report.duration_ms);

    repo.close()
}
