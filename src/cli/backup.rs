//! Backup command implementation.

use super::format_bytes;
use crate::backup::{BackupEngine, Verification};
use crate::config::Config;
use crate::hash::hash_reader;
use crate::repository::Repository;
use crate::{Error, Result};
use clap::Args;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Arguments for the backup command
#[derive(Args, Debug)]
pub struct BackupArgs {
    /// File to back up
    pub file: PathBuf,
}

/// Run the backup command
pub fn run(args: BackupArgs, config: &Config) -> Result<()> {
    println!("Processing file: {}", args.file.display());

    let repo = Repository::open(config)?;
    let engine = BackupEngine::new(&repo, config)?;
    let report = engine.run(&args.file)?;

    println!("Version ID: {}", report.version.id);
    println!(
        "  Blocks: {} ({} new, {} reused)",
        report.version.blocks.len(),
        report.new_blocks,
        report.reused_blocks
    );
    println!(
        "  Size: {} ({} newly stored)",
        format_bytes(report.bytes),
        format_bytes(report.stored_bytes)
    );

    let outcome = match report.verification {
        Verification::Skipped => {
            println!("Verification skipped");
            Ok(())
        }
        Verification::Passed(restore) => {
            println!("Restored to: {}", restore.output.display());
            compare_hashes(&args.file, &restore.output)
        }
        Verification::Failed { output, error } => {
            println!("Restore to {} failed", output.display());
            Err(error)
        }
    };

    repo.close()?;
    outcome
}

/// Independently re-hash the source and the restored copy. A copy that does
/// not match is removed.
fn compare_hashes(original: &Path, restored: &Path) -> Result<()> {
    let original_hash = hash_file(original)?;
    let restored_hash = hash_file(restored)?;

    println!("Original Hash: {}", original_hash);
    println!("Restored Hash: {}", restored_hash);

    if original_hash != restored_hash {
        fs::remove_file(restored)
            .map_err(|e| Error::storage(format!("removing {}", restored.display()), e))?;
        return Err(Error::Integrity {
            reason: format!(
                "{} does not match {}",
                restored.display(),
                original.display()
            ),
        });
    }
    Ok(())
}

fn hash_file(path: &Path) -> Result<crate::Fingerprint> {
    let file = File::open(path)
        .map_err(|e| Error::storage(format!("opening {}", path.display()), e))?;
    hash_reader(file).map_err(|e| Error::storage(format!("reading {}", path.display()), e))
}
