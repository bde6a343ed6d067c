//! Version listing and inspection commands.

use super::{format_bytes, OutputFormat};
use crate::config::Config;
use crate::manifest::Version;
use crate::repository::Repository;
use crate::Result;
use clap::Args;

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the show command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Version to show
    pub version_id: u64,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Run the list command
pub fn list(args: ListArgs, config: &Config) -> Result<()> {
    let repo = Repository::open(config)?;
    let versions = repo.manifest().list()?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&versions)?),
        OutputFormat::Table => {
            if versions.is_empty() {
                println!("No versions found in {}", repo.root().display());
            } else {
                println!("{:>6}  {:>6}  {:>10}  {:>7}  {:<20}  SOURCE", "ID", "PARENT", "SIZE", "BLOCKS", "CREATED");
                for version in &versions {
                    println!(
                        "{:>6}  {:>6}  {:>10}  {:>7}  {:<20}  {}",
                        version.id,
                        version
                            .parent_id
                            .map(|p| p.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        format_bytes(version.total_size),
                        version.blocks.len(),
                        version.created_at.format("%Y-%m-%d %H:%M:%S"),
                        version.source_path.display()
                    );
                }
            }
        }
    }

    Ok(())
}

/// Run the show command
pub fn show(args: ShowArgs, config: &Config) -> Result<()> {
    let repo = Repository::open(config)?;
    let version = repo.manifest().lookup(args.version_id)?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&version)?),
        OutputFormat::Table => print_version(&version),
    }

    Ok(())
}

fn print_version(version: &Version) {
    println!("Version {}", version.id);
    println!("  Source: {}", version.source_path.display());
    match version.parent_id {
        Some(parent) => println!("  Parent: {}", parent),
        None => println!("  Parent: none"),
    }
    println!("  Created: {}", version.created_at.to_rfc3339());
    println!("  Size: {} ({} bytes)", format_bytes(version.total_size), version.total_size);
    println!("  Chunk size: {}", format_bytes(version.chunk_size as u64));
    println!("  Blocks: {} ({} unique)", version.blocks.len(), version.unique_blocks().len());
    println!("  File hash: {}", version.file_hash);
    println!("  Merkle root: {}", version.merkle_root);
}
