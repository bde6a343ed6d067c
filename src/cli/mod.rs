//! Command-line interface for deltavault.
//!
//! `deltavault <FILE>` backs the file up, prints `Version ID: <id>` and
//! restores the new version to `<FILE>.restored` as a self-check. The
//! subcommands expose restore, listing and scrubbing of an existing store.

use crate::config::Config;
use crate::logging::{LogFormat, Verbosity};
use crate::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod backup;
pub mod restore;
pub mod scrub;
pub mod versions;

/// deltavault - deduplicating, content-addressed file backup
#[derive(Parser, Debug)]
#[command(name = "deltavault")]
#[command(about = "Deduplicating, content-addressed file backup with verified restore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// File to back up
    pub file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Storage root directory
    #[arg(long, short = 'r', global = true, env = "DELTAVAULT_ROOT")]
    pub root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, short = 'c', global = true, env = "DELTAVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Chunk size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// Worker threads for fingerprinting and storing chunks
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Skip the self-verification restore after a backup
    #[arg(long, global = true)]
    pub no_verify: bool,

    /// Only log warnings and errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log debug detail
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Log format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormatArg,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up a file (same as passing the file directly)
    Backup(backup::BackupArgs),
    /// Restore a committed version to a file
    Restore(restore::RestoreArgs),
    /// List committed versions
    List(versions::ListArgs),
    /// Show one version record
    Show(versions::ShowArgs),
    /// Re-hash every stored block and check every version
    Scrub(scrub::ScrubArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else if self.verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    pub fn log_format(&self) -> LogFormat {
        match self.log_format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }

    /// Configuration file (if any) with command-line overrides applied
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(root) = &self.root {
            config.storage_root = root.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.no_verify {
            config.verify_after_backup = false;
        }

        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bare_file_argument() {
        let cli = Cli::try_parse_from(["deltavault", "data/large_test_file.bin"]).unwrap();
        assert_eq!(cli.file, Some(PathBuf::from("data/large_test_file.bin")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_subcommand_with_global_flags() {
        let cli = Cli::try_parse_from([
            "deltavault",
            "restore",
            "3",
            "out.bin",
            "--root",
            "/tmp/vault",
            "--quiet",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Restore(ref args)) => {
                assert_eq!(args.version_id, 3);
                assert_eq!(args.output, PathBuf::from("out.bin"));
            }
            ref other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_overrides_applied_to_config() -> Result<()> {
        let cli = Cli::try_parse_from([
            "deltavault",
            "--root",
            "/srv/vault",
            "--chunk-size",
            "4096",
            "--workers",
            "2",
            "--no-verify",
            "file.bin",
        ])
        .unwrap();

        let config = cli.resolve_config()?;
        assert_eq!(config.storage_root, PathBuf::from("/srv/vault"));
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.workers, 2);
        assert!(!config.verify_after_backup);
        Ok(())
    }

    #[test]
    fn test_invalid_override_rejected() {
        let cli = Cli::try_parse_from(["deltavault", "--workers", "0", "file.bin"]).unwrap();
        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.0 MiB");
    }
}
