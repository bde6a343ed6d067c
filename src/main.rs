//! deltavault - deduplicating file backup
//!
//! Main binary entry point for the command-line interface.

use anyhow::Context;
use clap::{CommandFactory, Parser};
use deltavault::cli::{self, Cli, Commands};
use deltavault::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbosity(), cli.log_format()) {
        eprintln!("Error: {}", err);
        return ExitCode::from(err.kind().exit_code());
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .chain()
                .find_map(|e| e.downcast_ref::<deltavault::Error>())
                .map(|e| e.kind().exit_code())
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config().context("invalid configuration")?;

    match cli.command {
        Some(Commands::Backup(args)) => {
            let file = args.file.clone();
            cli::backup::run(args, &config)
                .with_context(|| format!("backup of {} failed", file.display()))
        }
        Some(Commands::Restore(args)) => {
            let version_id = args.version_id;
            cli::restore::run(args, &config)
                .with_context(|| format!("restore of version {} failed", version_id))
        }
        Some(Commands::List(args)) => cli::versions::list(args, &config).context("list failed"),
        Some(Commands::Show(args)) => cli::versions::show(args, &config).context("show failed"),
        Some(Commands::Scrub(args)) => cli::scrub::run(args, &config).context("scrub failed"),
        None => match cli.file {
            Some(file) => {
                let args = cli::backup::BackupArgs { file: file.clone() };
                cli::backup::run(args, &config)
                    .with_context(|| format!("backup of {} failed", file.display()))
            }
            None => {
                Cli::command().print_help()?;
                Err(deltavault::Error::Configuration {
                    reason: "no file or command given".to_string(),
                }
                .into())
            }
        },
    }
}
