//! zarch: keeps track of archive files.
//!
//! Archives live either in managed storage (`~/.zarch/archives`, moved there
//! on `add`) or anywhere else on disk. Either way every archive gets a row in
//! the registry with a stable UID, and commands accept a row id, UID, UID
//! prefix, checksum prefix or name wherever they need an archive.

mod commands;
mod config;
mod display;
mod manager;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use zarch_db::StoreError;

use crate::commands::Command;
use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "zarch", author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: $ZARCH_HOME/config.toml or ~/.zarch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log.level);
    debug!(?config, "Configuration loaded");

    match commands::run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr. `RUST_LOG` overrides the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::Ambiguous { input, candidates }) => {
            eprintln!("{}", display::ambiguous(input, candidates));
        }
        Some(StoreError::NotFound { input }) => {
            eprintln!("Error: no archive matches '{input}'");
            eprintln!("Try `zarch list` to see registered archives.");
        }
        Some(StoreError::StoreUnavailable { .. } | StoreError::Schema(_)) => {
            eprintln!("Error: {err:#}");
            eprintln!("Check the registry with `zarch db status`.");
        }
        _ => eprintln!("Error: {err:#}"),
    }
}
