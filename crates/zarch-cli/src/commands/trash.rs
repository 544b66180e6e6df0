//! `zarch trash`.

use chrono::Utc;
use clap::Subcommand;

use crate::config::Config;
use crate::manager::{purge_due, Manager};

#[derive(Debug, Subcommand)]
pub enum TrashCommand {
    /// List deleted archives and when they become purgeable
    List,
    /// Permanently remove deleted archives past retention
    Purge {
        /// Purge every deleted archive regardless of retention
        #[arg(long)]
        all: bool,
        /// Show what would be purged without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn run(cmd: TrashCommand, manager: &Manager, config: &Config) -> anyhow::Result<()> {
    let retention = config.storage.retention_days;
    match cmd {
        TrashCommand::List => {
            let trashed = manager.trashed()?;
            println!("Deleted archives ({})", trashed.len());
            let now = Utc::now();
            for archive in &trashed {
                let deleted = archive
                    .deleted_at
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let purge = match purge_due(archive, retention) {
                    Some(due) if due <= now => format!("{} (due)", due.format("%Y-%m-%d")),
                    Some(due) => format!(
                        "{} ({}d)",
                        due.format("%Y-%m-%d"),
                        (due - now).num_days()
                    ),
                    None => "never".to_string(),
                };
                println!("- {} ({})", archive.name, archive.short_uid());
                println!("  deleted: {deleted} | purge: {purge}");
            }
            Ok(())
        }
        TrashCommand::Purge { all, dry_run } => {
            let eligible = manager.purge_candidates(retention, all)?;
            if eligible.is_empty() {
                println!("Nothing to purge.");
                return Ok(());
            }
            if dry_run {
                println!("Would purge {} archives:", eligible.len());
                for archive in &eligible {
                    println!("- {} ({})", archive.name, archive.short_uid());
                }
                return Ok(());
            }
            let purged = manager.purge(&eligible)?;
            println!("Purged {purged} archives.");
            Ok(())
        }
    }
}
