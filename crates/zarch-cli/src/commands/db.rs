//! `zarch db`: registry schema and backups.
//!
//! These commands open the registry without migrating it, so `status` can
//! report on an outdated file and `migrate --dry-run` changes nothing.

use clap::Subcommand;

use crate::config::Config;
use crate::manager::Manager;

#[derive(Debug, Subcommand)]
pub enum DbCommand {
    /// Show applied and pending migrations
    Status,
    /// Apply pending migrations (a backup is taken first)
    Migrate {
        /// List pending migrations without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Copy the registry to a timestamped backup file
    Backup,
}

pub fn run(cmd: DbCommand, config: &Config) -> anyhow::Result<()> {
    let base = config.managed_path()?;
    let db_path = config.registry_path()?;
    let store = Manager::open_registry_for_maintenance(&base)?;
    let runner = store.migrations();

    match cmd {
        DbCommand::Status => {
            let status = runner.status()?;
            println!("Registry: {}", db_path.display());
            if let Ok(count) = store.count() {
                println!("Archives: {count}");
            }
            println!("\nApplied ({}):", status.applied.len());
            for applied in &status.applied {
                println!(
                    "  {}  {}  {}",
                    applied.id,
                    applied.applied_at.format("%Y-%m-%d %H:%M:%S"),
                    applied.name
                );
            }
            if status.is_current() {
                println!("\nSchema is up to date.");
            } else {
                println!("\nPending ({}):", status.pending.len());
                for migration in &status.pending {
                    println!("  {}  {}", migration.id, migration.name);
                }
                println!("\nRun `zarch db migrate` to apply.");
            }
        }
        DbCommand::Migrate { dry_run } => {
            let pending = runner.pending_migrations()?;
            if pending.is_empty() {
                println!("No pending migrations.");
            } else if dry_run {
                println!("Would apply {} migrations:", pending.len());
                for migration in &pending {
                    println!("  {}  {}", migration.id, migration.description);
                }
            } else {
                let report = runner.apply_pending(&db_path)?;
                if let Some(backup) = &report.backup {
                    println!("Backup: {}", backup.display());
                }
                for id in &report.applied {
                    println!("Applied {id}");
                }
            }
        }
        DbCommand::Backup => {
            let backup = runner.create_backup(&db_path)?;
            println!("Backup written to {}", backup.display());
        }
    }
    Ok(())
}
