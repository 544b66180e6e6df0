//! Subcommands. Each module maps CLI arguments onto the registry and managed
//! storage, and owns its terminal output.

pub mod archive;
pub mod db;
pub mod query;
pub mod trash;

use std::time::Duration;

use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use zarch_db::{Archive, ArchiveStore, Resolver, Status};

use crate::config::Config;
use crate::manager::Manager;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register an archive file
    Add(archive::AddArgs),
    /// List registered archives
    List(archive::ListArgs),
    /// Show everything known about one archive
    Show {
        /// Row id, UID, UID prefix, checksum prefix or name
        id: String,
    },
    /// Print which archive an identifier refers to
    Resolve {
        id: String,
        /// Shortest input treated as a prefix
        #[arg(long)]
        min_prefix: Option<usize>,
    },
    /// Move an archive file and record its new location
    Move {
        id: String,
        /// Target file or directory
        dest: std::path::PathBuf,
    },
    /// Delete an archive (soft by default)
    Delete {
        id: String,
        /// Remove the file now instead of moving it to the trash
        #[arg(long)]
        force: bool,
    },
    /// Restore a soft-deleted archive
    Restore {
        id: String,
        /// Show where the archive would go without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Record that an archive has a remote copy
    UploadMark { id: String, destination: String },
    /// Inspect and purge deleted archives
    #[command(subcommand)]
    Trash(trash::TrashCommand),
    /// Registry maintenance
    #[command(subcommand)]
    Db(db::DbCommand),
    /// Manage saved list filters
    #[command(subcommand)]
    Query(query::QueryCommand),
}

pub fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Db(cmd) => db::run(cmd, config),
        other => {
            let manager = Manager::open(config.managed_path()?)?;
            let result = dispatch(other, &manager, config);
            manager.close()?;
            result
        }
    }
}

fn dispatch(command: Command, manager: &Manager, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Add(args) => archive::add(manager, config, args),
        Command::List(args) => archive::list(manager, args),
        Command::Show { id } => archive::show(manager, config, &id),
        Command::Resolve { id, min_prefix } => archive::resolve(manager, config, &id, min_prefix),
        Command::Move { id, dest } => archive::relocate(manager, config, &id, &dest),
        Command::Delete { id, force } => archive::delete(manager, config, &id, force),
        Command::Restore { id, dry_run } => archive::restore(manager, config, &id, dry_run),
        Command::UploadMark { id, destination } => {
            archive::upload_mark(manager, config, &id, &destination)
        }
        Command::Trash(cmd) => trash::run(cmd, manager, config),
        Command::Query(cmd) => query::run(cmd, manager),
        Command::Db(cmd) => db::run(cmd, config),
    }
}

/// Resolver configured from `[resolver]`.
pub fn resolver<'s>(store: &'s ArchiveStore, config: &Config) -> Resolver<'s> {
    Resolver::new(store)
        .with_min_prefix_length(config.resolver.min_prefix_length)
        .with_max_candidates(config.resolver.max_candidates)
}

/// List filters, shared by `list` flags and saved queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct ListFilter {
    /// Only archives without a remote copy
    #[arg(long)]
    pub not_uploaded: bool,
    /// Only archives created more than DAYS ago
    #[arg(long, value_name = "DAYS")]
    pub older_than: Option<u32>,
    /// Only archives whose name contains TEXT
    #[arg(long, value_name = "TEXT")]
    pub pattern: Option<String>,
    /// Only managed archives
    #[arg(long, conflicts_with = "external")]
    pub managed: bool,
    /// Only external archives
    #[arg(long)]
    pub external: bool,
    /// Only archives with this status (present|missing|deleted)
    #[arg(long)]
    pub status: Option<Status>,
    /// Only archives made with this profile
    #[arg(long)]
    pub profile: Option<String>,
    /// Only archives larger than BYTES
    #[arg(long, value_name = "BYTES")]
    pub larger_than: Option<u64>,
    /// Only deleted archives
    #[arg(long)]
    pub deleted: bool,
}

impl ListFilter {
    /// Fetch matching archives, newest first. Deleted archives are hidden
    /// unless asked for.
    pub fn apply(&self, store: &ArchiveStore) -> anyhow::Result<Vec<Archive>> {
        let base = match (self.not_uploaded, self.older_than) {
            (_, Some(days)) => {
                store.list_older_than(Duration::from_secs(u64::from(days) * 24 * 3600))?
            }
            (true, None) => store.list_not_uploaded()?,
            (false, None) => store.list()?,
        };
        Ok(base.into_iter().filter(|a| self.matches(a)).collect())
    }

    fn matches(&self, archive: &Archive) -> bool {
        let wants_deleted = self.deleted || self.status == Some(Status::Deleted);
        if archive.is_deleted() != wants_deleted {
            return false;
        }
        if self.not_uploaded && archive.uploaded {
            return false;
        }
        if self.status.is_some_and(|s| s != archive.status) {
            return false;
        }
        if (self.managed && !archive.managed) || (self.external && archive.managed) {
            return false;
        }
        if let Some(pattern) = &self.pattern {
            if !archive.name.contains(pattern.as_str()) {
                return false;
            }
        }
        if let Some(profile) = &self.profile {
            if archive.profile.as_deref() != Some(profile.as_str()) {
                return false;
            }
        }
        if self.larger_than.is_some_and(|min| archive.size <= min) {
            return false;
        }
        true
    }
}
