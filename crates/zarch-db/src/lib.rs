//! # zarch-db
//!
//! Registry of every archive file zarch knows about.
//! Backed by a single SQLite file, by default `~/.zarch/registry.db`.
//!
//! ## Layout
//!
//! - [`store::ArchiveStore`] owns the connection and all CRUD on `archives`
//! - [`migrations::MigrationRunner`] evolves the schema, backup first
//! - [`resolver::Resolver`] maps a user string to exactly one archive
//! - [`uid::UidGenerator`] hands out 26-char time-sortable identifiers
//!
//! All timestamps are stored as UTC text. The store file is owner-only.

pub mod archive;
pub mod migrations;
pub mod queries;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod uid;

use std::path::PathBuf;

use rusqlite::Connection;

pub use archive::{Archive, Status};
pub use migrations::{
    AppliedMigration, Migration, MigrationReport, MigrationRunner, MigrationStatus,
};
pub use queries::SavedQuery;
pub use resolver::Resolver;
pub use store::ArchiveStore;
pub use uid::UidGenerator;

/// Inputs shorter than this never reach the prefix stages of the resolver.
pub const DEFAULT_MIN_PREFIX_LENGTH: usize = 12;

/// Upper bound on rows a prefix scan returns.
pub const DEFAULT_MAX_CANDIDATES: usize = 50;

/// Registry error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("archive not found: {input}")]
    NotFound { input: String },

    #[error("'{input}' matches {} archives", .candidates.len())]
    Ambiguous {
        input: String,
        candidates: Vec<Archive>,
    },

    #[error("an archive with {field} '{value}' already exists")]
    Conflict { field: &'static str, value: String },

    #[error("store unavailable at {}: {reason}", .path.display())]
    StoreUnavailable { path: PathBuf, reason: String },

    #[error("migration {id} failed: {source}")]
    MigrationFailure {
        id: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("backup of {} failed: {source}", .path.display())]
    BackupFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn not_found(input: impl Into<String>) -> Self {
        StoreError::NotFound {
            input: input.into(),
        }
    }

    pub(crate) fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::StoreUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Configure SQLite pragmas.
///
/// WAL lets readers run alongside a writer; `busy_timeout` makes competing
/// writers wait instead of failing straight away.
fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
}
