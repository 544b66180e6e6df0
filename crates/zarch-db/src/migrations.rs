//! Schema migrations.
//!
//! Migrations are forward-only and identified by stable string ids. Applied
//! ids are recorded in `schema_migrations`. Every migration's DDL is
//! idempotent, so re-running one whose effects already exist is a no-op.
//!
//! Registries created before migration tracking existed are adopted by
//! [`MigrationRunner::reconcile_baseline`], which infers from the live schema
//! which of the first two migrations are already in place.
//! Any later change to pre-tracking columns must be a new catalog entry, not
//! an edit to that heuristic.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use tracing::{debug, info, warn};

use crate::schema::{self, ensure_column};
use crate::{Result, StoreError};

pub const BASELINE_ID: &str = "0001_baseline";
pub const IDENTITY_ID: &str = "0002_identity_and_status";
pub const TRASH_ID: &str = "0003_trash_fields";
pub const QUERY_ID: &str = "0004_query_system";
pub const SEARCH_ID: &str = "0005_search_index";

/// One catalog entry.
#[derive(Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

impl Migration {
    pub const fn new(
        id: &'static str,
        name: &'static str,
        description: &'static str,
        apply: fn(&Connection) -> rusqlite::Result<()>,
    ) -> Self {
        Self {
            id,
            name,
            description,
            apply,
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Every migration zarch knows, in application order.
pub static CATALOG: [Migration; 5] = [
    Migration::new(
        BASELINE_ID,
        "Baseline schema",
        "Creates the archives table and its lookup indexes",
        create_baseline,
    ),
    Migration::new(
        IDENTITY_ID,
        "Add uid/managed/status/last_seen and indexes",
        "Adds stable archive identity and lifecycle status",
        add_identity,
    ),
    Migration::new(
        TRASH_ID,
        "Add deleted_at and original_path for trash support",
        "Adds deleted_at and original_path columns for trash functionality",
        add_trash_fields,
    ),
    Migration::new(
        QUERY_ID,
        "Add queries table for saved query support",
        "Adds queries table for saved query functionality",
        create_queries_table,
    ),
    Migration::new(
        SEARCH_ID,
        "Add search_index table for full-text search support",
        "Adds search_index table for full-text search functionality",
        create_search_index,
    ),
];

fn create_baseline(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(schema::BASELINE)
}

fn add_identity(conn: &Connection) -> rusqlite::Result<()> {
    for (column, decl) in schema::IDENTITY_COLUMNS {
        ensure_column(conn, "archives", column, decl)?;
    }
    conn.execute_batch(schema::IDENTITY_INDEXES)
}

fn add_trash_fields(conn: &Connection) -> rusqlite::Result<()> {
    for (column, decl) in schema::TRASH_COLUMNS {
        ensure_column(conn, "archives", column, decl)?;
    }
    Ok(())
}

fn create_queries_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(schema::QUERIES_TABLE)
}

fn create_search_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(schema::SEARCH_INDEX_TABLE)
}

/// A row of `schema_migrations`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedMigration {
    pub id: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of [`MigrationRunner::apply_pending`].
#[derive(Clone, Debug, Default)]
pub struct MigrationReport {
    /// Ids applied by this run, in order.
    pub applied: Vec<&'static str>,
    /// Safety copy taken before the first migration ran.
    pub backup: Option<PathBuf>,
}

/// Applied and pending migrations at a point in time.
#[derive(Debug)]
pub struct MigrationStatus<'c> {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<&'c Migration>,
}

impl MigrationStatus<'_> {
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Applies catalog migrations to one connection.
///
/// Not re-entrant: nothing else may use the store while
/// [`apply_pending`](Self::apply_pending) runs, and two runners must never
/// migrate the same file at once.
pub struct MigrationRunner<'c> {
    conn: &'c Connection,
    catalog: &'c [Migration],
}

impl<'c> MigrationRunner<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self::with_catalog(conn, &CATALOG)
    }

    pub fn with_catalog(conn: &'c Connection, catalog: &'c [Migration]) -> Self {
        Self { conn, catalog }
    }

    pub fn catalog(&self) -> &'c [Migration] {
        self.catalog
    }

    /// Create `schema_migrations` if missing.
    pub fn ensure_migrations_table(&self) -> Result<()> {
        self.conn.execute_batch(schema::MIGRATIONS_TABLE)?;
        Ok(())
    }

    pub fn is_applied(&self, id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record `id` as applied now. Recording an id twice updates the row.
    pub fn mark_applied(&self, id: &str, name: &str) -> Result<()> {
        let now = Utc::now();
        let inserted = self.conn.execute(
            "INSERT INTO schema_migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, now],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                self.conn.execute(
                    "UPDATE schema_migrations SET name = ?2, applied_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, name, now],
                )?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark pre-tracking migrations as applied when the live schema already
    /// contains their effects. Their DDL is not executed.
    ///
    /// Returns the ids newly marked.
    pub fn reconcile_baseline(&self) -> Result<Vec<&'static str>> {
        self.ensure_migrations_table()?;
        let mut marked = Vec::new();

        if !schema::table_exists(self.conn, "archives")? {
            return Ok(marked);
        }
        if !self.is_applied(BASELINE_ID)? {
            self.mark_applied(BASELINE_ID, CATALOG[0].name)?;
            marked.push(BASELINE_ID);
        }

        let mut has_identity = true;
        for (column, _) in schema::IDENTITY_COLUMNS {
            has_identity &= schema::column_exists(self.conn, "archives", column)?;
        }
        if has_identity && !self.is_applied(IDENTITY_ID)? {
            self.mark_applied(IDENTITY_ID, CATALOG[1].name)?;
            marked.push(IDENTITY_ID);
        }

        if !marked.is_empty() {
            info!(?marked, "Adopted pre-existing registry schema");
        }
        Ok(marked)
    }

    /// Catalog entries not yet recorded, in catalog order.
    pub fn pending_migrations(&self) -> Result<Vec<&'c Migration>> {
        self.ensure_migrations_table()?;
        let mut pending = Vec::new();
        for migration in self.catalog {
            if !self.is_applied(migration.id)? {
                pending.push(migration);
            }
        }
        Ok(pending)
    }

    /// Recorded migrations, ordered by id.
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        self.ensure_migrations_table()?;
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, applied_at FROM schema_migrations ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn status(&self) -> Result<MigrationStatus<'c>> {
        Ok(MigrationStatus {
            applied: self.applied_migrations()?,
            pending: self.pending_migrations()?,
        })
    }

    /// Copy the store file at `db_path` to a timestamped sibling.
    ///
    /// The WAL is checkpointed first so the copy holds every committed row.
    /// Existing backups are never overwritten or removed.
    pub fn create_backup(&self, db_path: &Path) -> Result<PathBuf> {
        let failure = |source: io::Error| StoreError::BackupFailure {
            path: db_path.to_path_buf(),
            source,
        };

        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|e| failure(io::Error::other(e)))?;

        let mut source = File::open(db_path).map_err(failure)?;
        let (backup_path, mut target) = create_backup_file(db_path).map_err(failure)?;
        let copied = io::copy(&mut source, &mut target).and_then(|_| target.sync_all());
        if let Err(e) = copied {
            drop(target);
            if let Err(cleanup) = fs::remove_file(&backup_path) {
                warn!(error = %cleanup, backup = %backup_path.display(), "Could not remove partial backup");
            }
            return Err(failure(e));
        }

        info!(backup = %backup_path.display(), "Registry backup created");
        Ok(backup_path)
    }

    /// Back up `db_path`, then apply every pending migration in order.
    ///
    /// Nothing is touched when the backup fails. Each migration commits on
    /// its own together with its `schema_migrations` row; the run stops at the
    /// first failure and earlier migrations stay applied.
    pub fn apply_pending(&self, db_path: &Path) -> Result<MigrationReport> {
        let pending = self.pending_migrations()?;
        if pending.is_empty() {
            return Ok(MigrationReport::default());
        }
        let backup = self.create_backup(db_path)?;
        let mut report = self.apply_all(&pending)?;
        report.backup = Some(backup);
        Ok(report)
    }

    /// Apply pending migrations without a safety copy. Only for stores that
    /// have no file behind them.
    pub(crate) fn apply_pending_unbacked(&self) -> Result<MigrationReport> {
        let pending = self.pending_migrations()?;
        self.apply_all(&pending)
    }

    fn apply_all(&self, pending: &[&Migration]) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for migration in pending {
            self.apply_one(migration)?;
            report.applied.push(migration.id);
        }
        Ok(report)
    }

    fn apply_one(&self, migration: &Migration) -> Result<()> {
        let failure = |source: rusqlite::Error| StoreError::MigrationFailure {
            id: migration.id.to_string(),
            source,
        };

        info!(id = migration.id, "Running migration: {}", migration.name);
        let tx = self.conn.unchecked_transaction().map_err(failure)?;
        (migration.apply)(&tx).map_err(failure)?;
        match self.mark_applied(migration.id, migration.name) {
            Ok(()) => {}
            Err(StoreError::Sqlite(e)) => return Err(failure(e)),
            Err(other) => return Err(other),
        }
        tx.commit().map_err(failure)?;
        debug!(id = migration.id, "Migration committed");
        Ok(())
    }
}

/// Open a new, never-before-existing backup file next to `db_path`.
fn create_backup_file(db_path: &Path) -> io::Result<(PathBuf, File)> {
    let dir = db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;

    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry".to_string());
    let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");

    let mut attempt = 0u32;
    loop {
        let file_name = if attempt == 0 {
            format!("{stem}-{stamp}.bak")
        } else {
            format!("{stem}-{stamp}-{attempt}.bak")
        };
        let path = dir.join(file_name);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        match options.open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && attempt < 100 => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArchiveStore;

    fn bare() -> Connection {
        Connection::open_in_memory().expect("open")
    }

    #[test]
    fn test_fresh_migration() {
        let conn = bare();
        let runner = MigrationRunner::new(&conn);
        let report = runner.apply_pending_unbacked().expect("migrate");
        assert_eq!(
            report.applied,
            vec![BASELINE_ID, IDENTITY_ID, TRASH_ID, QUERY_ID, SEARCH_ID]
        );
        assert!(runner.pending_migrations().expect("pending").is_empty());
        schema::validate_archive_columns(&conn).expect("schema complete");
    }

    #[test]
    fn test_idempotent_migration() {
        let conn = bare();
        let runner = MigrationRunner::new(&conn);
        runner.apply_pending_unbacked().expect("first run");
        let second = runner.apply_pending_unbacked().expect("second run should be no-op");
        assert!(second.applied.is_empty());
        assert_eq!(runner.applied_migrations().expect("applied").len(), CATALOG.len());
    }

    #[test]
    fn test_status_splits_applied_and_pending() {
        let conn = bare();
        conn.execute_batch(schema::BASELINE).expect("legacy table");
        let runner = MigrationRunner::new(&conn);
        runner.reconcile_baseline().expect("reconcile");

        let status = runner.status().expect("status");
        assert!(!status.is_current());
        assert_eq!(status.applied.len(), 1);
        assert_eq!(status.applied[0].id, BASELINE_ID);
        assert_eq!(status.pending.len(), CATALOG.len() - 1);
    }

    #[test]
    fn test_mark_applied_upserts() {
        let conn = bare();
        let runner = MigrationRunner::new(&conn);
        runner.ensure_migrations_table().expect("table");
        runner.mark_applied("0009_example", "first").expect("insert");
        runner.mark_applied("0009_example", "second").expect("update");

        let applied = runner.applied_migrations().expect("applied");
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].name, "second");
        assert!(runner.is_applied("0009_example").expect("check"));
        assert!(!runner.is_applied("0010_other").expect("check"));
    }

    #[test]
    fn test_reconcile_empty_database_marks_nothing() {
        let conn = bare();
        let runner = MigrationRunner::new(&conn);
        assert!(runner.reconcile_baseline().expect("reconcile").is_empty());
        assert_eq!(runner.pending_migrations().expect("pending").len(), CATALOG.len());
    }

    #[test]
    fn test_reconcile_legacy_baseline_only() {
        let conn = bare();
        conn.execute_batch(schema::BASELINE).expect("legacy table");
        let runner = MigrationRunner::new(&conn);

        assert_eq!(runner.reconcile_baseline().expect("reconcile"), vec![BASELINE_ID]);
        let pending: Vec<_> = runner
            .pending_migrations()
            .expect("pending")
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(pending, vec![IDENTITY_ID, TRASH_ID, QUERY_ID, SEARCH_ID]);
    }

    #[test]
    fn test_reconcile_does_not_run_ddl() {
        let conn = bare();
        conn.execute_batch(schema::BASELINE).expect("legacy table");
        for (column, decl) in schema::IDENTITY_COLUMNS {
            ensure_column(&conn, "archives", column, decl).expect("column");
        }
        let runner = MigrationRunner::new(&conn);

        let marked = runner.reconcile_baseline().expect("reconcile");
        assert_eq!(marked, vec![BASELINE_ID, IDENTITY_ID]);
        // Identity indexes are 0002 DDL; adoption must not have created them.
        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_archives_uid'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(index_count, 0);
        // Second pass finds nothing new.
        assert!(runner.reconcile_baseline().expect("reconcile").is_empty());
    }

    #[test]
    fn test_failure_stops_run_and_keeps_earlier_migrations() {
        fn create_first(conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch("CREATE TABLE IF NOT EXISTS first (id INTEGER)")
        }
        fn broken(conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch("CREATE TABLE half (id INTEGER); THIS IS NOT SQL")
        }
        fn create_never(conn: &Connection) -> rusqlite::Result<()> {
            conn.execute_batch("CREATE TABLE never (id INTEGER)")
        }
        let catalog = [
            Migration::new("0001_ok", "ok", "", create_first),
            Migration::new("0002_broken", "broken", "", broken),
            Migration::new("0003_never", "never", "", create_never),
        ];
        let conn = bare();
        let runner = MigrationRunner::with_catalog(&conn, &catalog);

        let err = runner.apply_pending_unbacked().expect_err("second migration fails");
        assert!(matches!(err, StoreError::MigrationFailure { ref id, .. } if id == "0002_broken"));

        assert!(runner.is_applied("0001_ok").expect("check"));
        assert!(!runner.is_applied("0002_broken").expect("check"));
        assert!(schema::table_exists(&conn, "first").expect("check"));
        assert!(!schema::table_exists(&conn, "half").expect("rolled back"));
        assert!(!schema::table_exists(&conn, "never").expect("not reached"));
    }

    #[test]
    fn test_backup_failure_blocks_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conn = bare();
        let runner = MigrationRunner::new(&conn);
        let missing = dir.path().join("does-not-exist.db");

        let err = runner.apply_pending(&missing).expect_err("no file to back up");
        assert!(matches!(err, StoreError::BackupFailure { .. }));
        // Bookkeeping table exists but nothing was applied.
        assert_eq!(runner.pending_migrations().expect("pending").len(), CATALOG.len());
        assert!(!schema::table_exists(&conn, "archives").expect("check"));
    }

    #[test]
    fn test_failed_copy_leaves_no_backup_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Opening a directory succeeds on unix but reading it does not.
        let unreadable = dir.path().join("registry.db");
        fs::create_dir(&unreadable).expect("dir");
        let conn = bare();
        let runner = MigrationRunner::new(&conn);

        let err = runner.create_backup(&unreadable).expect_err("copy fails");
        assert!(matches!(err, StoreError::BackupFailure { .. }));
        let leftovers = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "bak"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_backup_is_a_sibling_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("registry.db");
        let store = ArchiveStore::open(&db_path).expect("open");
        let runner = store.migrations();

        let first = runner.create_backup(&db_path).expect("backup");
        let second = runner.create_backup(&db_path).expect("backup");
        assert_ne!(first, second, "backups never overwrite each other");
        assert_eq!(first.parent(), db_path.parent());
        assert!(first
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("registry-") && n.ends_with(".bak")));
    }
}
