//! Durable CRUD over archive records.
//!
//! One [`ArchiveStore`] owns one SQLite connection. Callers that need to work
//! concurrently each open (or [`reopen`](ArchiveStore::reopen)) their own
//! store; SQLite serialises writers, waiting up to `busy_timeout` before
//! reporting the database as busy. Retrying after that is up to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::archive::Archive;
use crate::migrations::{MigrationReport, MigrationRunner};
use crate::schema::{self, select_archives};
use crate::uid::UidGenerator;
use crate::{configure, Result, StoreError, DEFAULT_MAX_CANDIDATES};

/// The archive registry.
#[derive(Debug)]
pub struct ArchiveStore {
    conn: Connection,
    path: Option<PathBuf>,
    uids: Arc<UidGenerator>,
}

impl ArchiveStore {
    /// Open or create the registry at `path` and bring its schema up to date.
    ///
    /// Parent directories are created as needed and the file is restricted to
    /// its owner. Pending migrations run after a backup of the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self::open_for_maintenance(path)?;
        let report = match store.path.as_deref() {
            Some(path) => store.migrations().apply_pending(path)?,
            None => MigrationReport::default(),
        };
        if !report.applied.is_empty() {
            info!(applied = ?report.applied, "Registry schema upgraded");
        }
        schema::validate_archive_columns(&store.conn)?;
        Ok(store)
    }

    /// Open the registry without applying pending migrations.
    ///
    /// Pre-tracking schemas are still reconciled so that
    /// [`MigrationRunner::pending_migrations`] reports accurately. Row
    /// operations on an outdated schema fail until it is migrated.
    pub fn open_for_maintenance(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        create_parent_dir(path)?;

        let conn = Connection::open(path).map_err(|e| StoreError::unavailable(path, e))?;
        // The first statement touches the file header; garbage fails here.
        configure(&conn).map_err(|e| StoreError::unavailable(path, e))?;
        restrict_permissions(path)?;

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
            uids: Arc::new(UidGenerator::new()),
        };
        store
            .migrations()
            .reconcile_baseline()
            .map_err(|e| match e {
                StoreError::Sqlite(inner) if is_unusable(&inner) => {
                    StoreError::unavailable(path, inner)
                }
                other => other,
            })?;
        debug!(path = %path.display(), "Registry opened");
        Ok(store)
    }

    /// A registry that lives only as long as this value. No backups are taken.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::unavailable(":memory:", e))?;
        configure(&conn)?;
        let store = Self {
            conn,
            path: None,
            uids: Arc::new(UidGenerator::new()),
        };
        store.migrations().apply_pending_unbacked()?;
        schema::validate_archive_columns(&store.conn)?;
        Ok(store)
    }

    /// A second, independent connection to the same file, sharing the UID
    /// generator. The schema is assumed current.
    pub fn reopen(&self) -> Result<Self> {
        let path = self.path.as_deref().ok_or_else(|| {
            StoreError::unavailable(":memory:", "in-memory stores cannot be reopened")
        })?;
        let conn = Connection::open(path).map_err(|e| StoreError::unavailable(path, e))?;
        configure(&conn).map_err(|e| StoreError::unavailable(path, e))?;
        schema::validate_archive_columns(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            uids: Arc::clone(&self.uids),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn migrations(&self) -> MigrationRunner<'_> {
        MigrationRunner::new(&self.conn)
    }

    pub fn uid_generator(&self) -> &UidGenerator {
        &self.uids
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert `archive` as a new row.
    ///
    /// An empty UID is replaced by a freshly generated one. On success the
    /// row id and UID are written back onto `archive`.
    pub fn add(&self, archive: &mut Archive) -> Result<()> {
        let uid = if archive.uid.is_empty() {
            self.uids.generate()
        } else {
            archive.uid.clone()
        };

        self.conn
            .execute(
                "INSERT INTO archives
                 (uid, name, path, size, created, checksum, profile, managed, status,
                  last_seen, deleted_at, original_path, uploaded, destination, uploaded_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    uid,
                    archive.name,
                    archive.path,
                    archive.size as i64,
                    archive.created,
                    archive.checksum,
                    archive.profile,
                    archive.managed,
                    archive.status,
                    archive.last_seen,
                    archive.deleted_at,
                    archive.original_path,
                    archive.uploaded,
                    archive.destination,
                    archive.uploaded_at,
                    archive.metadata,
                ],
            )
            .map_err(|e| classify_write_error(e, &uid, &archive.name))?;

        archive.id = self.conn.last_insert_rowid();
        archive.uid = uid;
        Ok(())
    }

    /// Get an archive by name.
    pub fn get(&self, name: &str) -> Result<Archive> {
        self.query_one(&select_archives("WHERE name = ?1"), [name])?
            .ok_or_else(|| StoreError::not_found(name))
    }

    /// Get an archive by exact UID.
    pub fn get_by_uid(&self, uid: &str) -> Result<Archive> {
        self.query_one(&select_archives("WHERE uid = ?1"), [uid])?
            .ok_or_else(|| StoreError::not_found(uid))
    }

    /// Get an archive by row id.
    pub fn get_by_id(&self, id: i64) -> Result<Archive> {
        self.query_one(&select_archives("WHERE id = ?1"), [id])?
            .ok_or_else(|| StoreError::not_found(id.to_string()))
    }

    /// Whether an archive named `name` exists.
    pub fn exists(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Archives whose UID starts with `prefix`, newest first, at most `limit`.
    ///
    /// Matching ignores ASCII case. Only the resolver uses this.
    pub(crate) fn find_by_uid_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Archive>> {
        self.find_by_prefix("uid", prefix, limit)
    }

    /// Archives whose checksum starts with `prefix`, newest first, at most `limit`.
    pub(crate) fn find_by_checksum_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Archive>> {
        self.find_by_prefix("checksum", prefix, limit)
    }

    fn find_by_prefix(&self, column: &'static str, prefix: &str, limit: usize) -> Result<Vec<Archive>> {
        if prefix.is_empty() {
            return Ok(Vec::new());
        }
        let limit = if limit == 0 { DEFAULT_MAX_CANDIDATES } else { limit };
        let pattern = format!("{}%", escape_like(prefix));
        let sql = select_archives(&format!(
            "WHERE {column} LIKE ?1 ESCAPE '\\' ORDER BY created DESC, id DESC LIMIT ?2"
        ));
        self.query_many(&sql, params![pattern, limit as i64])
    }

    /// All archives, newest first.
    pub fn list(&self) -> Result<Vec<Archive>> {
        self.query_many(&select_archives("ORDER BY created DESC, id DESC"), [])
    }

    /// Archives without a remote copy, newest first.
    pub fn list_not_uploaded(&self) -> Result<Vec<Archive>> {
        self.query_many(
            &select_archives(
                "WHERE uploaded IS NULL OR uploaded = 0 ORDER BY created DESC, id DESC",
            ),
            [],
        )
    }

    /// Archives created more than `age` ago, newest first.
    pub fn list_older_than(&self, age: Duration) -> Result<Vec<Archive>> {
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };
        self.query_many(
            &select_archives("WHERE created < ?1 ORDER BY created DESC, id DESC"),
            [cutoff],
        )
    }

    /// Number of archive rows.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM archives", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Overwrite every column of the row with id `archive.id`.
    pub fn update(&self, archive: &Archive) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE archives
                 SET uid = ?1, name = ?2, path = ?3, size = ?4, created = ?5, checksum = ?6,
                     profile = ?7, managed = ?8, status = ?9, last_seen = ?10, deleted_at = ?11,
                     original_path = ?12, uploaded = ?13, destination = ?14, uploaded_at = ?15,
                     metadata = ?16
                 WHERE id = ?17",
                params![
                    archive.uid,
                    archive.name,
                    archive.path,
                    archive.size as i64,
                    archive.created,
                    archive.checksum,
                    archive.profile,
                    archive.managed,
                    archive.status,
                    archive.last_seen,
                    archive.deleted_at,
                    archive.original_path,
                    archive.uploaded,
                    archive.destination,
                    archive.uploaded_at,
                    archive.metadata,
                    archive.id,
                ],
            )
            .map_err(|e| classify_write_error(e, &archive.uid, &archive.name))?;

        if changed == 0 {
            return Err(StoreError::not_found(archive.id.to_string()));
        }
        Ok(())
    }

    /// Remove the row named `name`. Files on disk are not touched.
    pub fn delete(&self, name: &str) -> Result<()> {
        let changed = self
            .conn
            .execute("DELETE FROM archives WHERE name = ?1", [name])?;
        if changed == 0 {
            return Err(StoreError::not_found(name));
        }
        Ok(())
    }

    /// Give every row without a UID one from `generate`. Rows that already
    /// have a UID are left untouched. Returns how many rows were filled.
    pub fn backfill_uids<F>(&self, mut generate: F) -> Result<usize>
    where
        F: FnMut() -> String,
    {
        let tx = self.conn.unchecked_transaction()?;
        let ids = {
            let mut stmt = tx.prepare("SELECT id, name FROM archives WHERE uid IS NULL OR uid = ''")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        for (id, name) in &ids {
            let uid = generate();
            tx.execute("UPDATE archives SET uid = ?1 WHERE id = ?2", params![uid, id])
                .map_err(|e| classify_write_error(e, &uid, name))?;
        }
        tx.commit()?;

        if !ids.is_empty() {
            info!(count = ids.len(), "Backfilled archive UIDs");
        }
        Ok(ids.len())
    }

    /// Release the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn query_one<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Option<Archive>> {
        Ok(self
            .conn
            .query_row(sql, params, Archive::from_row)
            .optional()?)
    }

    fn query_many<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Archive>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, Archive::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Turn a UNIQUE violation into [`StoreError::Conflict`].
fn classify_write_error(err: rusqlite::Error, uid: &str, name: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(ref failure, Some(ref message)) = err {
        if failure.code == ErrorCode::ConstraintViolation {
            if message.contains("archives.uid") {
                return StoreError::Conflict {
                    field: "uid",
                    value: uid.to_string(),
                };
            }
            if message.contains("archives.name") {
                return StoreError::Conflict {
                    field: "name",
                    value: name.to_string(),
                };
            }
        }
    }
    StoreError::Sqlite(err)
}

/// Errors meaning the file is not a usable registry at all.
fn is_unusable(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::CannotOpen
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly
        )
    )
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn create_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder
        .create(parent)
        .map_err(|e| StoreError::unavailable(path, e))
}

fn restrict_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| StoreError::unavailable(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
