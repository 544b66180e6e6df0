//! SQL schema definitions and introspection helpers.
//!
//! The DDL here is only ever executed through the migration catalog in
//! [`crate::migrations`]. Every statement is safe to run twice.

use rusqlite::Connection;

use crate::{Result, StoreError};

/// Columns of `archives`, in the order every SELECT lists them.
///
/// [`crate::Archive`] reads rows by column name; [`validate_archive_columns`]
/// checks at open time that each of these exists.
pub const ARCHIVE_COLUMNS: [&str; 17] = [
    "id",
    "uid",
    "name",
    "path",
    "size",
    "created",
    "checksum",
    "profile",
    "managed",
    "status",
    "last_seen",
    "deleted_at",
    "original_path",
    "uploaded",
    "destination",
    "uploaded_at",
    "metadata",
];

/// Migration bookkeeping table.
pub const MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMP NOT NULL
);
"#;

/// 0001: the archives table as it shipped before identity tracking.
pub const BASELINE: &str = r#"
CREATE TABLE IF NOT EXISTS archives (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    path TEXT NOT NULL,
    size INTEGER NOT NULL,
    created TIMESTAMP NOT NULL,
    checksum TEXT,
    profile TEXT,
    uploaded BOOLEAN DEFAULT FALSE,
    destination TEXT,
    uploaded_at TIMESTAMP,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_archives_created ON archives(created);
CREATE INDEX IF NOT EXISTS idx_archives_uploaded ON archives(uploaded);
CREATE INDEX IF NOT EXISTS idx_archives_destination ON archives(destination);
CREATE INDEX IF NOT EXISTS idx_archives_checksum ON archives(checksum);
"#;

/// 0002: columns added alongside UIDs. Applied with [`ensure_column`].
pub const IDENTITY_COLUMNS: [(&str, &str); 4] = [
    ("uid", "TEXT"),
    ("managed", "BOOLEAN DEFAULT FALSE"),
    ("status", "TEXT NOT NULL DEFAULT 'present'"),
    ("last_seen", "TIMESTAMP"),
];

/// 0002: UID uniqueness. NULL uids (legacy rows) do not collide.
pub const IDENTITY_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_archives_uid ON archives(uid);
CREATE INDEX IF NOT EXISTS idx_archives_status ON archives(status);
"#;

/// 0003: trash bookkeeping.
pub const TRASH_COLUMNS: [(&str, &str); 2] =
    [("deleted_at", "TIMESTAMP"), ("original_path", "TEXT")];

/// 0004: saved queries.
pub const QUERIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queries (
    name TEXT PRIMARY KEY,
    filters TEXT NOT NULL,
    created INTEGER NOT NULL,
    last_used INTEGER,
    use_count INTEGER NOT NULL DEFAULT 0
);
"#;

/// 0005: term index maintained by the search subsystem.
pub const SEARCH_INDEX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS search_index (
    term TEXT NOT NULL,
    archive_uid TEXT NOT NULL,
    field TEXT NOT NULL,
    PRIMARY KEY (term, archive_uid, field)
);

CREATE INDEX IF NOT EXISTS idx_search_term ON search_index(term);
"#;

/// `SELECT <all archive columns> FROM archives <clause>`.
pub(crate) fn select_archives(clause: &str) -> String {
    format!("SELECT {} FROM archives {clause}", ARCHIVE_COLUMNS.join(", "))
}

/// Whether `table` exists.
pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Whether `table` has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get::<_, i64>(0),
    )
    .map(|count| count > 0)
}

/// Add `column` to `table` unless it is already there.
///
/// Table, column and declaration are compile-time constants from this
/// module; they are interpolated because DDL cannot be parameterised.
pub(crate) fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    declaration: &str,
) -> rusqlite::Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {declaration}"
        ))?;
    }
    Ok(())
}

/// Fail fast if `archives` lacks any column the row mapping reads.
pub fn validate_archive_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('archives')")?;
    let present = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let missing: Vec<&str> = ARCHIVE_COLUMNS
        .iter()
        .copied()
        .filter(|column| !present.iter().any(|p| p == column))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Schema(format!(
            "archives table is missing columns: {}",
            missing.join(", ")
        )))
    }
}
