//! Integration test: schema migrations and backups on real files.
//!
//! Exercises:
//! 1. A fresh registry receiving every catalog migration
//! 2. Re-running the runner as a no-op
//! 3. Backups matching the source row for row
//! 4. Adoption of a registry created before migrations were tracked

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use zarch_db::migrations::{BASELINE_ID, CATALOG, IDENTITY_ID};
use zarch_db::schema;
use zarch_db::{uid, Archive, ArchiveStore, MigrationRunner};

fn backups_in(dir: &Path) -> Vec<PathBuf> {
    let mut found: Vec<_> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "bak"))
        .collect();
    found.sort();
    found
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}

#[test]
fn fresh_registry_records_every_migration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("registry.db");
    let store = ArchiveStore::open(&db_path).expect("open");

    let runner = store.migrations();
    let applied: Vec<_> = runner
        .applied_migrations()
        .expect("applied")
        .into_iter()
        .map(|m| m.id)
        .collect();
    let catalog: Vec<_> = CATALOG.iter().map(|m| m.id.to_string()).collect();
    assert_eq!(applied, catalog);
    assert!(runner.pending_migrations().expect("pending").is_empty());
}

#[test]
fn apply_pending_twice_is_a_no_op() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("registry.db");
    let store = ArchiveStore::open(&db_path).expect("open");
    let runner = store.migrations();

    for _ in 0..2 {
        let report = runner.apply_pending(&db_path).expect("apply");
        assert!(report.applied.is_empty());
        assert!(report.backup.is_none(), "nothing pending, nothing to back up");
        assert!(runner.pending_migrations().expect("pending").is_empty());
    }
    let conn = Connection::open(&db_path).expect("raw connection");
    assert_eq!(count_rows(&conn, "schema_migrations"), CATALOG.len() as i64);
}

#[test]
fn backup_matches_source_row_counts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("registry.db");
    let store = ArchiveStore::open(&db_path).expect("open");
    for i in 0..25 {
        let mut archive = Archive::new(format!("a{i}.7z"), format!("/archives/a{i}.7z"), 100);
        store.add(&mut archive).expect("add");
    }

    let backup = store.migrations().create_backup(&db_path).expect("backup");
    assert_eq!(backup.parent(), db_path.parent());

    let source = Connection::open(&db_path).expect("open source");
    let copy = Connection::open(&backup).expect("open backup");
    for table in ["archives", "schema_migrations", "queries", "search_index"] {
        assert_eq!(
            count_rows(&copy, table),
            count_rows(&source, table),
            "row count of {table}"
        );
    }
    assert_eq!(count_rows(&copy, "archives"), 25);
}

/// Build a registry the way releases before migration tracking did: the
/// baseline table, filled, with no `schema_migrations`.
fn legacy_registry(path: &Path) {
    let conn = Connection::open(path).expect("create legacy db");
    conn.execute_batch(schema::BASELINE).expect("legacy schema");
    for name in ["old-1.7z", "old-2.7z", "old-3.7z"] {
        conn.execute(
            "INSERT INTO archives (name, path, size, created, uploaded)
             VALUES (?1, ?2, 1024, ?3, 0)",
            rusqlite::params![name, format!("/legacy/{name}"), chrono::Utc::now()],
        )
        .expect("legacy row");
    }
}

#[test]
fn legacy_registry_is_adopted_and_upgraded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("registry.db");
    legacy_registry(&db_path);

    let store = ArchiveStore::open(&db_path).expect("open legacy registry");

    // Upgrading took a backup holding the legacy rows.
    let backups = backups_in(dir.path());
    assert_eq!(backups.len(), 1);
    let copy = Connection::open(&backups[0]).expect("open backup");
    assert_eq!(count_rows(&copy, "archives"), 3);

    // The baseline was adopted, not re-run; everything after it applied.
    let runner = store.migrations();
    assert!(runner.is_applied(BASELINE_ID).expect("check"));
    assert!(runner.is_applied(IDENTITY_ID).expect("check"));
    assert!(runner.pending_migrations().expect("pending").is_empty());

    // Legacy rows read back with defaults for the new columns.
    let old = store.get("old-1.7z").expect("legacy row");
    assert_eq!(old.uid, "");
    assert_eq!(old.status, zarch_db::Status::Present);
    assert!(!old.managed);

    let generator = store.uid_generator();
    assert_eq!(store.backfill_uids(|| generator.generate()).expect("backfill"), 3);
    for archive in store.list().expect("list") {
        assert!(uid::is_valid(&archive.uid));
    }
}

#[test]
fn second_open_takes_no_backup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("registry.db");
    legacy_registry(&db_path);

    ArchiveStore::open(&db_path)
        .expect("first open")
        .close()
        .expect("close");
    ArchiveStore::open(&db_path)
        .expect("second open")
        .close()
        .expect("close");
    assert_eq!(backups_in(dir.path()).len(), 1);
}

#[test]
fn maintenance_open_reports_without_migrating() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("registry.db");
    legacy_registry(&db_path);

    let store = ArchiveStore::open_for_maintenance(&db_path).expect("open");
    let status = store.migrations().status().expect("status");
    assert_eq!(status.applied.len(), 1);
    assert_eq!(status.pending.len(), CATALOG.len() - 1);
    assert!(backups_in(dir.path()).is_empty());

    let conn = Connection::open(&db_path).expect("raw connection");
    let runner = MigrationRunner::new(&conn);
    assert!(!schema::column_exists(&conn, "archives", "uid").expect("check"));
    assert_eq!(runner.pending_migrations().expect("pending").len(), CATALOG.len() - 1);
}
