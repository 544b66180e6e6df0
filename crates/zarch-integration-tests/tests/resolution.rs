//! Integration test: identifier resolution against a file-backed registry.
//!
//! Covers the order of resolution stages, the prefix length gate and how
//! ambiguity is reported.

use chrono::{Duration, Utc};
use zarch_db::{Archive, ArchiveStore, Resolver, StoreError};

/// Two UIDs sharing their first 8 characters, and nothing beyond that.
const U1: &str = "01HQ7ZK3AAAAAAAAAAAAAAAAAA";
const U2: &str = "01HQ7ZK3BBBBBBBBBBBBBBBBBB";
const SHARED_PREFIX: &str = "01HQ7ZK3";

fn open_store(dir: &tempfile::TempDir) -> ArchiveStore {
    ArchiveStore::open(dir.path().join("registry.db")).expect("open registry")
}

fn add_with_uid(store: &ArchiveStore, name: &str, uid: &str, minutes_ago: i64) -> Archive {
    let mut archive = Archive::new(name, format!("/archives/{name}"), 4096);
    archive.uid = uid.to_string();
    archive.created = Utc::now() - Duration::minutes(minutes_ago);
    store.add(&mut archive).expect("add archive");
    archive
}

#[test]
fn shared_prefix_is_ambiguous_but_full_uid_is_not() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    add_with_uid(&store, "a.7z", U1, 10);
    add_with_uid(&store, "b.7z", U2, 5);

    // The shared prefix is 8 characters, so the gate must admit it.
    let resolver = Resolver::new(&store).with_min_prefix_length(8);

    match resolver.resolve(SHARED_PREFIX) {
        Err(StoreError::Ambiguous { candidates, .. }) => {
            assert_eq!(candidates.len(), 2);
            let names: Vec<_> = candidates.iter().map(|a| a.name.as_str()).collect();
            assert_eq!(names, vec!["b.7z", "a.7z"], "newest first");
        }
        other => unreachable!("expected ambiguity, got {other:?}"),
    }

    assert_eq!(resolver.resolve(U1).expect("full uid").name, "a.7z");
    assert_eq!(resolver.resolve(U2).expect("full uid").name, "b.7z");
}

#[test]
fn default_gate_skips_short_prefixes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    add_with_uid(&store, "a.7z", U1, 10);
    add_with_uid(&store, "b.7z", U2, 5);

    let resolver = Resolver::new(&store);
    assert!(matches!(
        resolver.resolve(SHARED_PREFIX),
        Err(StoreError::NotFound { .. })
    ));

    // A short input still reaches the name stage.
    let mut named = Archive::new("01HQ7ZK3", "/archives/odd", 1);
    store.add(&mut named).expect("add");
    assert_eq!(resolver.resolve(SHARED_PREFIX).expect("by name").id, named.id);
}

#[test]
fn n_archives_sharing_a_prefix_yield_n_candidates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let prefix = "01HR000000ZZ";
    for i in 0..7 {
        let uid = format!("{prefix}{i:0>14}");
        add_with_uid(&store, &format!("batch-{i}.7z"), &uid, i);
    }
    add_with_uid(&store, "other.7z", "01HS0000000000000000000000", 1);

    match Resolver::new(&store).resolve(prefix) {
        Err(StoreError::Ambiguous { input, candidates }) => {
            assert_eq!(input, prefix);
            assert_eq!(candidates.len(), 7);
        }
        other => unreachable!("expected ambiguity, got {other:?}"),
    }
}

#[test]
fn unique_prefix_resolves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    add_with_uid(&store, "a.7z", U1, 10);
    add_with_uid(&store, "b.7z", U2, 5);

    let archive = Resolver::new(&store).resolve(&U2[..12]).expect("unique prefix");
    assert_eq!(archive.name, "b.7z");
}

#[test]
fn full_uid_resolves_in_a_large_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let mut target = None;
    for i in 0..500 {
        let mut archive = Archive::new(format!("bulk-{i:04}.7z"), format!("/bulk/{i}"), i);
        store.add(&mut archive).expect("add");
        if i == 250 {
            target = Some(archive);
        }
    }
    let target = target.expect("target archive recorded");
    let found = Resolver::new(&store).resolve(&target.uid).expect("resolve");
    assert_eq!(found, target);
}

#[test]
fn blank_input_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    add_with_uid(&store, "a.7z", U1, 1);
    let resolver = Resolver::new(&store).with_min_prefix_length(1);

    for input in ["", "   "] {
        assert!(matches!(
            resolver.resolve(input),
            Err(StoreError::NotFound { .. })
        ));
    }
}

#[test]
fn row_id_takes_precedence_over_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let first = add_with_uid(&store, "a.7z", U1, 10);
    // An archive literally named after the first row's id.
    let mut decoy = Archive::new(first.id.to_string(), "/archives/decoy", 1);
    store.add(&mut decoy).expect("add");

    let found = Resolver::new(&store)
        .resolve(&first.id.to_string())
        .expect("resolve");
    assert_eq!(found.name, "a.7z");
}
