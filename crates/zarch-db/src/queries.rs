//! Saved archive queries.
//!
//! A saved query is a named filter set stored as JSON. The registry does not
//! interpret the filters; that is left to whoever runs the query.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::store::ArchiveStore;
use crate::{Result, StoreError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub name: String,
    pub filters: serde_json::Value,
    pub created: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub use_count: u64,
}

const SELECT: &str = "SELECT name, filters, created, last_used, use_count FROM queries";

/// Save `filters` under `name`, replacing the filters of an existing query.
///
/// Replacing keeps the creation time and usage counters.
pub fn save(store: &ArchiveStore, name: &str, filters: &serde_json::Value) -> Result<()> {
    let encoded = filters.to_string();
    store.conn().execute(
        "INSERT INTO queries (name, filters, created, use_count) VALUES (?1, ?2, ?3, 0)
         ON CONFLICT(name) DO UPDATE SET filters = excluded.filters",
        params![name, encoded, Utc::now().timestamp()],
    )?;
    Ok(())
}

pub fn get(store: &ArchiveStore, name: &str) -> Result<SavedQuery> {
    store
        .conn()
        .query_row(&format!("{SELECT} WHERE name = ?1"), [name], from_row)
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("query '{name}'")))
}

/// All saved queries, by name.
pub fn list(store: &ArchiveStore) -> Result<Vec<SavedQuery>> {
    let mut stmt = store.conn().prepare(&format!("{SELECT} ORDER BY name"))?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete(store: &ArchiveStore, name: &str) -> Result<()> {
    let changed = store
        .conn()
        .execute("DELETE FROM queries WHERE name = ?1", [name])?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("query '{name}'")));
    }
    Ok(())
}

/// Bump the usage counter and stamp the last-used time.
pub fn record_use(store: &ArchiveStore, name: &str) -> Result<()> {
    let changed = store.conn().execute(
        "UPDATE queries SET use_count = use_count + 1, last_used = ?2 WHERE name = ?1",
        params![name, Utc::now().timestamp()],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found(format!("query '{name}'")));
    }
    Ok(())
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<SavedQuery> {
    let filters: String = row.get(1)?;
    let filters = serde_json::from_str(&filters)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let last_used = match row.get::<_, Option<i64>>(3)? {
        Some(secs) => Some(timestamp(3, secs)?),
        None => None,
    };
    Ok(SavedQuery {
        name: row.get(0)?,
        filters,
        created: timestamp(2, row.get(2)?)?,
        last_used,
        use_count: row.get::<_, i64>(4)?.max(0) as u64,
    })
}

fn timestamp(column: usize, secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, secs))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn test_store() -> ArchiveStore {
        ArchiveStore::open_in_memory().expect("open test store")
    }

    #[test]
    fn test_save_and_get() {
        let store = test_store();
        let filters = json!({"profile": "max", "uploaded": false});
        save(&store, "unsynced-max", &filters).expect("save");

        let query = get(&store, "unsynced-max").expect("get");
        assert_eq!(query.filters, filters);
        assert_eq!(query.use_count, 0);
        assert!(query.last_used.is_none());
    }

    #[test]
    fn test_save_replaces_filters_keeps_counters() {
        let store = test_store();
        save(&store, "recent", &json!({"days": 7})).expect("save");
        record_use(&store, "recent").expect("use");
        save(&store, "recent", &json!({"days": 14})).expect("resave");

        let query = get(&store, "recent").expect("get");
        assert_eq!(query.filters, json!({"days": 14}));
        assert_eq!(query.use_count, 1);
        assert!(query.last_used.is_some());
        assert_eq!(list(&store).expect("list").len(), 1);
    }

    #[test]
    fn test_list_sorted_by_name() {
        let store = test_store();
        for name in ["zeta", "alpha", "mid"] {
            save(&store, name, &json!({})).expect("save");
        }
        let names: Vec<_> = list(&store)
            .expect("list")
            .into_iter()
            .map(|q| q.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_missing_query() {
        let store = test_store();
        assert!(matches!(get(&store, "nope"), Err(StoreError::NotFound { .. })));
        assert!(matches!(delete(&store, "nope"), Err(StoreError::NotFound { .. })));
        assert!(matches!(record_use(&store, "nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_delete() {
        let store = test_store();
        save(&store, "gone", &json!({"name": "*.7z"})).expect("save");
        delete(&store, "gone").expect("delete");
        assert!(list(&store).expect("list").is_empty());
    }
}
