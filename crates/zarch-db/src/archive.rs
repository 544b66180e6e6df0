//! The archive record and its lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::uid::SHORT_UID_LEN;

/// Where an archive stands relative to its file on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Present,
    /// Verification could not find the file.
    Missing,
    /// Soft-deleted; restorable.
    Deleted,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Missing => "missing",
            Status::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown archive status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(Status::Present),
            "missing" => Ok(Status::Missing),
            "deleted" => Ok(Status::Deleted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// One tracked archive file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    /// Store-assigned row id; 0 until added.
    pub id: i64,
    /// Empty until the store assigns one.
    pub uid: String,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    /// Hex digest, when known.
    pub checksum: Option<String>,
    /// Compression profile label.
    pub profile: Option<String>,
    /// True when `path` lives under zarch-owned storage.
    pub managed: bool,
    pub status: Status,
    pub last_seen: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Location before a managed soft delete moved the file to trash.
    pub original_path: Option<String>,
    pub uploaded: bool,
    pub destination: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub metadata: Option<String>,
}

impl Archive {
    /// A present, external archive created now. Id and UID are assigned by
    /// [`ArchiveStore::add`](crate::ArchiveStore::add).
    pub fn new(name: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            id: 0,
            uid: String::new(),
            name: name.into(),
            path: path.into(),
            size,
            created: Utc::now(),
            checksum: None,
            profile: None,
            managed: false,
            status: Status::Present,
            last_seen: None,
            deleted_at: None,
            original_path: None,
            uploaded: false,
            destination: None,
            uploaded_at: None,
            metadata: None,
        }
    }

    /// First characters of the UID, enough to tell candidates apart.
    pub fn short_uid(&self) -> &str {
        self.uid.get(..SHORT_UID_LEN).unwrap_or(&self.uid)
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created)
    }

    pub fn is_deleted(&self) -> bool {
        self.status == Status::Deleted
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.status = Status::Deleted;
        self.deleted_at = Some(now);
    }

    /// Managed soft delete: the file now sits at `trash_path`.
    pub fn mark_trashed(&mut self, trash_path: impl Into<String>, now: DateTime<Utc>) {
        let previous = std::mem::replace(&mut self.path, trash_path.into());
        if self.original_path.is_none() {
            self.original_path = Some(previous);
        }
        self.mark_deleted(now);
    }

    /// Forced delete: the file is gone but the row stays until purged.
    pub fn mark_removed(&mut self, now: DateTime<Utc>) {
        if self.original_path.is_none() {
            self.original_path = Some(self.path.clone());
        }
        self.mark_deleted(now);
    }

    pub fn mark_restored(&mut self, path: impl Into<String>, now: DateTime<Utc>) {
        self.path = path.into();
        self.status = Status::Present;
        self.deleted_at = None;
        self.original_path = None;
        self.last_seen = Some(now);
    }

    pub fn mark_missing(&mut self) {
        self.status = Status::Missing;
    }

    pub fn mark_uploaded(&mut self, destination: impl Into<String>, now: DateTime<Utc>) {
        self.uploaded = true;
        self.destination = Some(destination.into());
        self.uploaded_at = Some(now);
    }

    /// Build from a row selected with [`crate::schema::ARCHIVE_COLUMNS`].
    ///
    /// Columns are read by name. Rows written before UIDs existed carry a
    /// NULL uid, which maps to an empty string.
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            uid: row.get::<_, Option<String>>("uid")?.unwrap_or_default(),
            name: row.get("name")?,
            path: row.get("path")?,
            size: row.get::<_, i64>("size")? as u64,
            created: row.get("created")?,
            checksum: row.get("checksum")?,
            profile: row.get("profile")?,
            managed: row.get::<_, Option<bool>>("managed")?.unwrap_or(false),
            status: row.get::<_, Option<Status>>("status")?.unwrap_or_default(),
            last_seen: row.get("last_seen")?,
            deleted_at: row.get("deleted_at")?,
            original_path: row.get("original_path")?,
            uploaded: row.get::<_, Option<bool>>("uploaded")?.unwrap_or(false),
            destination: row.get("destination")?,
            uploaded_at: row.get("uploaded_at")?,
            metadata: row.get("metadata")?,
        })
    }
}
