//! Turn whatever a user typed into exactly one archive.
//!
//! Stages run in a fixed order and stop at the first that yields an answer:
//!
//! 1. decimal row id
//! 2. exact UID
//! 3. UID prefix, only for inputs of at least `min_prefix_length` characters
//! 4. checksum prefix, same length gate
//! 5. exact name
//!
//! A prefix stage that matches several archives ends resolution with
//! [`StoreError::Ambiguous`]; later stages are not consulted. The caller is
//! expected to show the candidates and let the user pick a longer input.

use tracing::debug;

use crate::archive::Archive;
use crate::store::ArchiveStore;
use crate::{Result, StoreError, DEFAULT_MAX_CANDIDATES, DEFAULT_MIN_PREFIX_LENGTH};

/// Read-only lookup over a store.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'s> {
    store: &'s ArchiveStore,
    min_prefix_length: usize,
    max_candidates: usize,
}

impl<'s> Resolver<'s> {
    pub fn new(store: &'s ArchiveStore) -> Self {
        Self {
            store,
            min_prefix_length: DEFAULT_MIN_PREFIX_LENGTH,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }

    /// Shortest input the prefix stages accept. Values below 1 are raised to 1.
    pub fn with_min_prefix_length(mut self, length: usize) -> Self {
        self.min_prefix_length = length.max(1);
        self
    }

    /// Cap on candidates carried by an ambiguity error. 0 means the default.
    ///
    /// At least two rows are always scanned, otherwise a capped scan could
    /// pass for a unique match.
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = match max {
            0 => DEFAULT_MAX_CANDIDATES,
            n => n.max(2),
        };
        self
    }

    pub fn min_prefix_length(&self) -> usize {
        self.min_prefix_length
    }

    pub fn resolve(&self, input: &str) -> Result<Archive> {
        let needle = input.trim();
        if needle.is_empty() {
            return Err(StoreError::not_found(input));
        }

        if let Some(id) = row_id(needle) {
            if let Some(archive) = found(self.store.get_by_id(id))? {
                debug!(input = needle, "Resolved by id");
                return Ok(archive);
            }
        }

        if let Some(archive) = found(self.store.get_by_uid(needle))? {
            debug!(input = needle, "Resolved by uid");
            return Ok(archive);
        }

        if needle.chars().count() >= self.min_prefix_length {
            let by_uid = self.store.find_by_uid_prefix(needle, self.max_candidates)?;
            if let Some(archive) = self.single(input, by_uid)? {
                debug!(input = needle, "Resolved by uid prefix");
                return Ok(archive);
            }

            let by_checksum = self
                .store
                .find_by_checksum_prefix(needle, self.max_candidates)?;
            if let Some(archive) = self.single(input, by_checksum)? {
                debug!(input = needle, "Resolved by checksum prefix");
                return Ok(archive);
            }
        }

        if let Some(archive) = found(self.store.get(needle))? {
            debug!(input = needle, "Resolved by name");
            return Ok(archive);
        }

        Err(StoreError::not_found(input))
    }

    /// `None` for no matches, the archive for one, an error for several.
    fn single(&self, input: &str, mut matches: Vec<Archive>) -> Result<Option<Archive>> {
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(StoreError::Ambiguous {
                input: input.to_string(),
                candidates: matches,
            }),
        }
    }
}

/// Plain decimal digits only; signs and separators fall through to the
/// later stages.
fn row_id(input: &str) -> Option<i64> {
    if !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    input.parse().ok()
}

/// Treat `NotFound` as "try the next stage" and keep every other error.
fn found(result: Result<Archive>) -> Result<Option<Archive>> {
    match result {
        Ok(archive) => Ok(Some(archive)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
