//! Time-sortable archive identifiers.
//!
//! UIDs are ULIDs: 48 bits of millisecond timestamp followed by 80 bits of
//! randomness, Crockford base32 encoded to 26 characters. Within a single
//! millisecond the generator increments the random part so identifiers stay
//! strictly increasing.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use ulid::{Generator, Ulid};

/// Length of an encoded UID.
pub const UID_LEN: usize = 26;

/// Characters shown when a UID is abbreviated for humans.
pub const SHORT_UID_LEN: usize = 8;

/// Monotonic UID source, safe to share between threads.
pub struct UidGenerator {
    inner: Mutex<Generator>,
}

impl UidGenerator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    /// Produce the next identifier.
    pub fn generate(&self) -> String {
        let mut generator = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match generator.generate() {
            Ok(ulid) => ulid.to_string(),
            // 2^80 ids inside one millisecond; fall back to a fresh random ULID.
            Err(_) => Ulid::new().to_string(),
        }
    }
}

impl Default for UidGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UidGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UidGenerator").finish_non_exhaustive()
    }
}

/// Whether `uid` is a well-formed 26-character identifier.
pub fn is_valid(uid: &str) -> bool {
    uid.len() == UID_LEN && Ulid::from_string(uid).is_ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_uid_shape() {
        let uid = UidGenerator::new().generate();
        assert_eq!(uid.len(), UID_LEN);
        assert!(is_valid(&uid));
    }

    #[test]
    fn test_monotonic_within_generator() {
        let generator = UidGenerator::new();
        let uids: Vec<String> = (0..1000).map(|_| generator.generate()).collect();
        for pair in uids.windows(2) {
            assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(UidGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || (0..500).map(|_| generator.generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for uid in handle.join().expect("worker thread") {
                assert!(seen.insert(uid), "duplicate uid generated");
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_is_valid_rejects_garbage() {
        assert!(!is_valid(""));
        assert!(!is_valid("01ARZ3ND"));
        assert!(!is_valid("not-a-ulid-not-a-ulid-0000"));
    }
}
