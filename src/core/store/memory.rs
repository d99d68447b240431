//! In-process versioned store
//!
//! Every successful write bumps a store-wide revision, so versions are
//! unique across keys and never reused after a key expires.

use crate::error::{AllocatorError, Result};
use crate::store::{Version, Versioned, VersionedStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct Entry {
    data: Vec<u8>,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[derive(Debug, Default)]
struct State {
    revision: u64,
    entries: HashMap<String, Entry>,
}

/// Versioned store backed by a hash map
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store-wide revision
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VersionedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>> {
        let now = Instant::now();
        let state = self.state.lock();
        Ok(state
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| Versioned {
                value: e.data.clone(),
                version: Version::new(e.version),
            }))
    }

    fn create(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<Version> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Err(AllocatorError::KeyExists(key.to_string()));
        }

        // Expired entries are only dropped here; reads just skip them
        let before = state.entries.len();
        state.entries.retain(|_, e| e.is_live(now));
        let purged = before - state.entries.len();
        if purged > 0 {
            trace!(purged, "dropped expired keys");
        }

        state.revision += 1;
        let version = state.revision;
        state.entries.insert(
            key.to_string(),
            Entry {
                data: data.to_vec(),
                version,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );

        trace!(key, version, "created key");
        Ok(Version::new(version))
    }

    fn compare_and_swap(&self, key: &str, data: &[u8], expected: Version) -> Result<Version> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let next = state.revision + 1;

        let entry = match state.entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => entry,
            _ => return Err(AllocatorError::KeyNotFound(key.to_string())),
        };

        if entry.version != expected.get() {
            return Err(AllocatorError::Conflict {
                key: key.to_string(),
                expected: expected.get(),
                actual: entry.version,
            });
        }

        entry.data = data.to_vec();
        entry.version = next;
        state.revision = next;

        trace!(key, version = next, "swapped key");
        Ok(Version::new(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing() {
        let store = MemoryStore::new();
        assert!(store.get("/missing").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_create_then_get() {
        let store = MemoryStore::new();
        let version = store.create("/a", b"one", None).unwrap();

        let current = store.get("/a").unwrap().unwrap();
        assert_eq!(current.value, b"one");
        assert_eq!(current.version, version);
    }

    #[test]
    fn test_create_twice_fails() {
        let store = MemoryStore::new();
        store.create("/a", b"one", None).unwrap();
        assert!(matches!(
            store.create("/a", b"two", None),
            Err(AllocatorError::KeyExists(_))
        ));
    }

    #[test]
    fn test_compare_and_swap() {
        let store = MemoryStore::new();
        let v1 = store.create("/a", b"one", None).unwrap();

        let v2 = store.compare_and_swap("/a", b"two", v1).unwrap();
        assert!(v2 > v1);

        // Stale version loses
        match store.compare_and_swap("/a", b"three", v1) {
            Err(AllocatorError::Conflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, v1.get());
                assert_eq!(actual, v2.get());
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        assert_eq!(store.get("/a").unwrap().unwrap().value, b"two");
    }

    #[test]
    fn test_compare_and_swap_missing_key() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.compare_and_swap("/a", b"x", Version::new(1)),
            Err(AllocatorError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_versions_unique_across_keys() {
        let store = MemoryStore::new();
        let a = store.create("/a", b"", None).unwrap();
        let b = store.create("/b", b"", None).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_ttl_expiry_allows_recreate_with_new_version() {
        let store = MemoryStore::new();
        let old = store
            .create("/lease", b"old", Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert!(store.get("/lease").unwrap().is_none());
        assert!(matches!(
            store.compare_and_swap("/lease", b"x", old),
            Err(AllocatorError::KeyNotFound(_))
        ));

        let new = store.create("/lease", b"new", None).unwrap();
        assert!(new > old);
    }

    #[test]
    fn test_create_drops_expired_entries() {
        let store = MemoryStore::new();
        store
            .create("/a", b"short", Some(Duration::from_millis(1)))
            .unwrap();
        store.create("/b", b"kept", None).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(store.len(), 1);
        assert_eq!(store.state.lock().entries.len(), 2);

        store.create("/c", b"new", None).unwrap();
        let state = store.state.lock();
        assert_eq!(state.entries.len(), 2);
        assert!(!state.entries.contains_key("/a"));
    }
}
