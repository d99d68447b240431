//! Versioned key-value storage used to persist allocation records
//!
//! The allocator only needs three primitives from a backing store: read a
//! value with its version, create a key that must not exist yet, and replace
//! a value if its version still matches. Adapters:
//! - [`memory::MemoryStore`] - process-local, etcd-style global revision
//! - [`file::FileStore`] - one file per key, safe across processes (unix)

#[cfg(unix)]
pub mod file;
pub mod memory;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Store-assigned revision of a value
///
/// Opaque to callers except for equality. Adapters guarantee that a key
/// never sees the same version twice, including across expiry and
/// re-creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    pub const fn new(value: u64) -> Self {
        Version(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: Version,
}

/// Key-addressed store with optimistic concurrency
pub trait VersionedStore: Send + Sync {
    /// Read the current value, `None` if the key does not exist
    fn get(&self, key: &str) -> Result<Option<Versioned<Vec<u8>>>>;

    /// Create `key`; a `ttl` of `None` never expires
    ///
    /// Fails with `KeyExists` if a live value is already stored.
    fn create(&self, key: &str, data: &[u8], ttl: Option<Duration>) -> Result<Version>;

    /// Replace the value if its current version equals `expected`
    ///
    /// Fails with `Conflict` on a version mismatch and `KeyNotFound` if the
    /// key is absent.
    fn compare_and_swap(&self, key: &str, data: &[u8], expected: Version) -> Result<Version>;
}
