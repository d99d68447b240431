//! # ipalloc - CIDR address allocation with optimistic concurrency
//!
//! `ipalloc-rs` hands out unique addresses from a bounded CIDR range and keeps
//! the allocation state in a versioned key-value store, so allocator restarts
//! and any number of concurrent allocator instances never assign the same
//! address twice.
//!
//! - **Bitmap allocation**: one bit per address, lowest free address first
//! - **Versioned persistence**: read, mutate a private copy, compare-and-swap
//! - **Bounded retries** with jittered exponential backoff on version conflicts
//! - **Pluggable stores**: in-memory and directory-backed adapters included
//!
//! ## Quick Start
//!
//! ```rust
//! use ipalloc_rs::{AddressAllocator, AllocatorBuilder, MemoryStore, Result};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let store = Arc::new(MemoryStore::new());
//!
//! let alloc = AllocatorBuilder::new()
//!     .cidr("192.168.1.0/24")
//!     .key("/ranges/serviceips")
//!     .build(store)?;
//!
//! // Provisioning happens once, outside the allocator
//! alloc.records().seed()?;
//!
//! alloc.allocate("192.168.1.2".parse().unwrap())?;
//! let next = alloc.allocate_next()?;
//! assert_eq!(next.to_string(), "192.168.1.1");
//!
//! alloc.release(next)?;
//! assert_eq!(alloc.free()?, 253);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ PersistentAllocator (validate, retry loop)   │
//! ├──────────────────────────────────────────────┤
//! │ RecordStore (load + version, CAS save)       │
//! ├───────────────────────┬──────────────────────┤
//! │ Range (addr <-> off)  │ AllocationBitmap     │
//! ├───────────────────────┴──────────────────────┤
//! │ VersionedStore: MemoryStore | FileStore      │
//! └──────────────────────────────────────────────┘
//! ```

pub mod core;

pub use crate::core::{
    allocator, config, error, persisted, persistence, range, record, retry, store, validation,
};

pub use crate::core::{
    allocator::{bitmap::AllocationBitmap, local::LocalAllocator, AddressAllocator},
    config::AllocatorConfig,
    error::{AllocatorError, Result},
    persisted::{AllocatorStats, PersistentAllocator},
    persistence::{RecordStore, DEFAULT_KEY, DEFAULT_RESOURCE},
    range::Range,
    record::AllocationRecord,
    retry::RetryPolicy,
    store::{memory::MemoryStore, Version, Versioned, VersionedStore},
    validation::StoreKey,
};

#[cfg(unix)]
pub use crate::core::store::file::FileStore;

use std::sync::Arc;
use tracing::debug;

/// Builder for [`PersistentAllocator`]
///
/// ```rust
/// use ipalloc_rs::{AllocatorBuilder, MemoryStore};
/// use std::sync::Arc;
///
/// let alloc = AllocatorBuilder::new()
///     .cidr("fd00::/112")
///     .key("/ranges/serviceips-v6")
///     .max_attempts(20)
///     .build(Arc::new(MemoryStore::new()))
///     .unwrap();
/// assert_eq!(alloc.range().capacity(), 65535);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AllocatorBuilder {
    cidr: Option<String>,
    key: Option<String>,
    resource: Option<String>,
    retry: Option<RetryPolicy>,
}

impl AllocatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration
    pub fn from_config(config: AllocatorConfig) -> Self {
        AllocatorBuilder {
            cidr: Some(config.cidr),
            key: Some(config.key),
            resource: Some(config.resource),
            retry: Some(config.retry),
        }
    }

    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = Some(cidr.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Shorthand for adjusting only the attempt limit
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        let mut retry = self.retry.take().unwrap_or_default();
        retry.max_attempts = max_attempts;
        self.retry = Some(retry);
        self
    }

    /// Resolve into a validated configuration
    pub fn config(&self) -> Result<AllocatorConfig> {
        let cidr = self
            .cidr
            .clone()
            .ok_or_else(|| AllocatorError::InvalidConfig("cidr is required".to_string()))?;

        let mut config = AllocatorConfig::new(cidr);
        if let Some(key) = &self.key {
            config.key = key.clone();
        }
        if let Some(resource) = &self.resource {
            config.resource = resource.clone();
        }
        if let Some(retry) = &self.retry {
            config.retry = retry.clone();
        }

        config.check()?;
        Ok(config)
    }

    /// Build an allocator over `store`
    ///
    /// Does not touch the store; a missing record surfaces as
    /// `Uninitialized` on first use.
    pub fn build<S: VersionedStore + ?Sized>(
        self,
        store: Arc<S>,
    ) -> Result<PersistentAllocator<S>> {
        let config = self.config()?;
        let range = Range::parse(&config.cidr)?;
        let key = StoreKey::new(config.key)?;

        debug!(range = %range, key = %key, "building allocator");

        let records = RecordStore::new(store, key, range, config.resource)?;
        Ok(PersistentAllocator::new(records, config.retry))
    }
}
