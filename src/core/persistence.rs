//! Versioned persistence of allocation records
//!
//! [`RecordStore`] binds one range to one store key. It loads the record
//! together with the store version it was read at and writes changes back
//! with a compare-and-swap on that version. It never retries; the caller
//! owns the retry loop.

use crate::allocator::bitmap::AllocationBitmap;
use crate::error::{AllocatorError, Result};
use crate::range::Range;
use crate::record::AllocationRecord;
use crate::store::{Version, VersionedStore};
use crate::validation::{validate_resource, StoreKey};
use std::sync::Arc;
use tracing::{debug, info};

/// Default store key for service address ranges
pub const DEFAULT_KEY: &str = "/ranges/serviceips";

/// Default resource name reported when the record is missing
pub const DEFAULT_RESOURCE: &str = "serviceipallocations";

/// Load/save access to the allocation record of a single range
pub struct RecordStore<S: VersionedStore + ?Sized> {
    store: Arc<S>,
    key: StoreKey,
    range: Range,
    resource: String,
}

impl<S: VersionedStore + ?Sized> RecordStore<S> {
    pub fn new(
        store: Arc<S>,
        key: StoreKey,
        range: Range,
        resource: impl Into<String>,
    ) -> Result<Self> {
        let resource = resource.into();
        validate_resource(&resource)?;
        Ok(RecordStore {
            store,
            key,
            range,
            resource,
        })
    }

    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read the current record and its version
    ///
    /// # Errors
    ///
    /// `Uninitialized` if nobody seeded the key yet, `RangeMismatch` if the
    /// record belongs to another CIDR, `CorruptRecord` if it does not parse.
    pub fn load(&self) -> Result<(AllocationRecord, Version)> {
        let current = self
            .store
            .get(self.key())?
            .ok_or_else(|| AllocatorError::Uninitialized {
                resource: self.resource.clone(),
                key: self.key().to_string(),
            })?;

        let record = AllocationRecord::from_bytes(self.key(), &current.value)?;
        record.check_range(&self.range, self.key())?;

        debug!(key = %self.key, version = %current.version, "loaded allocation record");
        Ok((record, current.version))
    }

    /// Read and decode the current bitmap
    pub fn load_bitmap(&self) -> Result<(AllocationBitmap, Version)> {
        let (record, version) = self.load()?;
        let bitmap = record.bitmap(&self.range, self.key())?;
        Ok((bitmap, version))
    }

    /// Write `record` if the stored version is still `expected`
    ///
    /// # Errors
    ///
    /// `Conflict` if another writer got there first; the whole
    /// read-modify-write cycle has to be redone. `Uninitialized` if the
    /// record expired or was deleted since it was loaded.
    pub fn save(&self, record: &AllocationRecord, expected: Version) -> Result<Version> {
        record.check_range(&self.range, self.key())?;

        let bytes = record.to_bytes()?;
        let version = self
            .store
            .compare_and_swap(self.key(), &bytes, expected)
            .map_err(|e| match e {
                AllocatorError::KeyNotFound(_) => AllocatorError::Uninitialized {
                    resource: self.resource.clone(),
                    key: self.key().to_string(),
                },
                other => other,
            })?;

        debug!(
            key = %self.key,
            expected = %expected,
            version = %version,
            "saved allocation record"
        );
        Ok(version)
    }

    pub fn save_bitmap(&self, bitmap: &AllocationBitmap, expected: Version) -> Result<Version> {
        self.save(&AllocationRecord::from_bitmap(&self.range, bitmap), expected)
    }

    /// Create the key with an all-free record
    ///
    /// Provisioning step run by whoever owns the range (bootstrap job, CLI),
    /// never by the allocator itself. Fails with `KeyExists` if the key is
    /// already seeded.
    pub fn seed(&self) -> Result<Version> {
        let record = AllocationRecord::empty(&self.range);
        let version = self.store.create(self.key(), &record.to_bytes()?, None)?;

        info!(key = %self.key, range = %self.range, version = %version, "seeded allocation record");
        Ok(version)
    }
}
