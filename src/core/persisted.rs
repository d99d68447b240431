//! Store-backed allocator
//!
//! Every mutating call runs a full read-modify-write cycle against the
//! store: load the record and its version, decode a private bitmap copy,
//! apply the change, then compare-and-swap on the loaded version. A version
//! conflict throws the copy away and starts over from a fresh read, up to
//! the retry policy's attempt limit. Nothing is cached between calls, so
//! any number of allocators in any number of processes can share a key.
//!
//! ```text
//! validate -> load -> mutate -> save --ok--------> committed
//!               ^                 |
//!               +----conflict-----+--limit hit--> Contention
//! ```

use crate::allocator::bitmap::{AllocationBitmap, BitChange, BitmapError};
use crate::allocator::AddressAllocator;
use crate::error::{AllocatorError, Result};
use crate::persistence::RecordStore;
use crate::range::Range;
use crate::record::AllocationRecord;
use crate::retry::RetryPolicy;
use crate::store::VersionedStore;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for store transactions issued by one allocator
#[derive(Debug, Default)]
pub struct AllocatorStats {
    attempts: AtomicU64,
    conflicts: AtomicU64,
    commits: AtomicU64,
}

impl AllocatorStats {
    /// Read-modify-write cycles started
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Cycles that lost a compare-and-swap race
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Cycles that wrote a new record
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }
}

/// What a mutation decided to do with its bitmap copy
enum Step<T> {
    /// Persist the modified bitmap, then return the value
    Commit(T),
    /// Nothing changed; return without writing
    Done(T),
}

/// Allocator whose state lives in a [`VersionedStore`]
pub struct PersistentAllocator<S: VersionedStore + ?Sized> {
    records: RecordStore<S>,
    retry: RetryPolicy,
    stats: AllocatorStats,
}

impl<S: VersionedStore + ?Sized> PersistentAllocator<S> {
    pub fn new(records: RecordStore<S>, retry: RetryPolicy) -> Self {
        PersistentAllocator {
            records,
            retry,
            stats: AllocatorStats::default(),
        }
    }

    pub fn range(&self) -> &Range {
        self.records.range()
    }

    pub fn key(&self) -> &str {
        self.records.key()
    }

    pub fn records(&self) -> &RecordStore<S> {
        &self.records
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn stats(&self) -> &AllocatorStats {
        &self.stats
    }

    /// Store handle, for provisioning alongside the allocator
    pub fn store(&self) -> &Arc<S> {
        self.records.store()
    }

    /// Number of allocated addresses
    pub fn used(&self) -> Result<usize> {
        let (bitmap, _) = self.records.load_bitmap()?;
        Ok(bitmap.used())
    }

    /// Visit allocated addresses in ascending order
    pub fn for_each<F: FnMut(IpAddr)>(&self, mut f: F) -> Result<()> {
        let (bitmap, _) = self.records.load_bitmap()?;
        for offset in bitmap.iter_allocated() {
            if let Some(address) = self.range().address_at(offset) {
                f(address);
            }
        }
        Ok(())
    }

    /// Current persisted record
    pub fn snapshot(&self) -> Result<AllocationRecord> {
        let (record, _) = self.records.load()?;
        Ok(record)
    }

    /// Overwrite the persisted allocation state with `record`
    ///
    /// Used by repair passes that rebuild the bitmap from the objects that
    /// actually hold addresses.
    pub fn restore(&self, record: &AllocationRecord) -> Result<()> {
        let restored = record.bitmap(self.range(), self.key())?;
        self.transact("restore", |bitmap| {
            if *bitmap == restored {
                return Ok(Step::Done(()));
            }
            *bitmap = restored.clone();
            Ok(Step::Commit(()))
        })?;

        info!(key = %self.key(), used = restored.used(), "restored allocation record");
        Ok(())
    }

    /// Run one logical operation as a bounded series of read-modify-write
    /// cycles
    fn transact<T, F>(&self, op: &'static str, mut mutate: F) -> Result<T>
    where
        F: FnMut(&mut AllocationBitmap) -> Result<Step<T>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.backoff();

        for attempt in 1..=max_attempts {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            let (mut bitmap, version) = self.records.load_bitmap()?;
            let value = match mutate(&mut bitmap)? {
                Step::Done(value) => return Ok(value),
                Step::Commit(value) => value,
            };

            match self.records.save_bitmap(&bitmap, version) {
                Ok(committed) => {
                    self.stats.commits.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        op,
                        key = %self.key(),
                        attempt,
                        version = %committed,
                        "committed allocation change"
                    );
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                    debug!(op, key = %self.key(), attempt, error = %e, "lost write race, retrying");
                    if attempt < max_attempts {
                        backoff.wait();
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            op,
            key = %self.key(),
            attempts = max_attempts,
            "giving up after repeated version conflicts"
        );
        Err(AllocatorError::Contention {
            key: self.key().to_string(),
            attempts: max_attempts,
        })
    }
}

impl<S: VersionedStore + ?Sized> AddressAllocator for PersistentAllocator<S> {
    fn allocate(&self, address: IpAddr) -> Result<()> {
        let offset = self.range().offset_of(address)?;

        self.transact("allocate", |bitmap| match bitmap.allocate(offset) {
            Ok(()) => Ok(Step::Commit(())),
            Err(BitmapError::AlreadySet(_)) => Err(AllocatorError::AlreadyAllocated {
                address,
                key: self.key().to_string(),
            }),
            Err(e) => Err(e.into_corrupt(self.key())),
        })
    }

    fn allocate_next(&self) -> Result<IpAddr> {
        let range = *self.range();
        let exhausted = || AllocatorError::Exhausted {
            range: range.to_string(),
            key: self.key().to_string(),
        };

        self.transact("allocate_next", |bitmap| {
            let offset = bitmap.allocate_next().ok_or_else(exhausted)?;
            let address = range.address_at(offset).ok_or_else(exhausted)?;
            Ok(Step::Commit(address))
        })
    }

    fn release(&self, address: IpAddr) -> Result<()> {
        let offset = match self.range().offset_of(address) {
            Ok(offset) => offset,
            Err(_) => {
                debug!(key = %self.key(), %address, "release outside range ignored");
                return Ok(());
            }
        };

        self.transact("release", |bitmap| match bitmap.release(offset) {
            BitChange::Changed => Ok(Step::Commit(())),
            BitChange::Unchanged => Ok(Step::Done(())),
        })
    }

    fn has(&self, address: IpAddr) -> Result<bool> {
        let offset = self.range().offset_of(address)?;
        let (bitmap, _) = self.records.load_bitmap()?;
        Ok(bitmap.has(offset))
    }

    fn cidr(&self) -> String {
        self.range().to_string()
    }

    fn free(&self) -> Result<usize> {
        let (bitmap, _) = self.records.load_bitmap()?;
        Ok(bitmap.free_count())
    }
}
