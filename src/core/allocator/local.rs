//! In-process allocator without persistence
//!
//! Used for dry runs, repair passes that rebuild state before writing it
//! back with [`crate::persisted::PersistentAllocator::restore`], and tests.

use crate::allocator::bitmap::{AllocationBitmap, BitmapError};
use crate::allocator::AddressAllocator;
use crate::error::{AllocatorError, Result};
use crate::range::Range;
use crate::record::AllocationRecord;
use parking_lot::Mutex;
use std::net::IpAddr;

/// Label used in errors in place of a store key
const LOCAL_KEY: &str = "<local>";

/// Range allocator holding its bitmap in memory
#[derive(Debug)]
pub struct LocalAllocator {
    range: Range,
    bitmap: Mutex<AllocationBitmap>,
}

impl LocalAllocator {
    pub fn new(range: Range) -> Self {
        LocalAllocator {
            bitmap: Mutex::new(AllocationBitmap::new(range.capacity())),
            range,
        }
    }

    /// Rebuild an allocator from a persisted record
    pub fn from_record(range: Range, record: &AllocationRecord) -> Result<Self> {
        let bitmap = record.bitmap(&range, LOCAL_KEY)?;
        Ok(LocalAllocator {
            range,
            bitmap: Mutex::new(bitmap),
        })
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn used(&self) -> usize {
        self.bitmap.lock().used()
    }

    /// Visit allocated addresses in ascending order
    pub fn for_each<F: FnMut(IpAddr)>(&self, mut f: F) {
        let bitmap = self.bitmap.lock();
        for offset in bitmap.iter_allocated() {
            if let Some(address) = self.range.address_at(offset) {
                f(address);
            }
        }
    }

    pub fn snapshot(&self) -> AllocationRecord {
        AllocationRecord::from_bitmap(&self.range, &self.bitmap.lock())
    }

    /// Replace the allocation state with `record`
    pub fn restore(&self, record: &AllocationRecord) -> Result<()> {
        let bitmap = record.bitmap(&self.range, LOCAL_KEY)?;
        *self.bitmap.lock() = bitmap;
        Ok(())
    }
}

impl AddressAllocator for LocalAllocator {
    fn allocate(&self, address: IpAddr) -> Result<()> {
        let offset = self.range.offset_of(address)?;
        match self.bitmap.lock().allocate(offset) {
            Ok(()) => Ok(()),
            Err(BitmapError::AlreadySet(_)) => Err(AllocatorError::AlreadyAllocated {
                address,
                key: LOCAL_KEY.to_string(),
            }),
            Err(_) => Err(AllocatorError::NotInRange {
                address,
                range: self.range.to_string(),
            }),
        }
    }

    fn allocate_next(&self) -> Result<IpAddr> {
        let exhausted = || AllocatorError::Exhausted {
            range: self.range.to_string(),
            key: LOCAL_KEY.to_string(),
        };
        let offset = self.bitmap.lock().allocate_next().ok_or_else(exhausted)?;
        self.range.address_at(offset).ok_or_else(exhausted)
    }

    fn release(&self, address: IpAddr) -> Result<()> {
        if let Ok(offset) = self.range.offset_of(address) {
            self.bitmap.lock().release(offset);
        }
        Ok(())
    }

    fn has(&self, address: IpAddr) -> Result<bool> {
        let offset = self.range.offset_of(address)?;
        Ok(self.bitmap.lock().has(offset))
    }

    fn cidr(&self) -> String {
        self.range.to_string()
    }

    fn free(&self) -> Result<usize> {
        Ok(self.bitmap.lock().free_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn allocator(cidr: &str) -> LocalAllocator {
        LocalAllocator::new(Range::parse(cidr).unwrap())
    }

    #[test]
    fn test_allocate_and_has() {
        let alloc = allocator("192.168.1.0/24");

        alloc.allocate(ip("192.168.1.2")).unwrap();
        assert!(alloc.has(ip("192.168.1.2")).unwrap());
        assert!(!alloc.has(ip("192.168.1.3")).unwrap());
        assert_eq!(alloc.free().unwrap(), 253);

        assert!(matches!(
            alloc.allocate(ip("192.168.1.2")),
            Err(AllocatorError::AlreadyAllocated { .. })
        ));
    }

    #[test]
    fn test_not_in_range() {
        let alloc = allocator("192.168.1.0/24");
        assert!(matches!(
            alloc.allocate(ip("192.168.0.1")),
            Err(AllocatorError::NotInRange { .. })
        ));
        assert!(matches!(
            alloc.has(ip("192.168.1.255")),
            Err(AllocatorError::NotInRange { .. })
        ));
    }

    #[test]
    fn test_release_out_of_range_is_noop() {
        let alloc = allocator("192.168.1.0/24");
        alloc.release(ip("10.0.0.1")).unwrap();
        alloc.release(ip("192.168.1.9")).unwrap();
        assert_eq!(alloc.free().unwrap(), 254);
    }

    #[test]
    fn test_allocate_next_exhausts() {
        let alloc = allocator("10.0.0.0/29");

        let mut got = Vec::new();
        for _ in 0..6 {
            got.push(alloc.allocate_next().unwrap());
        }
        assert_eq!(got.first(), Some(&ip("10.0.0.1")));
        assert_eq!(got.last(), Some(&ip("10.0.0.6")));

        assert!(matches!(
            alloc.allocate_next(),
            Err(AllocatorError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_snapshot_restore() {
        let source = allocator("10.0.0.0/24");
        source.allocate(ip("10.0.0.10")).unwrap();
        source.allocate(ip("10.0.0.20")).unwrap();

        let target = allocator("10.0.0.0/24");
        target.restore(&source.snapshot()).unwrap();

        let mut seen = Vec::new();
        target.for_each(|a| seen.push(a));
        assert_eq!(seen, vec![ip("10.0.0.10"), ip("10.0.0.20")]);
        assert_eq!(target.used(), 2);
    }

    #[test]
    fn test_restore_rejects_other_range() {
        let source = allocator("10.0.0.0/24");
        let target = allocator("10.0.1.0/24");
        assert!(matches!(
            target.restore(&source.snapshot()),
            Err(AllocatorError::RangeMismatch { .. })
        ));
    }
}
