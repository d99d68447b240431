//! Persisted allocation record
//!
//! Stored as JSON: `{"range": "192.168.1.0/24", "data": "<hex bitmap>"}`.
//! A record with an empty `data` field is a freshly seeded range.

use crate::allocator::bitmap::{self, AllocationBitmap};
use crate::error::{AllocatorError, Result};
use crate::range::Range;
use serde::{Deserialize, Serialize};

/// Snapshot of a range's allocation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// Canonical CIDR of the range this record was seeded for
    pub range: String,

    /// Byte-packed bitmap, bit `i` = offset `i`
    #[serde(with = "hex", default)]
    pub data: Vec<u8>,
}

impl AllocationRecord {
    /// All-free record for `range`
    pub fn empty(range: &Range) -> Self {
        Self::from_bitmap(range, &AllocationBitmap::new(range.capacity()))
    }

    pub fn from_bitmap(range: &Range, bitmap: &AllocationBitmap) -> Self {
        AllocationRecord {
            range: range.to_string(),
            data: bitmap.to_bytes(),
        }
    }

    /// Decode the bitmap after checking the record belongs to `range`
    ///
    /// # Errors
    ///
    /// `RangeMismatch` if the record was seeded for another CIDR,
    /// `CorruptRecord` if the payload is too short.
    pub fn bitmap(&self, range: &Range, key: &str) -> Result<AllocationBitmap> {
        self.check_range(range, key)?;
        bitmap::decode(range.capacity(), &self.data, key)
    }

    pub fn check_range(&self, range: &Range, key: &str) -> Result<()> {
        let expected = range.to_string();
        if self.range != expected {
            return Err(AllocatorError::RangeMismatch {
                key: key.to_string(),
                expected,
                found: self.range.clone(),
            });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse stored bytes, reporting malformed documents against `key`
    pub fn from_bytes(key: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| AllocatorError::CorruptRecord {
            key: key.to_string(),
            reason: format!("undecodable record: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "/ranges/serviceips";

    #[test]
    fn test_empty_record_json() {
        let range = Range::parse("192.168.1.0/28").unwrap();
        let record = AllocationRecord::empty(&range);

        let json = String::from_utf8(record.to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"range":"192.168.1.0/28","data":"0000"}"#);
    }

    #[test]
    fn test_missing_data_field_is_empty_bitmap() {
        let range = Range::parse("192.168.1.0/24").unwrap();
        let record = AllocationRecord::from_bytes(KEY, br#"{"range":"192.168.1.0/24"}"#).unwrap();
        assert!(record.data.is_empty());

        let bitmap = record.bitmap(&range, KEY).unwrap();
        assert_eq!(bitmap.free_count(), 254);
    }

    #[test]
    fn test_bitmap_survives_record() {
        let range = Range::parse("10.0.0.0/24").unwrap();
        let mut bitmap = AllocationBitmap::new(range.capacity());
        bitmap.allocate(1).unwrap();
        bitmap.allocate(200).unwrap();

        let record = AllocationRecord::from_bitmap(&range, &bitmap);
        let bytes = record.to_bytes().unwrap();
        let decoded = AllocationRecord::from_bytes(KEY, &bytes)
            .unwrap()
            .bitmap(&range, KEY)
            .unwrap();

        assert_eq!(decoded, bitmap);
    }

    #[test]
    fn test_range_mismatch() {
        let seeded = Range::parse("10.0.0.0/24").unwrap();
        let configured = Range::parse("10.0.1.0/24").unwrap();
        let record = AllocationRecord::empty(&seeded);

        match record.bitmap(&configured, KEY) {
            Err(AllocatorError::RangeMismatch { expected, found, .. }) => {
                assert_eq!(expected, "10.0.1.0/24");
                assert_eq!(found, "10.0.0.0/24");
            }
            other => panic!("expected RangeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let result = AllocationRecord::from_bytes(KEY, b"\x00\x01not json");
        assert!(matches!(result, Err(AllocatorError::CorruptRecord { .. })));

        let result = AllocationRecord::from_bytes(KEY, br#"{"range":"10.0.0.0/24","data":"zz"}"#);
        assert!(matches!(result, Err(AllocatorError::CorruptRecord { .. })));
    }

    #[test]
    fn test_short_payload_is_corrupt() {
        let range = Range::parse("10.0.0.0/24").unwrap();
        let record = AllocationRecord {
            range: range.to_string(),
            data: vec![0xFF; 3],
        };
        assert!(matches!(
            record.bitmap(&range, KEY),
            Err(AllocatorError::CorruptRecord { .. })
        ));
    }
}
