//! Allocation bitmap for range offsets
//!
//! One bit per offset, packed into 64-bit words. The persisted form is a
//! byte array where bit `i` lives in byte `i / 8` at position `i % 8`.

use crate::error::{AllocatorError, Result};
use thiserror::Error;

/// Per-offset allocation state
///
/// Represents free/allocated state with bits:
/// - 0 = free offset
/// - 1 = allocated offset
///
/// Not synchronized. Each transaction works on its own decoded copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationBitmap {
    /// Bitmap words (each word = 64 offsets)
    words: Vec<u64>,

    /// Total number of offsets tracked
    capacity: usize,

    /// Number of free offsets available
    free: usize,
}

/// Outcome of a bit mutation that may be a no-op
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitChange {
    Changed,
    Unchanged,
}

impl AllocationBitmap {
    /// Create an all-free bitmap
    pub fn new(capacity: usize) -> Self {
        let num_words = (capacity + 63) / 64;
        AllocationBitmap {
            words: vec![0u64; num_words],
            capacity,
            free: capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn used(&self) -> usize {
        self.capacity - self.free
    }

    /// Check if a specific offset is allocated
    pub fn has(&self, offset: usize) -> bool {
        if offset >= self.capacity {
            return false;
        }
        let (word_idx, bit_idx) = split(offset);
        (self.words[word_idx] & (1u64 << bit_idx)) != 0
    }

    /// Mark `offset` as allocated
    ///
    /// # Errors
    ///
    /// `AlreadySet` if the offset is taken, `OutOfBounds` past the end.
    pub fn allocate(&mut self, offset: usize) -> std::result::Result<(), BitmapError> {
        if offset >= self.capacity {
            return Err(BitmapError::OutOfBounds(offset));
        }

        let (word_idx, bit_idx) = split(offset);
        let mask = 1u64 << bit_idx;
        if self.words[word_idx] & mask != 0 {
            return Err(BitmapError::AlreadySet(offset));
        }

        self.words[word_idx] |= mask;
        self.free -= 1;
        Ok(())
    }

    /// Clear `offset`; releasing a free or out-of-bounds offset is a no-op
    pub fn release(&mut self, offset: usize) -> BitChange {
        if offset >= self.capacity {
            return BitChange::Unchanged;
        }

        let (word_idx, bit_idx) = split(offset);
        let mask = 1u64 << bit_idx;
        if self.words[word_idx] & mask == 0 {
            return BitChange::Unchanged;
        }

        self.words[word_idx] &= !mask;
        self.free += 1;
        BitChange::Changed
    }

    /// Allocate the lowest-numbered free offset
    pub fn allocate_next(&mut self) -> Option<usize> {
        if self.free == 0 {
            return None;
        }

        for (word_idx, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue; // All bits set (all allocated)
            }

            let bit_idx = (!*word).trailing_zeros() as usize;
            let offset = word_idx * 64 + bit_idx;
            if offset >= self.capacity {
                // Only padding bits remain in the last word
                break;
            }

            *word |= 1u64 << bit_idx;
            self.free -= 1;
            return Some(offset);
        }

        None
    }

    /// Allocated offsets in ascending order
    pub fn iter_allocated(&self) -> impl Iterator<Item = usize> + '_ {
        let capacity = self.capacity;
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_idx, &word)| {
                let mut remaining = word;
                std::iter::from_fn(move || {
                    if remaining == 0 {
                        return None;
                    }
                    let bit_idx = remaining.trailing_zeros() as usize;
                    remaining &= remaining - 1;
                    Some(word_idx * 64 + bit_idx)
                })
            })
            .take_while(move |&offset| offset < capacity)
    }

    /// Encode to the persisted byte layout (`ceil(capacity / 8)` bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = byte_len(self.capacity);
        let mut bytes = Vec::with_capacity(len);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(len);
        bytes
    }

    /// Decode the persisted byte layout
    ///
    /// An empty payload means "nothing allocated yet". Bits past `capacity`
    /// are ignored, extra trailing bytes are tolerated.
    pub fn from_bytes(capacity: usize, bytes: &[u8]) -> std::result::Result<Self, BitmapError> {
        let mut bitmap = AllocationBitmap::new(capacity);
        if bytes.is_empty() {
            return Ok(bitmap);
        }

        let needed = byte_len(capacity);
        if bytes.len() < needed {
            return Err(BitmapError::ShortPayload {
                needed,
                found: bytes.len(),
            });
        }

        for (word_idx, word) in bitmap.words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            let start = word_idx * 8;
            let end = (start + 8).min(needed);
            buf[..end - start].copy_from_slice(&bytes[start..end]);
            *word = u64::from_le_bytes(buf);
        }

        // Drop trailing bits beyond capacity
        let tail = capacity % 64;
        if tail != 0 {
            if let Some(last) = bitmap.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }

        let used: usize = bitmap.words.iter().map(|w| w.count_ones() as usize).sum();
        bitmap.free = capacity - used;
        Ok(bitmap)
    }
}

/// Low-level bitmap failures, mapped to `AllocatorError` by callers that
/// know the address and record key involved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitmapError {
    #[error("offset {0} out of bounds")]
    OutOfBounds(usize),

    #[error("offset {0} already set")]
    AlreadySet(usize),

    #[error("bitmap payload too short: need {needed} bytes, found {found}")]
    ShortPayload { needed: usize, found: usize },
}

impl BitmapError {
    /// Attach record context to a decode failure
    pub fn into_corrupt(self, key: &str) -> AllocatorError {
        AllocatorError::CorruptRecord {
            key: key.to_string(),
            reason: self.to_string(),
        }
    }
}

pub(crate) fn decode(capacity: usize, bytes: &[u8], key: &str) -> Result<AllocationBitmap> {
    AllocationBitmap::from_bytes(capacity, bytes).map_err(|e| e.into_corrupt(key))
}

fn split(offset: usize) -> (usize, usize) {
    (offset / 64, offset % 64)
}

fn byte_len(capacity: usize) -> usize {
    (capacity + 7) / 8
}
