//! Shared-memory segment layout.
//!
//! A ring segment is one file mapped by every party:
//!
//! ```text
//! ┌──────────────────────┬────────────────────────┬─────────────────────┐
//! │ RingHeader (384 B)   │ scratchpad (64-aligned)│ ring bytes          │
//! │ magic, descriptor,   │ out-of-band state,     │ `capacity` bytes,   │
//! │ head, tail, owners   │ convention-only sync   │ indexed pos % cap   │
//! └──────────────────────┴────────────────────────┴─────────────────────┘
//! ```
//!
//! `head` and `tail` are unwrapped monotonic byte counters, each on its own
//! cache line so the producer and the consumer never share one.

use ring_common::consts::{CACHE_LINE_SIZE, RING_MAGIC, RING_NAME_FIELD};
use static_assertions::const_assert_eq;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Value padded out to a full cache line.
#[repr(C, align(64))]
pub struct CachePadded<T>(pub T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Segment header, shared by every process mapping the ring.
///
/// Descriptor fields are plain integers written once by the creator before
/// `magic` is published; everything mutated afterwards is atomic.
#[repr(C, align(64))]
pub struct RingHeader {
    /// `RING_MAGIC` once the segment is fully initialised (stored last)
    pub magic: AtomicU64,
    /// `RING_LAYOUT_VERSION` of the creator
    pub layout_version: u32,
    /// `RingMode` raw value
    pub mode: u32,
    /// `RingFlags` bits
    pub flags: u32,
    /// `SaturationPolicy` kind
    pub policy: u32,
    /// Ring capacity in bytes
    pub capacity: u64,
    /// Scratchpad size in bytes (unrounded)
    pub scratchpad_size: u64,
    /// Creation time, ns since the Unix epoch
    pub created_ts: u64,
    /// Retry policy attempts
    pub retry_attempts: u32,
    /// Retry policy backoff in microseconds
    pub retry_backoff_us: u32,
    _reserved: [u8; 8],
    /// NUL-padded ring name
    pub name: [u8; RING_NAME_FIELD],
    /// Next write position (writer-owned)
    pub head: CachePadded<AtomicU64>,
    /// Next read position (reader-owned)
    pub tail: CachePadded<AtomicU64>,
    /// Advisory writer owner id, 0 when unclaimed
    pub writer_owner: AtomicU32,
    /// Advisory reader owner id, 0 when unclaimed
    pub reader_owner: AtomicU32,
    /// Number of counted handles mapping the segment
    pub attach_count: AtomicU32,
    /// Writer mutex word, holder pid or 0
    pub writer_lock: AtomicU32,
    /// Reader mutex word, holder pid or 0
    pub reader_lock: AtomicU32,
    _pad1: u32,
    /// Writes discarded by the drop-newest policy
    pub dropped: AtomicU64,
    _pad2: [u8; 32],
}

/// Size of the segment header in bytes.
pub const HEADER_SIZE: usize = std::mem::size_of::<RingHeader>();

const_assert_eq!(core::mem::size_of::<CachePadded<AtomicU64>>(), CACHE_LINE_SIZE);
const_assert_eq!(core::mem::size_of::<RingHeader>(), 384);
const_assert_eq!(core::mem::align_of::<RingHeader>(), CACHE_LINE_SIZE);
const_assert_eq!(core::mem::offset_of!(RingHeader, name), 64);
const_assert_eq!(core::mem::offset_of!(RingHeader, head), 192);
const_assert_eq!(core::mem::offset_of!(RingHeader, tail), 256);
const_assert_eq!(core::mem::offset_of!(RingHeader, writer_owner), 320);
const_assert_eq!(core::mem::offset_of!(RingHeader, dropped), 344);

impl RingHeader {
    /// True once the creator has published a complete header.
    #[inline]
    pub fn is_initialised(&self) -> bool {
        self.magic.load(Ordering::Acquire) == RING_MAGIC
    }

    /// Stored name up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..end]
    }
}

/// Byte offsets of the regions inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingOffsets {
    /// Start of the scratchpad
    pub scratchpad: usize,
    /// Scratchpad length as requested
    pub scratchpad_len: usize,
    /// Start of the ring bytes
    pub data: usize,
    /// Ring capacity
    pub capacity: usize,
}

impl RingOffsets {
    /// Compute the layout for a ring of `capacity` bytes.
    pub const fn new(capacity: usize, scratchpad_len: usize) -> Self {
        Self {
            scratchpad: HEADER_SIZE,
            scratchpad_len,
            data: HEADER_SIZE + align_up(scratchpad_len, CACHE_LINE_SIZE),
            capacity,
        }
    }

    /// Total segment length in bytes.
    #[inline]
    pub const fn segment_len(&self) -> usize {
        self.data + self.capacity
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_and_alignment() {
        assert_eq!(HEADER_SIZE, 384);
        assert_eq!(std::mem::align_of::<RingHeader>(), 64);
    }

    #[test]
    fn head_and_tail_on_separate_lines() {
        let head = std::mem::offset_of!(RingHeader, head);
        let tail = std::mem::offset_of!(RingHeader, tail);
        assert_eq!(head % CACHE_LINE_SIZE, 0);
        assert_eq!(tail % CACHE_LINE_SIZE, 0);
        assert_eq!(tail - head, CACHE_LINE_SIZE);
    }

    #[test]
    fn offsets_round_scratchpad() {
        let offsets = RingOffsets::new(4096, 0);
        assert_eq!(offsets.data, HEADER_SIZE);
        assert_eq!(offsets.segment_len(), HEADER_SIZE + 4096);

        let offsets = RingOffsets::new(4096, 100);
        assert_eq!(offsets.scratchpad, HEADER_SIZE);
        assert_eq!(offsets.data, HEADER_SIZE + 128);
        assert_eq!(offsets.data % CACHE_LINE_SIZE, 0);
    }

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(65, 64), 128);
    }
}
