//! Stream framing: an unframed byte pipe.
//!
//! Partial transfers are normal. One byte of the ring is always left free,
//! so a full stream ring holds `capacity - 1` bytes.

use crate::error::RingResult;
use crate::record::expect_mode;
use crate::ring::{ByteView, RingBuffer};
use ring_common::ring::RingMode;

const STREAM_RESERVE: usize = 1;

/// Stream-mode view of a ring.
pub struct StreamRing {
    ring: RingBuffer,
}

impl StreamRing {
    /// Wrap a stream-mode ring. Fails `ModeMismatch` for other modes.
    pub fn new(ring: RingBuffer) -> RingResult<Self> {
        expect_mode(&ring, RingMode::Stream)?;
        Ok(Self { ring })
    }

    /// Underlying ring
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Underlying ring, mutably
    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }

    /// Unwrap the ring
    pub fn into_inner(self) -> RingBuffer {
        self.ring
    }

    /// Bytes ready to read.
    #[inline]
    pub fn read_space(&self) -> usize {
        self.ring.available_to_read()
    }

    /// Bytes a write can accept right now.
    #[inline]
    pub fn write_space(&self) -> usize {
        self.ring.available_to_write().saturating_sub(STREAM_RESERVE)
    }

    /// Write as much of `bytes` as fits. Returns the count written; 0 means
    /// the ring is full.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        self.ring.write_reserving(bytes, STREAM_RESERVE)
    }

    /// Copy up to `out.len()` bytes into `out` and consume them.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        self.ring.with_reader_lock(|ring| {
            let n = ring.peek_raw().copy_to(out);
            match ring.advance(n) {
                Ok(()) => n,
                Err(_) => 0,
            }
        })
    }

    /// All readable bytes, without consuming them.
    pub fn peek(&self) -> ByteView<'_> {
        self.ring.peek_raw()
    }

    /// Consume `n` bytes.
    pub fn shift(&mut self, n: usize) -> RingResult<()> {
        self.ring.shift(n)
    }

    /// Discard everything unread. Returns the bytes dropped.
    pub fn flush(&mut self) -> usize {
        let n = self.read_space();
        match self.ring.shift(n) {
            Ok(()) => n,
            Err(_) => 0,
        }
    }
}
