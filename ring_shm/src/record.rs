//! Record framing: discrete length-prefixed messages.
//!
//! Each record is one `Data` frame. A record never straddles the physical
//! end of the ring; if it does not fit before the wrap point, a `Pad`
//! frame fills the gap and the record starts at offset 0.

use crate::error::{RingError, RingResult};
use crate::frame::{FRAME_HEADER_SIZE, FrameFlags, FrameHeader, FrameKind, frame_size, pad_before};
use crate::ring::RingBuffer;
use ring_common::ring::RingMode;
use std::sync::atomic::Ordering;

/// Fail with `ModeMismatch` unless `ring` is in `expected` mode.
pub(crate) fn expect_mode(ring: &RingBuffer, expected: RingMode) -> RingResult<()> {
    if ring.mode() != expected {
        return Err(RingError::ModeMismatch {
            name: ring.name().to_string(),
            expected,
            actual: ring.mode(),
        });
    }
    Ok(())
}

/// Record-mode view of a ring.
pub struct RecordRing {
    ring: RingBuffer,
}

impl RecordRing {
    /// Wrap a record-mode ring. Fails `ModeMismatch` for other modes.
    pub fn new(ring: RingBuffer) -> RingResult<Self> {
        expect_mode(&ring, RingMode::Record)?;
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

    /// Largest payload this ring can ever hold.
    pub fn max_record_size(&self) -> usize {
        self.ring.capacity() - FRAME_HEADER_SIZE
    }

    /// Append one record.
    ///
    /// `RecordTooLarge` is permanent and leaves the ring untouched.
    /// `RingFull` is transient; if the record needed a pad that fits on its
    /// own, the pad is published anyway so the ring can realign to offset 0
    /// once the reader catches up.
    pub fn write_record(&mut self, payload: &[u8]) -> RingResult<()> {
        let capacity = self.ring.capacity();
        let frame = frame_size(payload.len());
        if frame > capacity {
            return Err(RingError::RecordTooLarge {
                size: frame,
                max: capacity,
            });
        }

        self.ring.with_writer_lock(|ring| {
            let head = ring.header().head.load(Ordering::Relaxed);
            let free = ring.available_to_write();
            let pad = pad_before(head, capacity, frame);

            if pad + frame > free {
                if pad > 0 && pad <= free {
                    ring.put_frame(head, FrameHeader::pad(pad), &[]);
                    ring.publish(head + pad as u64);
                }
                return Err(RingError::RingFull {
                    needed: pad + frame,
                    available: free,
                });
            }

            let mut pos = head;
            if pad > 0 {
                pos = ring.put_frame(pos, FrameHeader::pad(pad), &[]);
            }
            let header = FrameHeader::data(payload.len() as u32, FrameFlags::empty());
            let end = ring.put_frame(pos, header, payload);
            ring.publish(end);
            Ok(())
        })
    }

    /// Oldest unread record, without consuming it. Pads are skipped.
    pub fn read_record(&self) -> Option<&[u8]> {
        self.front().map(|(payload, _)| payload)
    }

    /// Oldest unread record and the ring bytes its frame occupies.
    pub(crate) fn front(&self) -> Option<(&[u8], usize)> {
        let (tail, head) = self.ring.skip_tail_pads();
        let frame = self.ring.frame_at(tail, head)?;
        match frame.kind {
            FrameKind::Data => Some((self.ring.payload_at(tail, frame.len as usize), frame.span())),
            _ => None,
        }
    }

    /// Payload length of the oldest unread record.
    pub fn next_size(&self) -> Option<usize> {
        let (tail, head) = self.ring.skip_tail_pads();
        self.ring
            .frame_at(tail, head)
            .filter(|f| f.kind == FrameKind::Data)
            .map(|f| f.len as usize)
    }

    /// Lazy iterator over the unread records, oldest first.
    ///
    /// Nothing is consumed; calling again restarts from the oldest record.
    /// Records published after the call are not included.
    pub fn records(&self) -> Records<'_> {
        let (tail, head) = self.ring.skip_tail_pads();
        Records {
            ring: &self.ring,
            pos: tail,
            head,
        }
    }

    /// Consume exactly the oldest record, whose framed span must be `span`.
    ///
    /// Fails `FrameBoundary`, leaving `tail` alone, for any other span. A
    /// zero span is a no-op.
    pub(crate) fn shift_exact(&mut self, span: usize) -> RingResult<()> {
        if span == 0 {
            return Ok(());
        }
        self.ring.with_reader_lock(|ring| {
            let (tail, head) = ring.skip_tail_pads();
            match ring.frame_at(tail, head).map(|f| f.span()) {
                Some(expected) if expected == span => ring.advance(span),
                front => Err(RingError::FrameBoundary {
                    requested: span,
                    expected: front.unwrap_or(0),
                }),
            }
        })
    }

    /// Consume the oldest record. Returns false if there was none.
    pub fn shift_record(&mut self) -> bool {
        self.ring.with_reader_lock(|ring| {
            let (tail, head) = ring.skip_tail_pads();
            match ring.frame_at(tail, head) {
                Some(frame) => ring.advance(frame.span()).is_ok(),
                None => false,
            }
        })
    }

    /// Copy the oldest record into `out` and consume it.
    ///
    /// Returns false, leaving `out` untouched, if there was none.
    pub fn take_record(&mut self, out: &mut Vec<u8>) -> bool {
        self.ring.with_reader_lock(|ring| {
            let (tail, head) = ring.skip_tail_pads();
            let Some(frame) = ring.frame_at(tail, head) else {
                return false;
            };
            out.clear();
            out.extend_from_slice(ring.payload_at(tail, frame.len as usize));
            ring.advance(frame.span()).is_ok()
        })
    }

    /// Discard everything unread. Returns the bytes dropped.
    pub fn flush(&mut self) -> usize {
        self.ring.with_reader_lock(|ring| {
            let n = ring.available_to_read();
            match ring.advance(n) {
                Ok(()) => n,
                Err(_) => 0,
            }
        })
    }
}

/// Iterator returned by [`RecordRing::records`].
pub struct Records<'a> {
    ring: &'a RingBuffer,
    pos: u64,
    head: u64,
}

impl<'a> Iterator for Records<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        loop {
            let frame = self.ring.frame_at(self.pos, self.head)?;
            let at = self.pos;
            self.pos += frame.span() as u64;
            match frame.kind {
                FrameKind::Pad => continue,
                FrameKind::Data => return Some(self.ring.payload_at(at, frame.len as usize)),
                FrameKind::Commit => {
                    self.pos = self.head;
                    return None;
                }
            }
        }
    }
}
