//! One capability interface over the three framing disciplines.
//!
//! The mode is read from the ring descriptor once, when a [`FramedRing`] is
//! built; every later call dispatches on the enum variant.

use crate::error::{RingError, RingResult};
use crate::multiframe::{FrameGroup, MultiframeRing};
use crate::record::RecordRing;
use crate::ring::{ByteView, RingBuffer};
use crate::stream::StreamRing;
use ring_common::ring::{RingMode, SaturationPolicy};
use std::time::Duration;

/// Unit of data returned by [`RingChannel::read`].
pub enum Chunk<'a> {
    /// One record
    Record {
        /// Record payload
        payload: &'a [u8],
        /// Ring bytes the framed record occupies
        span: usize,
    },
    /// All readable stream bytes
    Bytes(ByteView<'a>),
    /// One complete multiframe group
    Group(FrameGroup<'a>),
}

impl Chunk<'_> {
    /// Bytes to pass to [`RingChannel::shift`] to consume this chunk.
    pub fn span(&self) -> usize {
        match self {
            Self::Record { span, .. } => *span,
            Self::Bytes(view) => view.len(),
            Self::Group(group) => group.span(),
        }
    }
}

/// Readable and writable byte counts as seen by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    /// Bytes waiting to be read
    pub readable: usize,
    /// Bytes a write can use
    pub writable: usize,
}

/// Operations every framing discipline supports.
///
/// | Operation | Record | Stream | Multiframe |
/// |-----------|--------|--------|------------|
/// | `write` | one record | as many bytes as fit | one single-frame group |
/// | `read` | oldest record | all readable bytes | oldest group |
/// | `shift` | framed span | byte count | group span |
///
/// None of these block or allocate.
pub trait RingChannel {
    /// Framing discipline
    fn mode(&self) -> RingMode;

    /// Write `bytes`. Returns the payload bytes accepted.
    ///
    /// Record and multiframe writes are all or nothing; a stream write may
    /// accept fewer bytes, and 0 means full.
    fn write(&mut self, bytes: &[u8]) -> RingResult<usize>;

    /// Oldest readable chunk, without consuming it.
    fn read(&self) -> Option<Chunk<'_>>;

    /// Consume `span` bytes, normally [`Chunk::span`] of the last read.
    ///
    /// Record and multiframe rings take only the span of the oldest chunk
    /// and fail `FrameBoundary` otherwise, so `tail` never lands mid-frame.
    fn shift(&mut self, span: usize) -> RingResult<()>;

    /// Current availability.
    fn available(&self) -> Availability;
}

impl RingChannel for RecordRing {
    fn mode(&self) -> RingMode {
        RingMode::Record
    }

    fn write(&mut self, bytes: &[u8]) -> RingResult<usize> {
        self.write_record(bytes).map(|()| bytes.len())
    }

    fn read(&self) -> Option<Chunk<'_>> {
        self.front()
            .map(|(payload, span)| Chunk::Record { payload, span })
    }

    fn shift(&mut self, span: usize) -> RingResult<()> {
        self.shift_exact(span)
    }

    fn available(&self) -> Availability {
        Availability {
            readable: self.ring().available_to_read(),
            writable: self.ring().available_to_write(),
        }
    }
}

impl RingChannel for StreamRing {
    fn mode(&self) -> RingMode {
        RingMode::Stream
    }

    fn write(&mut self, bytes: &[u8]) -> RingResult<usize> {
        Ok(StreamRing::write(self, bytes))
    }

    fn read(&self) -> Option<Chunk<'_>> {
        let view = self.peek();
        (!view.is_empty()).then_some(Chunk::Bytes(view))
    }

    fn shift(&mut self, span: usize) -> RingResult<()> {
        StreamRing::shift(self, span)
    }

    fn available(&self) -> Availability {
        Availability {
            readable: self.read_space(),
            writable: self.write_space(),
        }
    }
}

impl RingChannel for MultiframeRing {
    fn mode(&self) -> RingMode {
        RingMode::Multiframe
    }

    fn write(&mut self, bytes: &[u8]) -> RingResult<usize> {
        self.begin_group();
        let result = self.write_frame(bytes, false).and_then(|()| self.flush());
        if result.is_err() {
            self.discard_group();
        }
        result.map(|()| bytes.len())
    }

    fn read(&self) -> Option<Chunk<'_>> {
        MultiframeRing::read(self).map(Chunk::Group)
    }

    fn shift(&mut self, span: usize) -> RingResult<()> {
        self.shift_exact(span)
    }

    fn available(&self) -> Availability {
        Availability {
            readable: self.ring().available_to_read(),
            writable: self.ring().available_to_write(),
        }
    }
}

/// Outcome of [`FramedRing::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Bytes accepted by the ring
    Written(usize),
    /// Discarded under the drop-newest policy
    Dropped,
}

/// A ring wrapped in the layer matching its mode.
pub enum FramedRing {
    /// Record mode
    Record(RecordRing),
    /// Stream mode
    Stream(StreamRing),
    /// Multiframe mode
    Multiframe(MultiframeRing),
}

impl FramedRing {
    /// Wrap `ring` in the layer its descriptor names.
    pub fn from_ring(ring: RingBuffer) -> RingResult<Self> {
        Ok(match ring.mode() {
            RingMode::Record => Self::Record(RecordRing::new(ring)?),
            RingMode::Stream => Self::Stream(StreamRing::new(ring)?),
            RingMode::Multiframe => Self::Multiframe(MultiframeRing::new(ring)?),
        })
    }

    /// Underlying ring
    pub fn ring(&self) -> &RingBuffer {
        match self {
            Self::Record(r) => r.ring(),
            Self::Stream(r) => r.ring(),
            Self::Multiframe(r) => r.ring(),
        }
    }

    /// Underlying ring, mutably, for ownership claims
    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        match self {
            Self::Record(r) => r.ring_mut(),
            Self::Stream(r) => r.ring_mut(),
            Self::Multiframe(r) => r.ring_mut(),
        }
    }

    /// Unwrap the ring
    pub fn into_inner(self) -> RingBuffer {
        match self {
            Self::Record(r) => r.into_inner(),
            Self::Stream(r) => r.into_inner(),
            Self::Multiframe(r) => r.into_inner(),
        }
    }

    fn channel(&self) -> &dyn RingChannel {
        match self {
            Self::Record(r) => r,
            Self::Stream(r) => r,
            Self::Multiframe(r) => r,
        }
    }

    fn channel_mut(&mut self) -> &mut dyn RingChannel {
        match self {
            Self::Record(r) => r,
            Self::Stream(r) => r,
            Self::Multiframe(r) => r,
        }
    }

    /// Saturation policy stored in the ring descriptor.
    pub fn policy(&self) -> SaturationPolicy {
        self.ring().descriptor().policy
    }

    /// Write `bytes`, applying the ring's saturation policy when it is full.
    ///
    /// `Reject` returns `RingFull`. `DropNewest` discards the write and
    /// counts it in the ring header. `Retry` sleeps and tries again, so it
    /// blocks and must not be used on the real-time side. Permanent errors
    /// are returned under every policy.
    pub fn deliver(&mut self, bytes: &[u8]) -> RingResult<Delivery> {
        let policy = self.policy();
        let mut retries_left = match policy {
            SaturationPolicy::Retry { attempts, .. } => attempts,
            _ => 0,
        };

        loop {
            let full = match self.write(bytes) {
                Ok(0) if !bytes.is_empty() => RingError::RingFull {
                    needed: bytes.len(),
                    available: 0,
                },
                Ok(n) => return Ok(Delivery::Written(n)),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            match policy {
                SaturationPolicy::Reject => return Err(full),
                SaturationPolicy::DropNewest => {
                    self.ring().note_drop();
                    return Ok(Delivery::Dropped);
                }
                SaturationPolicy::Retry { backoff_us, .. } => {
                    if retries_left == 0 {
                        return Err(full);
                    }
                    retries_left -= 1;
                    std::thread::sleep(Duration::from_micros(u64::from(backoff_us)));
                }
            }
        }
    }
}

impl RingChannel for FramedRing {
    fn mode(&self) -> RingMode {
        self.channel().mode()
    }

    fn write(&mut self, bytes: &[u8]) -> RingResult<usize> {
        self.channel_mut().write(bytes)
    }

    fn read(&self) -> Option<Chunk<'_>> {
        self.channel().read()
    }

    fn shift(&mut self, span: usize) -> RingResult<()> {
        self.channel_mut().shift(span)
    }

    fn available(&self) -> Availability {
        self.channel().available()
    }
}
