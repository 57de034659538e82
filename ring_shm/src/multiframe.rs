//! Multiframe framing: groups of frames that become visible atomically.
//!
//! Frames are staged in a local buffer sized to the ring at construction.
//! Nothing reaches shared memory until `flush`, which lays the whole group
//! out (pads included), appends a `Commit` frame and publishes `head` once.
//! A reader therefore sees either no part of a group or all of it.

use crate::error::{RingError, RingResult};
use crate::frame::{
    FRAME_HEADER_SIZE, FrameFlags, FrameHeader, FrameKind, Layout, frame_size, pad_before,
};
use crate::record::expect_mode;
use crate::ring::RingBuffer;
use ring_common::ring::RingMode;
use std::sync::atomic::Ordering;
use tracing::warn;

/// One frame of a published group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame payload
    pub data: &'a [u8],
    /// True if this frame continues the previous one
    pub continuation: bool,
}

/// Lazy iterator over the frames of the oldest published group.
pub struct FrameGroup<'a> {
    ring: &'a RingBuffer,
    pos: u64,
    limit: u64,
    span: usize,
    frames: usize,
}

impl FrameGroup<'_> {
    /// Ring bytes the group occupies, pads and commit marker included.
    pub fn span(&self) -> usize {
        self.span
    }

    /// Number of data frames in the group.
    pub fn frame_count(&self) -> usize {
        self.frames
    }
}

impl<'a> Iterator for FrameGroup<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Frame<'a>> {
        loop {
            let frame = self.ring.frame_at(self.pos, self.limit)?;
            let at = self.pos;
            self.pos += frame.span() as u64;
            match frame.kind {
                FrameKind::Pad => continue,
                FrameKind::Data => {
                    return Some(Frame {
                        data: self.ring.payload_at(at, frame.len as usize),
                        continuation: frame.is_continuation(),
                    });
                }
                FrameKind::Commit => {
                    self.pos = self.limit;
                    return None;
                }
            }
        }
    }
}

/// Walk from `tail` to the first commit marker. Returns `(span, frames)`.
fn group_extent(ring: &RingBuffer, tail: u64, head: u64) -> Option<(usize, usize)> {
    let mut pos = tail;
    let mut frames = 0;
    while pos < head {
        let frame = ring.frame_at(pos, head)?;
        pos += frame.span() as u64;
        match frame.kind {
            FrameKind::Data => frames += 1,
            FrameKind::Pad => {}
            FrameKind::Commit => return Some(((pos - tail) as usize, frames)),
        }
    }
    if pos > tail {
        warn!(
            "Ring '{}': group at {} has no commit marker before head {}",
            ring.name(),
            tail,
            head
        );
    }
    None
}

/// Split encoded staged frames back into whole frames.
fn staged_frames(staging: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = staging;
    std::iter::from_fn(move || {
        let header = FrameHeader::decode(rest)?;
        let (frame, tail) = rest.split_at(header.span());
        rest = tail;
        Some(frame)
    })
}

/// Multiframe-mode view of a ring.
pub struct MultiframeRing {
    ring: RingBuffer,
    staging: Vec<u8>,
    staged: usize,
    open: bool,
    // Size of the frame that overflowed the open group, if any.
    overflow: Option<usize>,
}

impl MultiframeRing {
    /// Wrap a multiframe-mode ring. Fails `ModeMismatch` for other modes.
    ///
    /// Allocates the staging buffer once, sized to the ring capacity.
    pub fn new(ring: RingBuffer) -> RingResult<Self> {
        expect_mode(&ring, RingMode::Multiframe)?;
        let staging = Vec::with_capacity(ring.capacity());
        Ok(Self {
            ring,
            staging,
            staged: 0,
            open: false,
            overflow: None,
        })
    }

    /// Underlying ring
    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Underlying ring, mutably
    pub fn ring_mut(&mut self) -> &mut RingBuffer {
        &mut self.ring
    }

    /// Unwrap the ring. Staged frames are lost.
    pub fn into_inner(self) -> RingBuffer {
        self.ring
    }

    /// Start a new group, discarding any frames staged but not flushed.
    pub fn begin_group(&mut self) {
        self.discard_group();
        self.open = true;
    }

    fn too_large(&self, size: usize) -> RingError {
        RingError::GroupTooLarge {
            size,
            capacity: self.ring.capacity(),
        }
    }

    /// Stage one frame. Starts a group if none is open.
    ///
    /// Fails `GroupTooLarge` if the group could never fit in the ring. The
    /// whole group is then poisoned: later frames are refused and `flush`
    /// discards it without publishing anything.
    pub fn write_frame(&mut self, bytes: &[u8], is_continuation: bool) -> RingResult<()> {
        if !self.open {
            self.begin_group();
        }
        if let Some(size) = self.overflow {
            return Err(self.too_large(size));
        }

        let frame = frame_size(bytes.len());
        let size = self.staging.len() + frame + FRAME_HEADER_SIZE;
        if size > self.ring.capacity() {
            self.overflow = Some(size);
            return Err(self.too_large(size));
        }

        let flags = if is_continuation {
            FrameFlags::CONTINUATION
        } else {
            FrameFlags::empty()
        };
        let start = self.staging.len();
        self.staging
            .extend_from_slice(&FrameHeader::data(bytes.len() as u32, flags).encode());
        self.staging.extend_from_slice(bytes);
        self.staging.resize(start + frame, 0);
        self.staged += 1;
        Ok(())
    }

    /// Publish the staged group.
    ///
    /// An empty group is a no-op. A group that overflowed in `write_frame`
    /// is discarded and fails `GroupTooLarge` again; the ring is untouched.
    /// On `RingFull` the group stays staged so the caller can retry; if the
    /// layout needed a pad, the pad up to the wrap point is published alone
    /// so the ring realigns.
    pub fn flush(&mut self) -> RingResult<()> {
        if let Some(size) = self.overflow {
            self.discard_group();
            return Err(self.too_large(size));
        }
        if self.staged == 0 {
            self.open = false;
            return Ok(());
        }

        let staging = &self.staging;
        self.ring.with_writer_lock(|ring| {
            let capacity = ring.capacity();
            let head = ring.header().head.load(Ordering::Relaxed);
            let free = ring.available_to_write();

            let mut layout = Layout::starting_at(head);
            for frame in staged_frames(staging) {
                layout.push(capacity, frame.len());
            }
            layout.push(capacity, FRAME_HEADER_SIZE);
            let needed = (layout.end - head) as usize;

            if needed > free {
                let to_wrap = capacity - (head % capacity as u64) as usize;
                if layout.padding > 0 && to_wrap < capacity && to_wrap <= free {
                    ring.put_frame(head, FrameHeader::pad(to_wrap), &[]);
                    ring.publish(head + to_wrap as u64);
                }
                return Err(RingError::RingFull {
                    needed,
                    available: free,
                });
            }

            let mut pos = head;
            for frame in staged_frames(staging) {
                let pad = pad_before(pos, capacity, frame.len());
                if pad > 0 {
                    pos = ring.put_frame(pos, FrameHeader::pad(pad), &[]);
                }
                ring.copy_in(pos, frame);
                pos += frame.len() as u64;
            }
            let pad = pad_before(pos, capacity, FRAME_HEADER_SIZE);
            if pad > 0 {
                pos = ring.put_frame(pos, FrameHeader::pad(pad), &[]);
            }
            pos = ring.put_frame(pos, FrameHeader::commit(), &[]);
            ring.publish(pos);
            Ok(())
        })?;

        self.discard_group();
        Ok(())
    }

    /// Drop the staged group without publishing it.
    pub fn discard_group(&mut self) {
        self.staging.clear();
        self.staged = 0;
        self.open = false;
        self.overflow = None;
    }

    /// Frames staged in the open group.
    pub fn staged_frames(&self) -> usize {
        self.staged
    }

    /// Encoded bytes staged in the open group, commit marker excluded.
    pub fn staged_bytes(&self) -> usize {
        self.staging.len()
    }

    /// True once a complete group is available.
    pub fn ready(&self) -> bool {
        let (tail, head) = self.ring.skip_tail_pads();
        tail < head
    }

    /// Oldest complete group, without consuming it.
    pub fn read(&self) -> Option<FrameGroup<'_>> {
        let (tail, head) = self.ring.skip_tail_pads();
        let (span, frames) = group_extent(&self.ring, tail, head)?;
        Some(FrameGroup {
            ring: &self.ring,
            pos: tail,
            limit: tail + span as u64,
            span,
            frames,
        })
    }

    /// Lazy iterator over every complete group, oldest first. Nothing is
    /// consumed.
    pub fn groups(&self) -> impl Iterator<Item = FrameGroup<'_>> {
        let (mut pos, head) = self.ring.skip_tail_pads();
        std::iter::from_fn(move || {
            let (span, frames) = group_extent(&self.ring, pos, head)?;
            let group = FrameGroup {
                ring: &self.ring,
                pos,
                limit: pos + span as u64,
                span,
                frames,
            };
            pos += span as u64;
            Some(group)
        })
    }

    /// Release exactly the oldest group, whose span must be `span`.
    ///
    /// Fails `FrameBoundary`, leaving `tail` alone, for any other span. A
    /// zero span is a no-op.
    pub(crate) fn shift_exact(&mut self, span: usize) -> RingResult<()> {
        if span == 0 {
            return Ok(());
        }
        self.ring.with_reader_lock(|ring| {
            let (tail, head) = ring.skip_tail_pads();
            match group_extent(ring, tail, head) {
                Some((expected, _)) if expected == span => ring.advance(span),
                front => Err(RingError::FrameBoundary {
                    requested: span,
                    expected: front.map_or(0, |(expected, _)| expected),
                }),
            }
        })
    }

    /// Release the oldest group. Returns false if none was ready.
    pub fn shift_group(&mut self) -> bool {
        self.ring.with_reader_lock(|ring| {
            let (tail, head) = ring.skip_tail_pads();
            match group_extent(ring, tail, head) {
                Some((span, _)) => ring.advance(span).is_ok(),
                None => false,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RingSpec;
    use crate::registry::RingRegistry;
    use ring_common::config::RegistryConfig;
    use tempfile::TempDir;

    fn multiframe_ring(capacity: usize) -> (TempDir, MultiframeRing) {
        let dir = TempDir::new().unwrap();
        let registry = RingRegistry::new(RegistryConfig::in_dir(dir.path()));
        let ring = registry
            .create("groups", &RingSpec::new(capacity, RingMode::Multiframe))
            .unwrap();
        (dir, MultiframeRing::new(ring).unwrap())
    }

    fn payloads(ring: &MultiframeRing) -> Vec<Vec<u8>> {
        ring.read()
            .map(|group| group.map(|f| f.data.to_vec()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn staged_frames_are_invisible_until_flush() {
        let (_dir, mut ring) = multiframe_ring(256);
        ring.begin_group();
        ring.write_frame(b"head", false).unwrap();
        ring.write_frame(b"body", true).unwrap();

        assert!(!ring.ready());
        assert!(ring.read().is_none());
        assert!(ring.ring().is_empty());
        assert_eq!(ring.staged_frames(), 2);
        assert_eq!(ring.staged_bytes(), 32);

        ring.flush().unwrap();
        assert!(ring.ready());
        assert_eq!(ring.staged_frames(), 0);

        let group = ring.read().unwrap();
        assert_eq!(group.frame_count(), 2);
        assert_eq!(group.span(), 40);
        let frames: Vec<Frame<'_>> = group.collect();
        assert_eq!(frames[0].data, b"head");
        assert!(!frames[0].continuation);
        assert_eq!(frames[1].data, b"body");
        assert!(frames[1].continuation);
    }

    #[test]
    fn groups_are_read_one_at_a_time() {
        let (_dir, mut ring) = multiframe_ring(256);
        ring.write_frame(b"a1", false).unwrap();
        ring.flush().unwrap();
        ring.write_frame(b"b1", false).unwrap();
        ring.write_frame(b"b2", true).unwrap();
        ring.flush().unwrap();

        assert_eq!(payloads(&ring), vec![b"a1".to_vec()]);
        assert!(ring.shift_group());
        assert_eq!(payloads(&ring), vec![b"b1".to_vec(), b"b2".to_vec()]);
        assert!(ring.shift_group());
        assert!(!ring.ready());
        assert!(!ring.shift_group());
    }

    #[test]
    fn groups_walks_without_consuming() {
        let (_dir, mut ring) = multiframe_ring(256);
        for i in 0..3u8 {
            ring.write_frame(&[i; 20], false).unwrap();
            ring.write_frame(&[i; 4], true).unwrap();
            ring.flush().unwrap(); // 32 + 16 + 8 bytes
        }

        let spans: Vec<usize> = ring.groups().map(|g| g.span()).collect();
        assert_eq!(spans, vec![56, 56, 56]);
        assert!(ring.groups().all(|g| g.frame_count() == 2));
        let firsts: Vec<u8> = ring
            .groups()
            .filter_map(|mut g| g.next().map(|f| f.data[0]))
            .collect();
        assert_eq!(firsts, vec![0, 1, 2]);

        assert!(ring.shift_group());
        assert_eq!(ring.groups().count(), 2);
    }

    #[test]
    fn empty_flush_is_noop() {
        let (_dir, mut ring) = multiframe_ring(128);
        ring.begin_group();
        ring.flush().unwrap();
        ring.flush().unwrap();
        assert!(!ring.ready());
        assert!(ring.ring().is_empty());
    }

    #[test]
    fn oversized_group_is_never_published() {
        let (_dir, mut ring) = multiframe_ring(128);
        ring.begin_group();
        ring.write_frame(&[1u8; 40], false).unwrap();
        let err = ring.write_frame(&[2u8; 100], true).unwrap_err();
        assert!(matches!(
            err,
            RingError::GroupTooLarge {
                size: 168,
                capacity: 128
            }
        ));
        assert!(!err.is_retryable());

        // Later frames of the same group are refused too.
        assert!(matches!(
            ring.write_frame(b"x", true),
            Err(RingError::GroupTooLarge { size: 168, .. })
        ));

        assert!(matches!(
            ring.flush(),
            Err(RingError::GroupTooLarge { size: 168, .. })
        ));
        assert_eq!(ring.staged_frames(), 0);
        assert!(ring.ring().is_empty());
        assert!(ring.read().is_none());

        // The next group starts clean.
        ring.write_frame(b"ok", false).unwrap();
        ring.flush().unwrap();
        assert_eq!(payloads(&ring), vec![b"ok".to_vec()]);
    }

    #[test]
    fn oversized_group_leaves_published_bytes_unchanged() {
        let (_dir, mut ring) = multiframe_ring(256);
        ring.write_frame(b"kept", false).unwrap();
        ring.write_frame(b"intact", true).unwrap();
        ring.flush().unwrap();

        let before = ring.ring().peek_raw().to_vec();
        let head = ring.ring().head();

        ring.begin_group();
        ring.write_frame(&[7u8; 64], false).unwrap();
        assert!(ring.write_frame(&[8u8; 200], true).is_err());
        assert!(ring.flush().is_err());

        assert_eq!(ring.ring().head(), head);
        assert_eq!(ring.ring().peek_raw().to_vec(), before);
        assert_eq!(payloads(&ring), vec![b"kept".to_vec(), b"intact".to_vec()]);
    }

    #[test]
    fn shift_exact_requires_group_span() {
        let (_dir, mut ring) = multiframe_ring(256);
        ring.write_frame(b"one", false).unwrap();
        ring.flush().unwrap(); // 16 + 8
        ring.write_frame(b"two", false).unwrap();
        ring.flush().unwrap();

        assert!(matches!(
            ring.shift_exact(16),
            Err(RingError::FrameBoundary {
                requested: 16,
                expected: 24
            })
        ));
        assert_eq!(ring.ring().available_to_read(), 48);
        ring.shift_exact(0).unwrap();
        ring.shift_exact(24).unwrap();
        assert_eq!(payloads(&ring), vec![b"two".to_vec()]);
    }

    #[test]
    fn ring_full_keeps_group_for_retry() {
        let (_dir, mut ring) = multiframe_ring(128);
        for _ in 0..2 {
            ring.write_frame(&[2u8; 48], false).unwrap();
            ring.flush().unwrap();
        }
        assert_eq!(ring.ring().available_to_write(), 0);

        ring.write_frame(&[3u8; 48], false).unwrap();
        assert!(ring.flush().unwrap_err().is_retryable());
        assert_eq!(ring.staged_frames(), 1);

        assert!(ring.shift_group());
        ring.flush().unwrap();
        assert!(ring.shift_group());
        assert_eq!(payloads(&ring), vec![vec![3u8; 48]]);
    }

    #[test]
    fn group_spans_wrap_with_interior_pad() {
        let (_dir, mut ring) = multiframe_ring(128);
        ring.write_frame(&[0u8; 40], false).unwrap();
        ring.flush().unwrap(); // 0..56
        assert!(ring.shift_group());

        // 48 at 56..104, pad 104..128, 48 at 128..176, commit 176..184.
        ring.write_frame(&[1u8; 40], false).unwrap();
        ring.write_frame(&[2u8; 40], true).unwrap();
        ring.flush().unwrap();
        assert_eq!(ring.ring().available_to_read(), 128);

        let group = ring.read().unwrap();
        assert_eq!(group.frame_count(), 2);
        assert_eq!(group.span(), 128);
        assert_eq!(payloads(&ring), vec![vec![1u8; 40], vec![2u8; 40]]);
        assert!(ring.shift_group());
        assert!(ring.ring().is_empty());
    }

    #[test]
    fn full_ring_realigns_for_large_group() {
        let (_dir, mut ring) = multiframe_ring(128);
        for _ in 0..2 {
            ring.write_frame(&[4u8; 16], false).unwrap();
            ring.flush().unwrap(); // 32 bytes each
        }
        assert!(ring.shift_group());

        // 96-byte group from offset 64 needs a pad; only 96 free.
        ring.write_frame(&[5u8; 80], false).unwrap();
        assert!(ring.flush().unwrap_err().is_retryable());
        assert_eq!(ring.ring().head(), 128);

        assert!(ring.shift_group());
        assert!(!ring.ready());
        ring.flush().unwrap();
        assert_eq!(payloads(&ring), vec![vec![5u8; 80]]);
    }

    #[test]
    fn begin_group_discards_unflushed_frames() {
        let (_dir, mut ring) = multiframe_ring(128);
        ring.write_frame(b"stale", false).unwrap();
        ring.begin_group();
        assert_eq!(ring.staged_frames(), 0);
        ring.write_frame(b"fresh", false).unwrap();
        ring.flush().unwrap();
        assert_eq!(payloads(&ring), vec![b"fresh".to_vec()]);
    }
}
