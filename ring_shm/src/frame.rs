//! Tagged frame format shared by the record and multiframe layers.
//!
//! ```text
//! ┌──────────┬──────┬───────┬──────────┬───────────────┬────────────┐
//! │ len: u32 │ kind │ flags │ reserved │ payload (len) │ pad to 8 B │
//! │   LE     │  u8  │  u8   │   u16    │               │            │
//! └──────────┴──────┴───────┴──────────┴───────────────┴────────────┘
//! ```
//!
//! Frames are 8-byte aligned and never straddle the physical end of the
//! ring. When the next frame does not fit before the wrap point, a `Pad`
//! frame covers the tail end and the real frame starts at offset 0.

use bitflags::bitflags;
use ring_common::consts::FRAME_ALIGN;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frame kind tag.
///
/// Zero is not a kind, so zeroed ring memory never decodes as a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Payload-carrying frame.
    Data = 1,
    /// Filler up to the wrap point; readers skip it.
    Pad = 2,
    /// Terminates a multiframe group.
    Commit = 3,
}

impl FrameKind {
    /// Convert from raw `u8` value. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Pad),
            3 => Some(Self::Commit),
            _ => None,
        }
    }
}

bitflags! {
    /// Per-frame flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// Frame continues the previous frame of the same group.
        const CONTINUATION = 0x01;
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub len: u32,
    /// Frame kind
    pub kind: FrameKind,
    /// Frame flags
    pub flags: FrameFlags,
}

impl FrameHeader {
    /// Header of a data frame carrying `len` bytes.
    #[inline]
    pub const fn data(len: u32, flags: FrameFlags) -> Self {
        Self {
            len,
            kind: FrameKind::Data,
            flags,
        }
    }

    /// Header of a pad frame covering `span` bytes in total.
    #[inline]
    pub const fn pad(span: usize) -> Self {
        Self {
            len: (span - FRAME_HEADER_SIZE) as u32,
            kind: FrameKind::Pad,
            flags: FrameFlags::empty(),
        }
    }

    /// Header of a group commit marker.
    #[inline]
    pub const fn commit() -> Self {
        Self {
            len: 0,
            kind: FrameKind::Commit,
            flags: FrameFlags::empty(),
        }
    }

    /// Serialize to the 8-byte wire form.
    #[inline]
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        out[..4].copy_from_slice(&self.len.to_le_bytes());
        out[4] = self.kind as u8;
        out[5] = self.flags.bits();
        out
    }

    /// Parse the 8-byte wire form. Returns `None` for unknown kinds or
    /// short input.
    #[inline]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; FRAME_HEADER_SIZE] = bytes.get(..FRAME_HEADER_SIZE)?.try_into().ok()?;
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let kind = FrameKind::from_u8(raw[4])?;
        Some(Self {
            len,
            kind,
            flags: FrameFlags::from_bits_truncate(raw[5]),
        })
    }

    /// Bytes this frame occupies in the ring, header and padding included.
    #[inline]
    pub const fn span(&self) -> usize {
        frame_size(self.len as usize)
    }

    /// True for continuation frames.
    #[inline]
    pub const fn is_continuation(&self) -> bool {
        self.flags.contains(FrameFlags::CONTINUATION)
    }
}

/// Ring bytes taken by a frame carrying `payload_len` bytes.
#[inline]
pub const fn frame_size(payload_len: usize) -> usize {
    (FRAME_HEADER_SIZE + payload_len + FRAME_ALIGN - 1) & !(FRAME_ALIGN - 1)
}

/// Pad needed before a frame of `frame` bytes written at position `pos`.
///
/// Zero when the frame fits before the wrap point, otherwise the whole
/// remaining span up to it.
#[inline]
pub const fn pad_before(pos: u64, capacity: usize, frame: usize) -> usize {
    let span = capacity - (pos % capacity as u64) as usize;
    if frame > span { span } else { 0 }
}

/// Placement of a sequence of frames starting at a given position.
///
/// Used to lay out a record or a whole group before touching the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout {
    /// Position the next frame would start at
    pub end: u64,
    /// Pad bytes inserted so far
    pub padding: usize,
    /// Pad inserted before the first frame (the realignment pad)
    pub leading_pad: usize,
    frames: usize,
}

impl Layout {
    pub fn starting_at(pos: u64) -> Self {
        Self {
            end: pos,
            padding: 0,
            leading_pad: 0,
            frames: 0,
        }
    }

    /// Append a frame of `frame` bytes. Returns the pad inserted before it.
    pub fn push(&mut self, capacity: usize, frame: usize) -> usize {
        let pad = pad_before(self.end, capacity, frame);
        if self.frames == 0 {
            self.leading_pad = pad;
        }
        self.frames += 1;
        self.padding += pad;
        self.end += (pad + frame) as u64;
        pad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding() {
        let header = FrameHeader::data(9, FrameFlags::CONTINUATION);
        let bytes = header.encode();
        assert_eq!(bytes, [9, 0, 0, 0, 1, 1, 0, 0]);
        assert_eq!(FrameHeader::decode(&bytes), Some(header));
    }

    #[test]
    fn zeroed_memory_is_not_a_frame() {
        assert_eq!(FrameHeader::decode(&[0u8; 8]), None);
        assert_eq!(FrameHeader::decode(&[1, 0, 0]), None);
        assert_eq!(FrameHeader::decode(&[0, 0, 0, 0, 9, 0, 0, 0]), None);
    }

    #[test]
    fn frame_sizes_are_aligned() {
        assert_eq!(frame_size(0), 8);
        assert_eq!(frame_size(1), 16);
        assert_eq!(frame_size(8), 16);
        assert_eq!(frame_size(9), 24);
        assert_eq!(FrameHeader::pad(8).span(), 8);
        assert_eq!(FrameHeader::pad(48).span(), 48);
        assert_eq!(FrameHeader::pad(48).len, 40);
        assert_eq!(FrameHeader::commit().span(), 8);
    }

    #[test]
    fn pad_only_when_frame_crosses_wrap() {
        // 64-byte ring, writer at offset 48: 16 bytes to the wrap point.
        assert_eq!(pad_before(48, 64, 16), 0);
        assert_eq!(pad_before(48, 64, 24), 16);
        assert_eq!(pad_before(112, 64, 24), 16);
        assert_eq!(pad_before(64, 64, 64), 0);
    }

    #[test]
    fn layout_accumulates_padding() {
        let mut layout = Layout::starting_at(40);
        assert_eq!(layout.push(64, 16), 0); // 40..56
        assert_eq!(layout.push(64, 16), 8); // pad 56..64, frame 64..80
        assert_eq!(layout.push(64, 8), 0); // 80..88
        assert_eq!(layout.padding, 8);
        assert_eq!(layout.leading_pad, 0);
        assert_eq!(layout.end, 88);

        let mut layout = Layout::starting_at(56);
        layout.push(64, 16);
        assert_eq!(layout.leading_pad, 8);
    }
}
