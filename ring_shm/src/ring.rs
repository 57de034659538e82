//! Ring buffer core: one mapped segment, raw byte transfer, ownership.
//!
//! `head` and `tail` are unwrapped byte counters; the physical index of a
//! position is `pos % capacity`. The writer copies bytes and then publishes
//! `head` with `Release`; the reader loads `head` with `Acquire` before
//! touching the bytes below it. Consumption mirrors this on `tail`.
//!
//! Nothing here blocks, allocates or enters the kernel unless the ring was
//! created with a mutex flag.

use crate::descriptor::{RingDescriptor, RingFlags};
use crate::error::{RingError, RingResult};
use crate::frame::{FRAME_HEADER_SIZE, FrameHeader, FrameKind};
use crate::layout::{HEADER_SIZE, RingHeader, RingOffsets};
use crate::lock;
use crate::owner::{self, HeldRoles, Owner, Role};
use crate::platform::{self, MappingOptions};
use crate::status::RingStatus;
use memmap2::MmapMut;
use ring_common::consts::RING_MAGIC;
use ring_common::ring::RingMode;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

/// Readable bytes of a ring as at most two contiguous slices.
///
/// `second` is non-empty only when the readable region wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteView<'a> {
    /// Bytes from the read position up to the wrap point (or the end)
    pub first: &'a [u8],
    /// Bytes continuing from physical offset 0
    pub second: &'a [u8],
}

impl<'a> ByteView<'a> {
    /// Total byte count.
    #[inline]
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    /// True if no bytes are visible.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.second.is_empty()
    }

    /// Copy the leading bytes into `out`. Returns the count copied.
    pub fn copy_to(&self, out: &mut [u8]) -> usize {
        let a = self.first.len().min(out.len());
        out[..a].copy_from_slice(&self.first[..a]);
        let b = self.second.len().min(out.len() - a);
        out[a..a + b].copy_from_slice(&self.second[..b]);
        a + b
    }

    /// First `n` bytes of the view.
    pub fn prefix(&self, n: usize) -> ByteView<'a> {
        let a = self.first.len().min(n);
        let b = self.second.len().min(n - a);
        ByteView {
            first: &self.first[..a],
            second: &self.second[..b],
        }
    }

    /// Owned copy of the bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.first);
        out.extend_from_slice(self.second);
        out
    }
}

/// Handle to one mapped ring segment.
///
/// Obtained from [`RingRegistry`](crate::registry::RingRegistry). Dropping
/// the handle releases the roles it claimed and detaches it; with
/// `UNLINK_ON_LAST_DETACH` the last detach removes the segment file.
#[derive(Debug)]
pub struct RingBuffer {
    descriptor: RingDescriptor,
    offsets: RingOffsets,
    path: PathBuf,
    counted: bool,
    held: HeldRoles,
    mmap: MmapMut,
}

impl RingBuffer {
    /// Initialise a freshly created, zero-filled segment and publish it.
    pub(crate) fn initialise(
        mut mmap: MmapMut,
        descriptor: RingDescriptor,
        path: PathBuf,
    ) -> RingResult<Self> {
        let offsets = RingOffsets::new(descriptor.capacity, descriptor.scratchpad);
        if mmap.len() < offsets.segment_len() {
            return Err(RingError::Corrupt {
                name: descriptor.name.to_string(),
                reason: format!("segment of {} bytes too short", mmap.len()),
            });
        }

        {
            // SAFETY: the mapping is page aligned, at least HEADER_SIZE long
            // and not yet visible to any other process.
            let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut RingHeader) };
            descriptor.store(header);
            header.attach_count.store(1, Ordering::Relaxed);
            header.magic.store(RING_MAGIC, Ordering::Release);
        }

        Ok(Self {
            descriptor,
            offsets,
            path,
            counted: true,
            held: HeldRoles::default(),
            mmap,
        })
    }

    /// Validate an existing segment. `counted` handles take part in the
    /// attach count; inspection handles do not.
    pub(crate) fn open(mmap: MmapMut, name: &str, path: PathBuf, counted: bool) -> RingResult<Self> {
        let corrupt = |reason: String| RingError::Corrupt {
            name: name.to_string(),
            reason,
        };

        if mmap.len() < HEADER_SIZE {
            return Err(corrupt(format!("segment of {} bytes too short", mmap.len())));
        }
        // SAFETY: length checked above; the mapping is page aligned.
        let header = unsafe { &*(mmap.as_ptr() as *const RingHeader) };
        let descriptor = RingDescriptor::load(header, name).map_err(corrupt)?;

        let offsets = RingOffsets::new(descriptor.capacity, descriptor.scratchpad);
        if mmap.len() != offsets.segment_len() {
            return Err(corrupt(format!(
                "segment is {} bytes, layout needs {}",
                mmap.len(),
                offsets.segment_len()
            )));
        }

        if counted {
            header.attach_count.fetch_add(1, Ordering::AcqRel);
        }

        Ok(Self {
            descriptor,
            offsets,
            path,
            counted,
            held: HeldRoles::default(),
            mmap,
        })
    }

    /// Apply this ring's backing flags to the local mapping.
    pub(crate) fn apply_backing(&self) {
        platform::apply_backing(&self.mmap, &MappingOptions::from_flags(self.flags()));
    }

    /// Drop a handle whose segment was never published, leaving the
    /// attach count and the file system alone.
    pub(crate) fn abandon(mut self) {
        self.counted = false;
    }

    /// Ring name
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Immutable ring parameters
    pub fn descriptor(&self) -> &RingDescriptor {
        &self.descriptor
    }

    /// Capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.offsets.capacity
    }

    /// Framing discipline
    #[inline]
    pub fn mode(&self) -> RingMode {
        self.descriptor.mode
    }

    /// Option flags
    #[inline]
    pub fn flags(&self) -> RingFlags {
        self.descriptor.flags
    }

    /// Path of the backing segment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared segment header
    #[inline]
    pub fn header(&self) -> &RingHeader {
        // SAFETY: `open`/`initialise` checked the mapping holds a header.
        unsafe { &*(self.mmap.as_ptr() as *const RingHeader) }
    }

    #[inline]
    fn data(&self) -> &[u8] {
        // SAFETY: `offsets` was validated against the mapping length.
        unsafe {
            std::slice::from_raw_parts(
                self.mmap.as_ptr().add(self.offsets.data),
                self.offsets.capacity,
            )
        }
    }

    #[inline]
    fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: `offsets` was validated against the mapping length.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.mmap.as_mut_ptr().add(self.offsets.data),
                self.offsets.capacity,
            )
        }
    }

    #[inline]
    fn index(&self, pos: u64) -> usize {
        (pos % self.offsets.capacity as u64) as usize
    }

    /// Published write position.
    #[inline]
    pub(crate) fn head(&self) -> u64 {
        self.header().head.load(Ordering::Acquire)
    }

    /// Published read position.
    #[inline]
    pub(crate) fn tail(&self) -> u64 {
        self.header().tail.load(Ordering::Acquire)
    }

    /// Bytes written and not yet consumed.
    #[inline]
    pub fn available_to_read(&self) -> usize {
        let tail = self.tail();
        let head = self.head();
        (head.saturating_sub(tail) as usize).min(self.offsets.capacity)
    }

    /// Bytes that can be written before the ring is full.
    ///
    /// Always `capacity - available_to_read()`.
    #[inline]
    pub fn available_to_write(&self) -> usize {
        self.offsets.capacity - self.available_to_read()
    }

    /// True if nothing is waiting to be read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_to_read() == 0
    }

    /// Copy as many bytes as fit and publish them. Returns the count written.
    ///
    /// The copy is split across the wrap point when necessary.
    pub fn write_raw(&mut self, bytes: &[u8]) -> usize {
        self.write_reserving(bytes, 0)
    }

    /// `write_raw` that leaves `reserve` bytes of free space untouched.
    pub(crate) fn write_reserving(&mut self, bytes: &[u8], reserve: usize) -> usize {
        self.with_writer_lock(|ring| {
            let space = ring.available_to_write().saturating_sub(reserve);
            let n = bytes.len().min(space);
            if n > 0 {
                let head = ring.header().head.load(Ordering::Relaxed);
                ring.copy_in(head, &bytes[..n]);
                ring.publish(head + n as u64);
            }
            n
        })
    }

    /// All readable bytes, without consuming them.
    pub fn peek_raw(&self) -> ByteView<'_> {
        let tail = self.tail();
        let head = self.head();
        let len = (head.saturating_sub(tail) as usize).min(self.offsets.capacity);
        self.view(tail, len)
    }

    /// Consume `n` bytes. The only way data leaves the ring.
    pub fn shift(&mut self, n: usize) -> RingResult<()> {
        self.with_reader_lock(|ring| ring.advance(n))
    }

    /// `shift` for callers already holding the reader lock.
    pub(crate) fn advance(&self, n: usize) -> RingResult<()> {
        let available = self.available_to_read();
        if n > available {
            return Err(RingError::ShiftOutOfRange {
                requested: n,
                available,
            });
        }
        let tail = self.header().tail.load(Ordering::Relaxed);
        self.header()
            .tail
            .store(tail + n as u64, Ordering::Release);
        Ok(())
    }

    /// Scratchpad bytes, synchronized by convention only.
    pub fn scratchpad(&self) -> &[u8] {
        &self.mmap[self.offsets.scratchpad..self.offsets.scratchpad + self.offsets.scratchpad_len]
    }

    /// Mutable scratchpad bytes.
    pub fn scratchpad_mut(&mut self) -> &mut [u8] {
        let start = self.offsets.scratchpad;
        let end = start + self.offsets.scratchpad_len;
        &mut self.mmap[start..end]
    }

    fn owner_word(&self, role: Role) -> &AtomicU32 {
        match role {
            Role::Reader => &self.header().reader_owner,
            Role::Writer => &self.header().writer_owner,
        }
    }

    /// Claim `role` for `id`. Fails `RoleClaimed` if another id holds it.
    ///
    /// The claim is released when this handle drops.
    pub fn claim(&mut self, role: Role, id: NonZeroU32) -> RingResult<()> {
        owner::claim_word(self.owner_word(role), role, id)?;
        *self.held.slot(role) = Some(id);
        debug!("Ring '{}': {} role claimed by {}", self.name(), role, id);
        Ok(())
    }

    /// Release `role` if held by `id`. Fails `NotOwner` otherwise.
    pub fn release(&mut self, role: Role, id: NonZeroU32) -> RingResult<()> {
        owner::release_word(self.owner_word(role), role, id)?;
        let slot = self.held.slot(role);
        if *slot == Some(id) {
            *slot = None;
        }
        Ok(())
    }

    /// Current holder of `role`.
    pub fn owner(&self, role: Role) -> Owner {
        Owner::from_raw(self.owner_word(role).load(Ordering::Acquire))
    }

    /// Number of counted handles attached to the segment.
    pub fn attached(&self) -> u32 {
        self.header().attach_count.load(Ordering::Acquire)
    }

    /// Writes discarded under the drop-newest policy.
    pub fn dropped(&self) -> u64 {
        self.header().dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn note_drop(&self) {
        self.header().dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot for tooling.
    pub fn status(&self) -> RingStatus {
        RingStatus::from_ring(self)
    }

    /// Detach explicitly. Equivalent to dropping the handle.
    pub fn detach(self) {}

    /// Clear owner and lock words whose holder process has exited.
    ///
    /// Returns the number of words cleared.
    pub fn reap_dead_owners(&self) -> usize {
        let header = self.header();
        let mut reaped = 0;
        for (role, word) in [
            (Role::Reader, &header.reader_owner),
            (Role::Writer, &header.writer_owner),
        ] {
            if let Some(pid) = owner::reap_word(word) {
                info!("Ring '{}': cleared {} role of dead process {}", self.name(), role, pid);
                reaped += 1;
            }
        }
        for word in [&header.reader_lock, &header.writer_lock] {
            if owner::reap_word(word).is_some() {
                reaped += 1;
            }
        }
        reaped
    }

    /// Pid holding the writer mutex, if any.
    pub fn writer_lock_holder(&self) -> Option<u32> {
        lock::holder(&self.header().writer_lock)
    }

    /// Pid holding the reader mutex, if any.
    pub fn reader_lock_holder(&self) -> Option<u32> {
        lock::holder(&self.header().reader_lock)
    }

    /// Run `f` under the writer mutex when the ring was created with one.
    pub(crate) fn with_writer_lock<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if !self.descriptor.flags.contains(RingFlags::WRITER_MUTEX) {
            return f(self);
        }
        let word: *const AtomicU32 = &self.header().writer_lock;
        // SAFETY: the word lives in `self.mmap`, which stays mapped while
        // `self` is borrowed for the duration of this call.
        let _guard = lock::acquire(unsafe { &*word });
        f(self)
    }

    /// Run `f` under the reader mutex when the ring was created with one.
    pub(crate) fn with_reader_lock<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        if !self.descriptor.flags.contains(RingFlags::READER_MUTEX) {
            return f(self);
        }
        let word: *const AtomicU32 = &self.header().reader_lock;
        // SAFETY: as in `with_writer_lock`.
        let _guard = lock::acquire(unsafe { &*word });
        f(self)
    }

    /// Copy `bytes` to ring position `pos`, splitting at the wrap point.
    pub(crate) fn copy_in(&mut self, pos: u64, bytes: &[u8]) {
        let idx = self.index(pos);
        let cap = self.offsets.capacity;
        let first = bytes.len().min(cap - idx);
        let data = self.data_mut();
        data[idx..idx + first].copy_from_slice(&bytes[..first]);
        data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
    }

    /// Publish everything below `head` to the reader.
    #[inline]
    pub(crate) fn publish(&self, head: u64) {
        self.header().head.store(head, Ordering::Release);
    }

    /// `len` bytes starting at ring position `pos`.
    pub(crate) fn view(&self, pos: u64, len: usize) -> ByteView<'_> {
        let idx = self.index(pos);
        let first = len.min(self.offsets.capacity - idx);
        let data = self.data();
        ByteView {
            first: &data[idx..idx + first],
            second: &data[..len - first],
        }
    }

    /// Write a frame header and payload at `pos`. Returns the end position.
    ///
    /// The caller has already placed the frame so that it does not wrap.
    pub(crate) fn put_frame(&mut self, pos: u64, header: FrameHeader, payload: &[u8]) -> u64 {
        let idx = self.index(pos);
        let data = self.data_mut();
        data[idx..idx + FRAME_HEADER_SIZE].copy_from_slice(&header.encode());
        data[idx + FRAME_HEADER_SIZE..idx + FRAME_HEADER_SIZE + payload.len()]
            .copy_from_slice(payload);
        pos + header.span() as u64
    }

    /// Frame header at `pos`, if `pos` is below `head` and the frame is sane.
    pub(crate) fn frame_at(&self, pos: u64, head: u64) -> Option<FrameHeader> {
        if pos >= head {
            return None;
        }
        let idx = self.index(pos);
        let frame = FrameHeader::decode(&self.data()[idx..]);
        match frame {
            Some(h) if idx + h.span() <= self.offsets.capacity && pos + h.span() as u64 <= head => {
                Some(h)
            }
            _ => {
                warn!(
                    "Ring '{}': invalid frame at position {} (head {})",
                    self.name(),
                    pos,
                    head
                );
                None
            }
        }
    }

    /// Payload of the frame whose header starts at `pos`.
    pub(crate) fn payload_at(&self, pos: u64, len: usize) -> &[u8] {
        let start = self.index(pos) + FRAME_HEADER_SIZE;
        &self.data()[start..start + len]
    }

    /// Consume pad frames sitting at `tail`. Returns `(tail, head)` after.
    ///
    /// Safe from a shared reference: `tail` only moves forward by a CAS
    /// from the value the pad was read at.
    pub(crate) fn skip_tail_pads(&self) -> (u64, u64) {
        let header = self.header();
        loop {
            let tail = header.tail.load(Ordering::Acquire);
            let head = header.head.load(Ordering::Acquire);
            match self.frame_at(tail, head) {
                Some(frame) if frame.kind == FrameKind::Pad => {
                    let _ = header.tail.compare_exchange(
                        tail,
                        tail + frame.span() as u64,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                _ => return (tail, head),
            }
        }
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        for role in [Role::Reader, Role::Writer] {
            if let Some(id) = self.held.slot(role).take() {
                let _ = owner::release_word(self.owner_word(role), role, id);
            }
        }

        if !self.counted {
            return;
        }

        let previous = self
            .header()
            .attach_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        debug!(
            "Detached from ring '{}' ({} handle(s) left)",
            self.name(),
            previous.saturating_sub(1)
        );

        if previous == 1 && self.descriptor.flags.contains(RingFlags::UNLINK_ON_LAST_DETACH) {
            match std::fs::remove_file(&self.path) {
                Ok(()) => info!("Unlinked ring '{}' after last detach", self.name()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to unlink ring '{}': {}", self.name(), e),
            }
        }
    }
}
