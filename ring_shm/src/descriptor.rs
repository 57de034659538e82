//! Immutable ring parameters.

use crate::error::{RingError, RingResult};
use crate::layout::RingHeader;
use bitflags::bitflags;
use ring_common::config::RingEntry;
use ring_common::consts::{RING_LAYOUT_VERSION, RING_NAME_MAX, SCRATCHPAD_MAX};
use ring_common::ring::{RingMode, SaturationPolicy, check_capacity, is_valid_ring_name};

/// Fixed-capacity ring name, stored inline.
pub type RingName = heapless::String<RING_NAME_MAX>;

bitflags! {
    /// Per-ring options fixed at creation.
    ///
    /// The mutex flags introduce blocking and are meant for cooperating
    /// non-real-time parties only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RingFlags: u32 {
        /// Serialize consuming operations through a shared-memory mutex.
        const READER_MUTEX          = 0x0001;
        /// Serialize producing operations through a shared-memory mutex.
        const WRITER_MUTEX          = 0x0002;
        /// Prefault and mlock the segment in every mapping process.
        const LOCKED_PAGES          = 0x0004;
        /// Advise transparent huge pages for the segment.
        const HUGE_PAGES            = 0x0008;
        /// Unlink the segment file when the last counted handle detaches.
        const UNLINK_ON_LAST_DETACH = 0x0010;
    }
}

impl RingFlags {
    /// Lowercase flag names, for reports.
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names()
            .map(|(name, _)| match name {
                "READER_MUTEX" => "reader_mutex",
                "WRITER_MUTEX" => "writer_mutex",
                "LOCKED_PAGES" => "locked_pages",
                "HUGE_PAGES" => "huge_pages",
                _ => "unlink_on_last_detach",
            })
            .collect()
    }
}

/// Build a `RingName`, rejecting names that cannot become file names.
pub fn ring_name(name: &str) -> RingResult<RingName> {
    if !is_valid_ring_name(name) {
        return Err(RingError::InvalidName {
            name: name.to_string(),
        });
    }
    let mut out = RingName::new();
    out.push_str(name).map_err(|_| RingError::InvalidName {
        name: name.to_string(),
    })?;
    Ok(out)
}

/// Parameters of a ring to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSpec {
    /// Capacity in bytes, a multiple of 8
    pub capacity: usize,
    /// Framing discipline
    pub mode: RingMode,
    /// Option flags
    pub flags: RingFlags,
    /// Scratchpad size in bytes
    pub scratchpad: usize,
    /// Saturation behavior of `FramedRing::deliver`
    pub policy: SaturationPolicy,
}

impl RingSpec {
    /// Ring of `capacity` bytes in `mode`, no scratchpad, default flags.
    pub fn new(capacity: usize, mode: RingMode) -> Self {
        Self {
            capacity,
            mode,
            flags: RingFlags::empty(),
            scratchpad: 0,
            policy: SaturationPolicy::default(),
        }
    }

    /// Set option flags.
    pub fn with_flags(mut self, flags: RingFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set scratchpad size.
    pub fn with_scratchpad(mut self, scratchpad: usize) -> Self {
        self.scratchpad = scratchpad;
        self
    }

    /// Set saturation policy.
    pub fn with_policy(mut self, policy: SaturationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check capacity and scratchpad bounds.
    pub fn validate(&self) -> RingResult<()> {
        check_capacity(self.capacity).map_err(|reason| RingError::InvalidCapacity { reason })?;
        if self.scratchpad > SCRATCHPAD_MAX {
            return Err(RingError::InvalidCapacity {
                reason: format!(
                    "scratchpad {} exceeds {SCRATCHPAD_MAX}",
                    self.scratchpad
                ),
            });
        }
        Ok(())
    }
}

impl From<&RingEntry> for RingSpec {
    fn from(entry: &RingEntry) -> Self {
        let mut flags = RingFlags::empty();
        flags.set(RingFlags::READER_MUTEX, entry.reader_mutex);
        flags.set(RingFlags::WRITER_MUTEX, entry.writer_mutex);
        flags.set(RingFlags::LOCKED_PAGES, entry.locked_pages);
        flags.set(RingFlags::HUGE_PAGES, entry.huge_pages);
        flags.set(RingFlags::UNLINK_ON_LAST_DETACH, entry.unlink_on_last_detach);

        Self {
            capacity: entry.capacity,
            mode: entry.mode,
            flags,
            scratchpad: entry.scratchpad,
            policy: entry.policy,
        }
    }
}

/// Descriptor of an existing ring, as stored in its segment header.
///
/// Immutable once created; attaching never changes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingDescriptor {
    /// Ring name
    pub name: RingName,
    /// Capacity in bytes
    pub capacity: usize,
    /// Framing discipline
    pub mode: RingMode,
    /// Option flags
    pub flags: RingFlags,
    /// Scratchpad size in bytes
    pub scratchpad: usize,
    /// Saturation behavior
    pub policy: SaturationPolicy,
    /// Creation time, ns since the Unix epoch
    pub created_ts: u64,
}

impl RingDescriptor {
    /// Creation parameters of this ring.
    pub fn spec(&self) -> RingSpec {
        RingSpec {
            capacity: self.capacity,
            mode: self.mode,
            flags: self.flags,
            scratchpad: self.scratchpad,
            policy: self.policy,
        }
    }

    /// First parameter in which `spec` differs from this ring, if any.
    pub fn mismatch(&self, spec: &RingSpec) -> Option<String> {
        if self.capacity != spec.capacity {
            return Some(format!(
                "capacity {} != requested {}",
                self.capacity, spec.capacity
            ));
        }
        if self.mode != spec.mode {
            return Some(format!("mode {} != requested {}", self.mode, spec.mode));
        }
        if self.scratchpad != spec.scratchpad {
            return Some(format!(
                "scratchpad {} != requested {}",
                self.scratchpad, spec.scratchpad
            ));
        }
        if self.flags != spec.flags {
            return Some(format!(
                "flags {:#x} != requested {:#x}",
                self.flags.bits(),
                spec.flags.bits()
            ));
        }
        if self.policy != spec.policy {
            return Some(format!(
                "policy {} != requested {}",
                self.policy, spec.policy
            ));
        }
        None
    }

    /// Write the descriptor fields into a fresh header. `magic` is left alone.
    pub(crate) fn store(&self, header: &mut RingHeader) {
        let (kind, attempts, backoff_us) = self.policy.to_raw();
        header.layout_version = RING_LAYOUT_VERSION;
        header.mode = self.mode.as_raw();
        header.flags = self.flags.bits();
        header.policy = kind;
        header.retry_attempts = attempts;
        header.retry_backoff_us = backoff_us;
        header.capacity = self.capacity as u64;
        header.scratchpad_size = self.scratchpad as u64;
        header.created_ts = self.created_ts;
        header.name = [0; ring_common::consts::RING_NAME_FIELD];
        header.name[..self.name.len()].copy_from_slice(self.name.as_bytes());
    }

    /// Read and validate the descriptor of an initialised header.
    pub(crate) fn load(header: &RingHeader, expected_name: &str) -> Result<Self, String> {
        if !header.is_initialised() {
            return Err("bad magic".to_string());
        }
        if header.layout_version != RING_LAYOUT_VERSION {
            return Err(format!(
                "layout version {} (expected {RING_LAYOUT_VERSION})",
                header.layout_version
            ));
        }
        let mode = RingMode::from_raw(header.mode)
            .ok_or_else(|| format!("unknown mode {}", header.mode))?;
        let flags = RingFlags::from_bits(header.flags)
            .ok_or_else(|| format!("unknown flags {:#x}", header.flags))?;
        let policy = SaturationPolicy::from_raw(
            header.policy,
            header.retry_attempts,
            header.retry_backoff_us,
        )
        .ok_or_else(|| format!("unknown policy {}", header.policy))?;

        let capacity = usize::try_from(header.capacity).map_err(|e| e.to_string())?;
        check_capacity(capacity)?;
        let scratchpad = usize::try_from(header.scratchpad_size).map_err(|e| e.to_string())?;
        if scratchpad > SCRATCHPAD_MAX {
            return Err(format!("scratchpad {scratchpad} out of range"));
        }

        if header.name_bytes() != expected_name.as_bytes() {
            return Err(format!(
                "header names '{}'",
                String::from_utf8_lossy(header.name_bytes())
            ));
        }
        let name = ring_name(expected_name).map_err(|e| e.to_string())?;

        Ok(Self {
            name,
            capacity,
            mode,
            flags,
            scratchpad,
            policy,
            created_ts: header.created_ts,
        })
    }
}
