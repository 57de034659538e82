//! Ring enums shared between the segment header, configuration and tools.
//!
//! Both types have a stable `u32` encoding because they are stored in the
//! shared-memory header and read back by processes built separately.

use crate::consts::{FRAME_ALIGN, RING_MAX_CAPACITY, RING_MIN_CAPACITY, RING_NAME_MAX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Framing discipline of a ring, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum RingMode {
    /// Length-prefixed discrete records.
    Record = 1,
    /// Unframed byte pipe.
    Stream = 2,
    /// Atomically visible groups of frames.
    Multiframe = 3,
}

impl RingMode {
    /// Convert from the raw header value. Returns `None` for unknown values.
    #[inline]
    pub const fn from_raw(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Record),
            2 => Some(Self::Stream),
            3 => Some(Self::Multiframe),
            _ => None,
        }
    }

    /// Raw header value.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    /// Lowercase name as used in configuration files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Stream => "stream",
            Self::Multiframe => "multiframe",
        }
    }
}

impl fmt::Display for RingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "record" => Ok(Self::Record),
            "stream" => Ok(Self::Stream),
            "multiframe" | "multipart" => Ok(Self::Multiframe),
            other => Err(format!("unknown ring mode '{other}'")),
        }
    }
}

/// What a producer does when a write does not currently fit.
///
/// Stored per ring because call sites disagree: a servo-feedback ring would
/// rather lose the newest sample, a command ring would rather wait.
///
/// # TOML Example
///
/// ```toml
/// policy = "drop_newest"
/// # or
/// policy = { retry = { attempts = 10, backoff_us = 200 } }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Report `RingFull` to the caller, which owns the retry decision.
    #[default]
    Reject,
    /// Silently discard the write and count it in the ring header.
    DropNewest,
    /// Poll-then-sleep up to `attempts` times. Blocks; never use on the
    /// real-time side.
    Retry {
        /// Number of additional attempts after the first one.
        attempts: u32,
        /// Sleep between attempts, in microseconds.
        backoff_us: u32,
    },
}

impl SaturationPolicy {
    /// Encode into the `(kind, attempts, backoff_us)` header triple.
    pub const fn to_raw(self) -> (u32, u32, u32) {
        match self {
            Self::Reject => (0, 0, 0),
            Self::DropNewest => (1, 0, 0),
            Self::Retry {
                attempts,
                backoff_us,
            } => (2, attempts, backoff_us),
        }
    }

    /// Decode from the header triple. Returns `None` for unknown kinds.
    pub const fn from_raw(kind: u32, attempts: u32, backoff_us: u32) -> Option<Self> {
        match kind {
            0 => Some(Self::Reject),
            1 => Some(Self::DropNewest),
            2 => Some(Self::Retry {
                attempts,
                backoff_us,
            }),
            _ => None,
        }
    }

    /// True if applying this policy may sleep.
    pub const fn may_block(self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

impl fmt::Display for SaturationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => f.write_str("reject"),
            Self::DropNewest => f.write_str("drop_newest"),
            Self::Retry {
                attempts,
                backoff_us,
            } => write!(f, "retry({attempts}x{backoff_us}us)"),
        }
    }
}

/// Check a ring name: 1..=127 bytes of `[A-Za-z0-9_.-]`, not starting with `.`.
///
/// Names become file names inside the registry directory.
pub fn is_valid_ring_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= RING_NAME_MAX
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// Check a ring capacity against the size limits and frame alignment.
pub fn check_capacity(capacity: usize) -> Result<(), String> {
    if !(RING_MIN_CAPACITY..=RING_MAX_CAPACITY).contains(&capacity) {
        return Err(format!(
            "capacity {capacity} outside {RING_MIN_CAPACITY}..={RING_MAX_CAPACITY}"
        ));
    }
    if capacity % FRAME_ALIGN != 0 {
        return Err(format!(
            "capacity {capacity} is not a multiple of {FRAME_ALIGN}"
        ));
    }
    Ok(())
}
