//! Error types for ring operations

use crate::owner::Role;
use ring_common::ring::RingMode;
use thiserror::Error;

/// Errors that can occur during ring operations
#[derive(Error, Debug)]
pub enum RingError {
    /// No ring with this name exists in the registry
    #[error("Ring not found: {name}")]
    NotFound {
        /// Ring name
        name: String,
    },

    /// Ring exists with different parameters
    #[error("Ring '{name}' already exists with different parameters: {reason}")]
    Conflict {
        /// Ring name
        name: String,
        /// First parameter that differs
        reason: String,
    },

    /// Shared memory for the segment could not be obtained
    #[error("Failed to allocate shared memory for ring '{name}': {source}")]
    AllocationFailed {
        /// Ring name
        name: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// Write does not fit right now; retry once the reader catches up
    #[error("Ring full: {needed} bytes needed, {available} available")]
    RingFull {
        /// Bytes the write needs
        needed: usize,
        /// Bytes currently free
        available: usize,
    },

    /// Record can never fit in this ring
    #[error("Record too large: frame of {size} bytes exceeds ring capacity {max}")]
    RecordTooLarge {
        /// Framed size in bytes
        size: usize,
        /// Ring capacity in bytes
        max: usize,
    },

    /// Multiframe group can never fit in this ring
    #[error("Group too large: {size} bytes exceeds ring capacity {capacity}")]
    GroupTooLarge {
        /// Framed group size including the commit marker
        size: usize,
        /// Ring capacity in bytes
        capacity: usize,
    },

    /// Ring still attached by other handles
    #[error("Ring '{name}' is in use by {attached} handle(s)")]
    InUse {
        /// Ring name
        name: String,
        /// Attached handle count
        attached: u32,
    },

    /// Ring name is empty, too long or contains forbidden characters
    #[error("Invalid ring name: '{name}'")]
    InvalidName {
        /// Rejected name
        name: String,
    },

    /// Capacity or scratchpad size out of range
    #[error("Invalid ring size: {reason}")]
    InvalidCapacity {
        /// Violated bound
        reason: String,
    },

    /// Ring was opened through a framing layer of another mode
    #[error("Ring '{name}' is {actual}, expected {expected}")]
    ModeMismatch {
        /// Ring name
        name: String,
        /// Mode the caller asked for
        expected: RingMode,
        /// Mode stored in the segment
        actual: RingMode,
    },

    /// Segment exists but its header or frames are not valid
    #[error("Ring '{name}' is corrupt: {reason}")]
    Corrupt {
        /// Ring name
        name: String,
        /// What failed validation
        reason: String,
    },

    /// Role already claimed by another owner
    #[error("{role} role already claimed by {owner}")]
    RoleClaimed {
        /// Contested role
        role: Role,
        /// Current owner id
        owner: u32,
    },

    /// Release attempted by a party that does not own the role
    #[error("{role} role is not owned by {id}")]
    NotOwner {
        /// Role being released
        role: Role,
        /// Id of the caller
        id: u32,
    },

    /// Shift exceeds the bytes available to read
    #[error("Shift of {requested} bytes exceeds {available} available")]
    ShiftOutOfRange {
        /// Bytes requested
        requested: usize,
        /// Bytes available to read
        available: usize,
    },

    /// Framed shift that does not end on the next record or group boundary
    #[error("Shift of {requested} bytes does not match the next frame span {expected}")]
    FrameBoundary {
        /// Bytes requested
        requested: usize,
        /// Span of the oldest unread record or group, 0 if none
        expected: usize,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

impl RingError {
    /// True for transient backpressure the caller may retry.
    ///
    /// Only `RingFull` qualifies; every other error is structural.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RingFull { .. })
    }
}

/// Result type for ring operations
pub type RingResult<T> = Result<T, RingError>;
