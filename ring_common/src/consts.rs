//! Ring constants.
//!
//! Single source of truth for size limits, layout magic and default paths.
//! Every other crate imports from here.

/// Magic number identifying an initialised ring segment: `"HALRING1"`.
pub const RING_MAGIC: u64 = u64::from_be_bytes(*b"HALRING1");

/// Version of the shared-memory header layout.
///
/// Bumped whenever `RingHeader` changes; attach refuses other versions.
pub const RING_LAYOUT_VERSION: u32 = 1;

/// Maximum ring name length in bytes.
pub const RING_NAME_MAX: usize = 127;

/// Size of the name field stored in the segment header (name + NUL).
pub const RING_NAME_FIELD: usize = RING_NAME_MAX + 1;

/// Default ring capacity used when none is configured.
pub const DEFAULT_RING_SIZE: usize = 1024;

/// Smallest accepted ring capacity in bytes.
pub const RING_MIN_CAPACITY: usize = 64;

/// Largest accepted ring capacity in bytes (1GB).
pub const RING_MAX_CAPACITY: usize = 1_073_741_824;

/// Largest accepted scratchpad in bytes.
pub const SCRATCHPAD_MAX: usize = 1_048_576;

/// Frame alignment inside record and multiframe rings.
///
/// Ring capacities must be a multiple of this value so that a frame header
/// always fits in front of the physical wrap point.
pub const FRAME_ALIGN: usize = 8;

/// CPU cache line size in bytes.
///
/// Head and tail live on separate cache lines to avoid false sharing
/// between producer and consumer.
pub const CACHE_LINE_SIZE: usize = 64;

/// Default directory holding ring segment files (tmpfs).
pub const DEFAULT_RING_DIR: &str = "/dev/shm";

/// Default file name prefix of ring segments.
pub const DEFAULT_RING_PREFIX: &str = "ring_";

/// File extension of ring segments.
pub const RING_FILE_EXT: &str = "ring";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_halring() {
        assert_eq!(&RING_MAGIC.to_be_bytes(), b"HALRING1");
    }

    #[test]
    fn capacity_bounds_are_consistent() {
        assert!(RING_MIN_CAPACITY < RING_MAX_CAPACITY);
        assert_eq!(RING_MIN_CAPACITY % FRAME_ALIGN, 0);
        assert_eq!(RING_MAX_CAPACITY % FRAME_ALIGN, 0);
        assert_eq!(DEFAULT_RING_SIZE % FRAME_ALIGN, 0);
        assert!(DEFAULT_RING_SIZE >= RING_MIN_CAPACITY);
    }

    #[test]
    fn cache_line_is_power_of_two() {
        assert!(CACHE_LINE_SIZE.is_power_of_two());
        assert!(FRAME_ALIGN.is_power_of_two());
    }
}
