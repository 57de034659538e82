//! Prelude module for common re-exports.
//!
//! Consumers can do `use ring_common::prelude::*;` and get the most
//! important types without listing individual paths.
//!
//! # Usage
//!
//! ```rust
//! use ring_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    ConfigError, ConfigLoader, RegistryConfig, RingEntry, RingsConfig, SharedConfig,
};

// ─── Ring Types ─────────────────────────────────────────────────────
pub use crate::ring::{RingMode, SaturationPolicy};

// ─── Limits ─────────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_RING_SIZE, RING_MAX_CAPACITY, RING_MIN_CAPACITY, RING_NAME_MAX};
