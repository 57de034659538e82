//! Ring Common Library
//!
//! Shared constants, ring enums and configuration loading utilities for
//! every crate of the ring workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Size limits, magic numbers and default paths
//! - [`ring`] - Ring mode and saturation policy enums stored in ring headers
//! - [`config`] - Configuration loading traits and ring declarations
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use ring_common::consts::*;
//! use ring_common::config::{ConfigLoader, RingsConfig};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod ring;
