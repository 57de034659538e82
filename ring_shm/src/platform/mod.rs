//! Platform-specific segment mapping and process queries

pub mod linux;

pub use linux::*;
