//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across the ring workspace, plus the ring declaration file consumed by
//! `ringcmd load` and by applications that create their rings at startup.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ring_common::config::{ConfigLoader, RingsConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = RingsConfig::load(Path::new("rings.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{DEFAULT_RING_DIR, DEFAULT_RING_PREFIX, DEFAULT_RING_SIZE, SCRATCHPAD_MAX};
use crate::ring::{RingMode, SaturationPolicy, check_capacity, is_valid_ring_name};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across all applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "motion-rings"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where ring segment files live.
///
/// # TOML Example
///
/// ```toml
/// [registry]
/// dir = "/dev/shm"
/// prefix = "ring_"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Directory holding `<prefix><name>.ring` files. Should be tmpfs.
    #[serde(default = "default_ring_dir")]
    pub dir: PathBuf,

    /// File name prefix isolating this registry from unrelated files.
    #[serde(default = "default_ring_prefix")]
    pub prefix: String,
}

fn default_ring_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RING_DIR)
}

fn default_ring_prefix() -> String {
    DEFAULT_RING_PREFIX.to_string()
}

fn default_ring_size() -> usize {
    DEFAULT_RING_SIZE
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dir: default_ring_dir(),
            prefix: default_ring_prefix(),
        }
    }
}

impl RegistryConfig {
    /// Registry rooted at `dir` with the default prefix.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: default_ring_prefix(),
        }
    }
}

/// One ring declaration.
///
/// # TOML Example
///
/// ```toml
/// [[ring]]
/// name = "motion.feedback"
/// capacity = 16384
/// mode = "stream"
/// policy = "drop_newest"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RingEntry {
    /// Unique ring name.
    pub name: String,

    /// Ring capacity in bytes.
    #[serde(default = "default_ring_size")]
    pub capacity: usize,

    /// Framing discipline.
    pub mode: RingMode,

    /// Scratchpad size in bytes.
    #[serde(default)]
    pub scratchpad: usize,

    /// Serialize consumers through a shared-memory mutex (non-RT readers only).
    #[serde(default)]
    pub reader_mutex: bool,

    /// Serialize producers through a shared-memory mutex (non-RT writers only).
    #[serde(default)]
    pub writer_mutex: bool,

    /// Prefault and lock the segment pages.
    #[serde(default)]
    pub locked_pages: bool,

    /// Advise transparent huge pages for the segment.
    #[serde(default)]
    pub huge_pages: bool,

    /// Remove the segment file when the last handle detaches.
    #[serde(default)]
    pub unlink_on_last_detach: bool,

    /// Behavior of `deliver` when the ring is saturated.
    #[serde(default)]
    pub policy: SaturationPolicy,
}

impl RingEntry {
    /// Validate name, capacity and scratchpad bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_ring_name(&self.name) {
            return Err(ConfigError::ValidationError(format!(
                "invalid ring name '{}'",
                self.name
            )));
        }
        check_capacity(self.capacity).map_err(|e| {
            ConfigError::ValidationError(format!("ring '{}': {e}", self.name))
        })?;
        if self.scratchpad > SCRATCHPAD_MAX {
            return Err(ConfigError::ValidationError(format!(
                "ring '{}': scratchpad {} exceeds {SCRATCHPAD_MAX}",
                self.name, self.scratchpad
            )));
        }
        Ok(())
    }
}

/// Ring declaration file.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "motion"
///
/// [registry]
/// dir = "/dev/shm"
///
/// [[ring]]
/// name = "motion.cmd"
/// capacity = 4096
/// mode = "record"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingsConfig {
    /// Common application settings.
    pub shared: SharedConfig,

    /// Registry location.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Rings to create at startup.
    #[serde(default, rename = "ring")]
    pub rings: Vec<RingEntry>,
}

impl RingsConfig {
    /// Validate shared settings, each ring, and name uniqueness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.registry.prefix.contains('/') {
            return Err(ConfigError::ValidationError(
                "registry prefix cannot contain '/'".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for ring in &self.rings {
            ring.validate()?;
            if !seen.insert(ring.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate ring name '{}'",
                    ring.name
                )));
            }
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
