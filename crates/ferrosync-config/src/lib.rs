//! Configuration management system for FerroSync
//!
//! This crate provides layered configuration for FerroSync: built-in
//! defaults, then a YAML, TOML or JSON file, then environment variables.
//!
//! # Features
//!
//! - **Multiple formats**: Support for YAML, TOML and JSON configuration files
//! - **Validation**: Out-of-range values are rejected when the configuration is built
//! - **Environment overrides**: e.g. `FERROSYNC__PROPAGATION__MAX_SIMULTANEOUS_TRANSFERS=4`
//! - **Defaults**: Sensible default values for all configuration options
//!
//! # Examples
//!
//! ```rust
//! use ferrosync_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("ferrosync.yaml")
//!     .add_env_prefix("FERROSYNC")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Transfers: {}", config.propagation.max_simultaneous_transfers);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Default number of actions allowed to run at once
pub const DEFAULT_MAX_SIMULTANEOUS_TRANSFERS: u32 = 20;

/// Default read buffer for fingerprinting
pub const DEFAULT_FINGERPRINT_BUFFER_SIZE: usize = 64 * 1024;

/// Main configuration structure for FerroSync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Propagation engine configuration
    #[serde(default)]
    pub propagation: PropagationConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings consumed by the propagation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Capacity of the action region
    #[serde(default = "default_max_simultaneous_transfers")]
    pub max_simultaneous_transfers: u32,
    /// Ask before committing the result of a merge
    #[serde(default)]
    pub confirm_before_merge_commit: bool,
    /// Fingerprint both sides after each file transfer
    #[serde(default)]
    pub verify_transfers: bool,
    /// Read buffer used while fingerprinting
    #[serde(default = "default_fingerprint_buffer_size")]
    pub fingerprint_buffer_size: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_transfers: DEFAULT_MAX_SIMULTANEOUS_TRANSFERS,
            confirm_before_merge_commit: false,
            verify_transfers: false,
            fingerprint_buffer_size: DEFAULT_FINGERPRINT_BUFFER_SIZE,
        }
    }
}

fn default_max_simultaneous_transfers() -> u32 {
    DEFAULT_MAX_SIMULTANEOUS_TRANSFERS
}

fn default_fingerprint_buffer_size() -> usize {
    DEFAULT_FINGERPRINT_BUFFER_SIZE
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Append the transfer log to this file
    pub log_file: Option<PathBuf>,
    /// Enable JSON formatting
    pub json_format: bool,
    /// Enable colored output
    pub colored_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            json_format: false,
            colored_output: true,
        }
    }
}
