//! Fleet configuration
//!
//! JSON-backed configuration for the daemon: where `.conf` files live,
//! which address pools and port range to allocate from, the liveness
//! policy, and the tunnels to open at start.
//!
//! # Submodules
//!
//! - [`types`]: configuration structures and validation
//! - [`loader`]: file and string loading

mod loader;
mod types;

pub use loader::{load_config, load_config_str};
pub use types::{
    is_valid_wg_key, FleetConfig, LivenessConfig, LogConfig, PeerConfig, PortRangeConfig,
    TunnelConfig, WG_KEY_BYTES,
};

use std::io;

/// Error types for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}
