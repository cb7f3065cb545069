//! Configuration types
//!
//! Loaded from JSON and validated at startup. Defaults match the spec'd
//! pools: RFC 1918 address space and the RFC 6335 dynamic port range.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::allocator::default_address_pools;
use crate::cidr::Cidr;
use crate::tunnel::LivenessPolicy;

use super::ConfigError;

/// WireGuard keys are Curve25519 keys: 32 bytes
pub const WG_KEY_BYTES: usize = 32;

/// Check that a string is the base64 form of a WireGuard key
///
/// The key must decode and the decoded form must be exactly 32 bytes.
#[must_use]
pub fn is_valid_wg_key(key: &str) -> bool {
    BASE64_STD
        .decode(key)
        .is_ok_and(|bytes| bytes.len() == WG_KEY_BYTES)
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetConfig {
    /// Directory for `.conf` files; the system temp dir when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Address pools to allocate tunnel addresses from
    #[serde(default = "default_address_pools")]
    pub address_pools: Vec<Cidr>,

    /// Port range to allocate listen ports from
    #[serde(default)]
    pub port_range: PortRangeConfig,

    /// Liveness-check policy
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Tunnels to open at start
    #[serde(default)]
    pub tunnels: Vec<TunnelConfig>,
}

impl FleetConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address_pools.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one address pool must be configured".into(),
            ));
        }

        self.port_range.validate()?;
        self.liveness.validate()?;

        let mut ids: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for tunnel in &self.tunnels {
            tunnel.validate()?;
            if !ids.insert(&tunnel.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate tunnel id: {}",
                    tunnel.id
                )));
            }
        }

        Ok(())
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            address_pools: default_address_pools(),
            port_range: PortRangeConfig::default(),
            liveness: LivenessConfig::default(),
            log: LogConfig::default(),
            tunnels: Vec::new(),
        }
    }
}

/// Inclusive port range for allocation
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct PortRangeConfig {
    /// First port (inclusive)
    pub start: u16,
    /// Last port (inclusive)
    pub end: u16,
}

impl PortRangeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.start > self.end {
            return Err(ConfigError::ValidationError(format!(
                "Invalid port range: {}-{}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// The range as `RangeInclusive`
    #[must_use]
    pub const fn as_range(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        // RFC 6335 dynamic range.
        Self {
            start: 49152,
            end: 65535,
        }
    }
}

/// Liveness-check knobs
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct LivenessConfig {
    /// Seconds before the first check
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Seconds between checks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// How recent the latest handshake must be, in seconds
    #[serde(default = "default_handshake_window_secs")]
    pub handshake_window_secs: u64,
    /// Stop stale tunnels instead of only logging them
    #[serde(default)]
    pub stop_on_stale: bool,
}

fn default_grace_secs() -> u64 {
    600
}

fn default_interval_secs() -> u64 {
    60
}

fn default_handshake_window_secs() -> u64 {
    300
}

impl LivenessConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "Liveness interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Convert into the tunnel-level policy
    #[must_use]
    pub fn as_policy(&self) -> LivenessPolicy {
        LivenessPolicy {
            grace: Duration::from_secs(self.grace_secs),
            interval: Duration::from_secs(self.interval_secs),
            handshake_window: Duration::from_secs(self.handshake_window_secs),
            stop_on_stale: self.stop_on_stale,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            interval_secs: default_interval_secs(),
            handshake_window_secs: default_handshake_window_secs(),
            stop_on_stale: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One tunnel to open at start
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Application tunnel identifier
    pub id: String,
    /// Remote peer
    pub peer: PeerConfig,
    /// Lease duration in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Extra `[Interface]` hooks (`PreUp`, `PostUp`, ...)
    #[serde(default)]
    pub hooks: Vec<(String, String)>,
}

fn default_ttl_secs() -> u64 {
    3600
}

impl TunnelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::ValidationError("Tunnel id must not be empty".into()));
        }
        self.peer.validate(&self.id)
    }
}

/// Remote peer of a configured tunnel
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerConfig {
    /// Peer tunnel address (always treated as `/32`)
    pub ip_address: Ipv4Addr,
    /// Endpoint host
    pub endpoint: String,
    /// Endpoint UDP port
    pub port: u16,
    /// Base64 WireGuard public key
    pub public_key: String,
    /// Keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,
}

fn default_keepalive() -> u16 {
    25
}

impl PeerConfig {
    fn validate(&self, tunnel_id: &str) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Tunnel {tunnel_id}: peer endpoint must not be empty"
            )));
        }
        if !is_valid_wg_key(&self.public_key) {
            return Err(ConfigError::ValidationError(format!(
                "Tunnel {tunnel_id}: peer public key is not a base64 WireGuard key"
            )));
        }
        Ok(())
    }
}
