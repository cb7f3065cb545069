//! OS driver seam
//!
//! Everything that touches the operating system — `wg`, `wg-quick`, `ip`,
//! sysfs — sits behind the [`Driver`] trait so the tunnel lifecycle can be
//! exercised in tests without privileges or kernel modules.
//!
//! # Implementations
//!
//! - [`WgQuickDriver`]: shells out to the real tools
//! - [`MockDriver`]: deterministic stand-in for tests
//!
//! # Contract
//!
//! Command-shaped operations return a [`CmdOutput`] even on non-zero exit;
//! a `DriverError` means the operation could not be attempted at all
//! (binary missing, I/O failure). Callers decide what a non-zero exit code
//! means for them.

use std::path::Path;

use async_trait::async_trait;

use crate::quick_config::QuickConfig;
use crate::tunnel::{InterfaceDescriptor, PeerDescriptor, TunnelOptions};

mod mock;
mod wg_quick;

pub use mock::MockDriver;
pub use wg_quick::WgQuickDriver;

/// Error types for driver operations
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The external tool could not be spawned
    #[error("Failed to run {command}: {reason}")]
    CommandFailed { command: String, reason: String },

    /// A filesystem operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Output from an external tool could not be parsed
    #[error("Failed to parse output of {command}: {reason}")]
    ParseFailed { command: String, reason: String },
}

impl DriverError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Captured stdout and exit code of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    /// Captured standard output
    pub stdout: String,
    /// Process exit code (`-1` when terminated by signal)
    pub code: i32,
}

impl CmdOutput {
    /// Whether the command exited zero
    #[must_use]
    pub const fn success(&self) -> bool {
        self.code == 0
    }

    pub(crate) fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            code: 0,
        }
    }
}

/// A generated WireGuard key pair, base64 and trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    /// Base64 private key
    pub private_key: String,
    /// Base64 public key
    pub public_key: String,
}

/// Operations the tunnel lifecycle needs from the operating system
#[async_trait]
pub trait Driver: Send + Sync {
    /// Create a bare WireGuard kernel interface
    async fn create_interface(&self, name: &str) -> Result<CmdOutput, DriverError>;

    /// Write the tunnel's `.conf` to `opts.data_dir()/<name>.conf`
    async fn configure_wireguard(
        &self,
        tunnel_id: &str,
        interface: &InterfaceDescriptor,
        peer: &PeerDescriptor,
        opts: &TunnelOptions,
    ) -> Result<(), DriverError>;

    /// `wg-quick up` on the interface's `.conf`
    async fn bring_up_interface(
        &self,
        name: &str,
        opts: &TunnelOptions,
    ) -> Result<CmdOutput, DriverError>;

    /// `wg-quick down` on the interface's `.conf`
    ///
    /// The `.conf` file is removed regardless of the command's exit code.
    async fn teardown_interface(
        &self,
        name: &str,
        opts: &TunnelOptions,
    ) -> Result<CmdOutput, DriverError>;

    /// Parse every `.conf` in the data directory
    ///
    /// Files that fail to decode are skipped.
    async fn list_interfaces(&self, opts: &TunnelOptions) -> Result<Vec<QuickConfig>, DriverError>;

    /// Generate a WireGuard key pair
    async fn generate_key_pair(&self) -> Result<KeyPair, DriverError>;

    /// Received-packet counter of the interface
    async fn rx_packet_stats(&self, name: &str) -> Result<u64, DriverError>;

    /// Transmitted-packet counter of the interface
    async fn tx_packet_stats(&self, name: &str) -> Result<u64, DriverError>;

    /// Unix timestamp of the latest peer handshake; `0` when there has
    /// never been one
    async fn wg_latest_handshakes(&self, name: &str) -> Result<u64, DriverError>;

    /// Whether the kernel interface currently exists
    fn interface_exists(&self, name: &str) -> bool;
}

/// Shared `.conf` directory listing used by both driver implementations
pub(crate) async fn list_conf_files(opts: &TunnelOptions) -> Result<Vec<QuickConfig>, DriverError> {
    let dir = opts.data_dir();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DriverError::io(&dir, e)),
    };

    let mut configs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DriverError::io(&dir, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "conf") {
            match crate::quick_config::decode_file(&path) {
                Ok(cfg) => configs.push(cfg),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable config");
                }
            }
        }
    }
    Ok(configs)
}

/// Shared `.conf` write used by both driver implementations
pub(crate) async fn write_conf(
    tunnel_id: &str,
    interface: &InterfaceDescriptor,
    peer: &PeerDescriptor,
    opts: &TunnelOptions,
) -> Result<(), DriverError> {
    // The tunnel identity rides in its own extra section so a restarted
    // process can match files back to tunnels.
    let mut opts_with_identity = opts.clone();
    opts_with_identity.extra.insert(
        0,
        (
            crate::quick_config::TUNNEL_SECTION.to_string(),
            vec![(crate::quick_config::TUNNEL_ID_KEY.to_string(), tunnel_id.to_string())],
        ),
    );

    let cfg = QuickConfig::from_parts(interface, peer, &opts_with_identity);
    let path = opts.conf_path(&interface.id);
    tokio::fs::write(&path, crate::quick_config::encode(&cfg))
        .await
        .map_err(|e| DriverError::io(&path, e))
}

/// Shared `.conf` removal used by both driver implementations
pub(crate) async fn remove_conf(name: &str, opts: &TunnelOptions) {
    let path = opts.conf_path(name);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove config file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_output_success() {
        assert!(CmdOutput::ok("").success());
        assert!(!CmdOutput { stdout: String::new(), code: 1 }.success());
    }
}
