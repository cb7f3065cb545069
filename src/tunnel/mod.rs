//! Tunnel descriptors and lifecycle types
//!
//! This module defines the value types a tunnel is made of — the local
//! interface descriptor, the remote peer descriptor, per-tunnel options —
//! and the actor that runs one tunnel's lifecycle.
//!
//! # Submodules
//!
//! - [`actor`]: the per-tunnel state machine task
//!
//! # Interface naming
//!
//! Every tunnel owns one kernel interface named `peridio-` followed by a
//! seven character base32 suffix derived from four random bytes, keeping
//! the name well under Linux's 15 character limit.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::RngCore;

pub mod actor;

pub use actor::TunnelState;

/// Prefix of every tunnel interface name
pub const INTERFACE_ID_PREFIX: &str = "peridio-";

/// Length of the random interface-id suffix
pub const INTERFACE_ID_SUFFIX_LEN: usize = 7;

/// RFC 4648 base32 alphabet, no padding
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Routing-table behaviour for `wg-quick`
///
/// `Auto` lets `wg-quick` manage routes; `Off` suppresses them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Table {
    /// Let `wg-quick` pick and populate a routing table
    #[default]
    Auto,
    /// Do not touch routing tables
    Off,
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Off => write!(f, "off"),
        }
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown table mode: {other}")),
        }
    }
}

/// Local side of a tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// Interface name, `peridio-` plus a random suffix
    pub id: String,
    /// Local tunnel address
    pub ip_address: Ipv4Addr,
    /// UDP listen port
    pub port: u16,
    /// Base64 WireGuard private key
    pub private_key: String,
    /// Base64 WireGuard public key
    pub public_key: String,
    /// Routing-table behaviour (default auto)
    pub table: Table,
}

impl InterfaceDescriptor {
    /// Generate a fresh interface id
    ///
    /// # Example
    ///
    /// ```
    /// use wg_fleet::tunnel::{InterfaceDescriptor, INTERFACE_ID_PREFIX};
    ///
    /// let id = InterfaceDescriptor::generate_id();
    /// assert!(id.starts_with(INTERFACE_ID_PREFIX));
    /// assert_eq!(id.len(), INTERFACE_ID_PREFIX.len() + 7);
    /// ```
    #[must_use]
    pub fn generate_id() -> String {
        let mut bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{INTERFACE_ID_PREFIX}{}", base32_suffix(bytes))
    }
}

/// Encode four bytes as seven unpadded base32 characters
fn base32_suffix(bytes: [u8; 4]) -> String {
    // 32 bits shifted up to 35 so they split into seven 5-bit groups.
    let value = u64::from(u32::from_be_bytes(bytes)) << 3;
    (0..INTERFACE_ID_SUFFIX_LEN)
        .map(|i| {
            let shift = 5 * (INTERFACE_ID_SUFFIX_LEN - 1 - i);
            BASE32_ALPHABET[((value >> shift) & 0x1F) as usize] as char
        })
        .collect()
}

/// Remote side of a tunnel
///
/// The peer's tunnel address is always treated as a `/32` allowed IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    /// Peer tunnel address (emitted as `<ip>/32`)
    pub ip_address: Ipv4Addr,
    /// Endpoint host (name or address, without port)
    pub endpoint: String,
    /// Endpoint UDP port
    pub port: u16,
    /// Base64 WireGuard public key
    pub public_key: String,
    /// Keepalive interval in seconds
    pub persistent_keepalive: u16,
}

impl PeerDescriptor {
    /// `host:port` endpoint string as written into the config
    #[must_use]
    pub fn endpoint_addr(&self) -> String {
        format!("{}:{}", self.endpoint, self.port)
    }
}

/// Why a tunnel stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Explicit close or clean shutdown
    Normal,
    /// The lease expired
    TtlTimeout,
    /// The kernel interface never appeared after bring-up
    InterfaceTimeout,
    /// Liveness checks classified the tunnel as stale (only when
    /// stall-driven shutdown is enabled)
    Stale,
    /// Writing the configuration failed
    DeviceConfigure,
    /// `wg-quick up` failed
    DeviceUp,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::TtlTimeout => write!(f, "ttl_timeout"),
            Self::InterfaceTimeout => write!(f, "interface_timeout"),
            Self::Stale => write!(f, "stale"),
            Self::DeviceConfigure => write!(f, "device_error_interface_configure"),
            Self::DeviceUp => write!(f, "device_error_interface_up"),
        }
    }
}

/// Lifecycle phase of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    /// Configured; waiting for the kernel interface to appear
    Start,
    /// Kernel interface present and monitored
    Up,
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Up => write!(f, "up"),
        }
    }
}

/// Liveness-check policy
#[derive(Debug, Clone)]
pub struct LivenessPolicy {
    /// Delay before the first check
    pub grace: Duration,
    /// Interval between checks after the grace period
    pub interval: Duration,
    /// How recent the latest handshake must be to count as alive
    pub handshake_window: Duration,
    /// Stop the tunnel when a check classifies it as stale; when false
    /// (the default) staleness is only logged
    pub stop_on_stale: bool,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(600),
            interval: Duration::from_secs(60),
            handshake_window: Duration::from_secs(300),
            stop_on_stale: false,
        }
    }
}

/// Classify a tunnel's traffic counters as stale or live
///
/// - nothing sent, nothing received, no handshake: still setting up;
/// - sending without any handshake: stale;
/// - handshake inside the window: live;
/// - anything else: stale.
#[must_use]
pub fn is_stale(
    rx_packets: u64,
    tx_packets: u64,
    last_handshake: u64,
    now_unix: u64,
    handshake_window: Duration,
) -> bool {
    if rx_packets == 0 && tx_packets == 0 && last_handshake == 0 {
        return false;
    }
    if rx_packets == 0 && last_handshake == 0 {
        return true;
    }
    now_unix.saturating_sub(last_handshake) > handshake_window.as_secs()
}

/// Callback invoked with the exit reason after teardown
pub type ExitCallback = Arc<dyn Fn(ExitReason) + Send + Sync>;

/// Per-tunnel options
#[derive(Clone, Default)]
pub struct TunnelOptions {
    /// Directory for `.conf` files; `None` means the system temp dir
    pub data_dir: Option<PathBuf>,
    /// Extra `[Interface]` pairs, typically `PreUp`/`PostUp`/`PreDown`/
    /// `PostDown` hooks
    pub hooks: Vec<(String, String)>,
    /// Additional extra sections carried through the `.conf`
    pub extra: Vec<(String, Vec<(String, String)>)>,
    /// Absolute expiry; `None` disables the TTL timer
    pub expires_at: Option<SystemTime>,
    /// Invoked with the exit reason once teardown has run
    pub on_exit: Option<ExitCallback>,
    /// Liveness-check policy
    pub liveness: LivenessPolicy,
}

impl TunnelOptions {
    /// Effective config directory
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Path of the `.conf` file for an interface
    #[must_use]
    pub fn conf_path(&self, interface_id: &str) -> PathBuf {
        self.data_dir().join(format!("{interface_id}.conf"))
    }

    /// Convenience builder for the common case
    #[must_use]
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }
}

impl fmt::Debug for TunnelOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelOptions")
            .field("data_dir", &self.data_dir)
            .field("hooks", &self.hooks)
            .field("extra", &self.extra)
            .field("expires_at", &self.expires_at)
            .field("on_exit", &self.on_exit.as_ref().map(|_| "<callback>"))
            .field("liveness", &self.liveness)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_shape() {
        let id = InterfaceDescriptor::generate_id();
        assert!(id.starts_with(INTERFACE_ID_PREFIX));
        let suffix = &id[INTERFACE_ID_PREFIX.len()..];
        assert_eq!(suffix.len(), INTERFACE_ID_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| BASE32_ALPHABET.contains(&b)));
        // Interface names must fit IFNAMSIZ - 1.
        assert!(id.len() <= 15);
    }

    #[test]
    fn test_generate_id_varies() {
        let a = InterfaceDescriptor::generate_id();
        let b = InterfaceDescriptor::generate_id();
        // Four random bytes; a collision here is a one-in-four-billion event.
        assert_ne!(a, b);
    }

    #[test]
    fn test_base32_suffix_known_values() {
        assert_eq!(base32_suffix([0, 0, 0, 0]), "AAAAAAA");
        assert_eq!(base32_suffix([0xFF, 0xFF, 0xFF, 0xFF]), "7777777");
        // 0xDEADBEEF shifted left 3 splits into
        // 11011 11010 10110 11011 11101 11011 11000
        assert_eq!(base32_suffix([0xDE, 0xAD, 0xBE, 0xEF]), "32W353Y");
    }

    #[test]
    fn test_table_roundtrip() {
        assert_eq!("auto".parse::<Table>().unwrap(), Table::Auto);
        assert_eq!("off".parse::<Table>().unwrap(), Table::Off);
        assert_eq!(Table::Off.to_string(), "off");
        assert!("on".parse::<Table>().is_err());
        assert_eq!(Table::default(), Table::Auto);
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(ExitReason::TtlTimeout.to_string(), "ttl_timeout");
        assert_eq!(ExitReason::InterfaceTimeout.to_string(), "interface_timeout");
        assert_eq!(
            ExitReason::DeviceConfigure.to_string(),
            "device_error_interface_configure"
        );
        assert_eq!(ExitReason::DeviceUp.to_string(), "device_error_interface_up");
    }

    #[test]
    fn test_is_stale_classification() {
        let window = Duration::from_secs(300);
        let now = 1_700_000_000;

        // Nothing has happened yet: still setting up.
        assert!(!is_stale(0, 0, 0, now, window));
        // Sending without a handshake ever completing.
        assert!(is_stale(0, 12, 0, now, window));
        // Recent handshake.
        assert!(!is_stale(10, 10, now - 60, now, window));
        // Handshake exactly at the window edge still counts.
        assert!(!is_stale(10, 10, now - 300, now, window));
        // Old handshake.
        assert!(is_stale(10, 10, now - 301, now, window));
        // Receiving but the handshake timestamp was never recorded.
        assert!(is_stale(27, 8, 0, now, window));
    }

    #[test]
    fn test_conf_path_defaults_to_temp_dir() {
        let opts = TunnelOptions::default();
        let path = opts.conf_path("peridio-AAAAAAA");
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(path.file_name().unwrap(), "peridio-AAAAAAA.conf");
    }

    #[test]
    fn test_peer_endpoint_addr() {
        let peer = PeerDescriptor {
            ip_address: Ipv4Addr::new(10, 0, 0, 3),
            endpoint: "vpn.example.com".into(),
            port: 51820,
            public_key: "h2W8fjxUwZH+G8/Qp/H7kzn4SQz/EJIhOVFMh6mmtX4=".into(),
            persistent_keepalive: 25,
        };
        assert_eq!(peer.endpoint_addr(), "vpn.example.com:51820");
    }
}
