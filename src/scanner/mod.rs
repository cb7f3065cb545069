//! Host resource scanner
//!
//! Stateless reads of what the host already occupies: IPv4 networks held by
//! existing interfaces, and UDP/TCP ports with live sockets. The allocator
//! subtracts both from its configured pools before picking anything.
//!
//! Interface enumeration goes through `getifaddrs` (via the `if-addrs`
//! crate); the socket scan shells out to `ss` with a filter expression
//! built from its documented syntax.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use if_addrs::IfAddr;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::cidr::{mask_prefix_len, Cidr};

/// Error types for resource scans
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Interface enumeration failed
    #[error("Failed to enumerate host interfaces: {0}")]
    Interfaces(#[from] std::io::Error),

    /// The socket listing tool could not be spawned
    #[error("Failed to run {command}: {reason}")]
    CommandFailed { command: String, reason: String },

    /// The socket listing tool exited non-zero
    #[error("{command} exited with status {code}: {stderr}")]
    CommandStatus {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Scanner over host interfaces and sockets
///
/// Carries no state; both scans read the OS fresh on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceScanner;

impl ResourceScanner {
    /// Create a new scanner
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// CIDRs currently reserved on this host
    ///
    /// For every interface with an IPv4 address and netmask, the containing
    /// network (`addr & mask` at the mask's prefix length) is reserved.
    /// The `/32`s of the supplied live tunnel addresses are appended so a
    /// new allocation also sees tunnels this process already holds.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::Interfaces` if interface enumeration fails.
    pub fn reserved_cidrs(&self, live_tunnel_addrs: &[Ipv4Addr]) -> Result<Vec<Cidr>, ScanError> {
        let mut reserved = Vec::new();

        for iface in if_addrs::get_if_addrs()? {
            let IfAddr::V4(v4) = &iface.addr else {
                continue;
            };
            let prefix_len = mask_prefix_len(u32::from(v4.netmask));
            let cidr = Cidr::new(v4.ip, prefix_len);
            trace!(interface = %iface.name, %cidr, "host interface network reserved");
            reserved.push(cidr);
        }

        for addr in live_tunnel_addrs {
            reserved.push(Cidr::new(*addr, 32));
        }

        debug!(count = reserved.len(), "collected reserved CIDRs");
        Ok(reserved)
    }

    /// Ports inside `range` that already have a socket
    ///
    /// Runs `ss -Htua` with a `sport >= :lo and sport <= :hi` filter and
    /// parses the local-port column (column 5, last colon-delimited token)
    /// of each line. The result is sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns `ScanError` if `ss` cannot be spawned or exits non-zero.
    /// Callers that can tolerate a blind allocation may treat that as an
    /// empty reserved set.
    pub async fn reserved_ports(&self, range: &RangeInclusive<u16>) -> Result<Vec<u16>, ScanError> {
        let lo = format!(":{}", range.start());
        let hi = format!(":{}", range.end());

        let output = Command::new("ss")
            .args(["-H", "-t", "-u", "-a", "sport", ">=", &lo, "and", "sport", "<=", &hi])
            .output()
            .await
            .map_err(|e| ScanError::CommandFailed {
                command: "ss".into(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ScanError::CommandStatus {
                command: "ss".into(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut ports = parse_socket_listing(&stdout, range);
        ports.sort_unstable();
        ports.dedup();

        debug!(count = ports.len(), lo = *range.start(), hi = *range.end(), "collected reserved ports");
        Ok(ports)
    }
}

/// Extract local ports from `ss -H` output, keeping only those in `range`
///
/// One socket per line; the local address is the fifth whitespace-separated
/// column and the port is its last colon-delimited token (which also copes
/// with IPv6 `[::]:port` forms).
fn parse_socket_listing(stdout: &str, range: &RangeInclusive<u16>) -> Vec<u16> {
    stdout
        .lines()
        .filter_map(|line| {
            let local = line.split_whitespace().nth(4)?;
            let port = local.rsplit(':').next()?.parse::<u16>().ok()?;
            range.contains(&port).then_some(port)
        })
        .collect()
}
