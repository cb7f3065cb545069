//! Tunnel address and port allocation
//!
//! Combines the configured private-address pools and dynamic-port range
//! with what the [`crate::scanner`] reports as already in use, and picks
//! one local address and one listen port for a new tunnel.
//!
//! # Pools
//!
//! By default addresses come from the RFC 1918 blocks and ports from the
//! RFC 6335 dynamic range (49152..=65535).
//!
//! # Degradation
//!
//! A failing socket scan downgrades to an empty reserved-port set with a
//! warning: picks are still checked against the tunnels this process
//! already runs, so the worst case is colliding with an unrelated busy
//! port, which bring-up surfaces.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use rand::Rng;
use tracing::{debug, warn};

use crate::cidr::Cidr;
use crate::driver::{Driver, DriverError};
use crate::scanner::{ResourceScanner, ScanError};
use crate::tunnel::InterfaceDescriptor;

/// Dynamic port range (RFC 6335)
pub const DYNAMIC_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Attempts before declaring a pool exhausted
const PICK_ATTEMPTS: usize = 16;

/// The RFC 1918 private address blocks
#[must_use]
pub fn default_address_pools() -> Vec<Cidr> {
    ["172.16.0.0/12", "192.168.0.0/16", "10.0.0.0/8"]
        .iter()
        .map(|s| s.parse().expect("static pool CIDR"))
        .collect()
}

/// Error types for allocation
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// Address pools exhausted after reservations
    #[error("No free address available in the configured pools")]
    NoFreeAddress,

    /// Port range exhausted after reservations
    #[error("No free port available in the configured range")]
    NoFreePort,

    /// Host interface scan failed
    #[error("Resource scan failed: {0}")]
    Scan(#[from] ScanError),

    /// Key generation failed
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Allocator over configured pools
#[derive(Debug, Clone)]
pub struct Allocator {
    pools: Vec<Cidr>,
    port_range: RangeInclusive<u16>,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(default_address_pools(), DYNAMIC_PORT_RANGE)
    }
}

impl Allocator {
    /// Create an allocator over explicit pools
    #[must_use]
    pub fn new(pools: Vec<Cidr>, port_range: RangeInclusive<u16>) -> Self {
        Self { pools, port_range }
    }

    /// The free CIDR blocks: pools minus every overlapping reservation
    #[must_use]
    pub fn available_cidrs(&self, reserved: &[Cidr]) -> Vec<Cidr> {
        let mut free = Vec::new();
        for pool in &self.pools {
            let overlapping: Vec<&Cidr> =
                reserved.iter().filter(|r| pool.overlaps(r)).collect();
            if overlapping.is_empty() {
                free.push(*pool);
                continue;
            }

            let mut blocks = vec![*pool];
            for r in overlapping {
                blocks = blocks
                    .into_iter()
                    .flat_map(|b| b.left_difference(r))
                    .collect();
            }
            free.extend(blocks);
        }
        free
    }

    /// The free port sub-ranges: the configured range minus reservations
    #[must_use]
    pub fn available_ports(&self, reserved: &[u16]) -> Vec<RangeInclusive<u16>> {
        let mut reserved = reserved.to_vec();
        reserved.sort_unstable();
        reserved.dedup();
        split_range(self.port_range.clone(), &reserved)
    }

    /// Pick one address and one port, checked against live tunnels
    ///
    /// # Errors
    ///
    /// Returns `AllocError::NoFreeAddress` / `AllocError::NoFreePort` when
    /// the pools are exhausted, and `AllocError::Scan` when interface
    /// enumeration fails. A failing port scan degrades to an empty
    /// reserved set instead of erroring.
    pub async fn allocate(
        &self,
        scanner: &ResourceScanner,
        live: &[(Ipv4Addr, u16)],
    ) -> Result<(Ipv4Addr, u16), AllocError> {
        let live_addrs: Vec<Ipv4Addr> = live.iter().map(|(ip, _)| *ip).collect();
        let reserved_cidrs = scanner.reserved_cidrs(&live_addrs)?;

        let reserved_ports = match scanner.reserved_ports(&self.port_range).await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "port scan failed; assuming no ports reserved");
                Vec::new()
            }
        };

        let free_cidrs = self.available_cidrs(&reserved_cidrs);
        let free_ports = self.available_ports(&reserved_ports);

        let address = pick_address(&free_cidrs, &live_addrs).ok_or(AllocError::NoFreeAddress)?;
        let live_ports: Vec<u16> = live.iter().map(|(_, p)| *p).collect();
        let port = pick_port(&free_ports, &live_ports).ok_or(AllocError::NoFreePort)?;

        debug!(%address, port, "allocated tunnel endpoint");
        Ok((address, port))
    }

    /// Allocate a complete local interface descriptor
    ///
    /// Picks the address and port, generates a fresh interface id and asks
    /// the driver for a key pair.
    ///
    /// # Errors
    ///
    /// Propagates allocation and key-generation failures.
    pub async fn lease(
        &self,
        scanner: &ResourceScanner,
        driver: &dyn Driver,
        live: &[(Ipv4Addr, u16)],
    ) -> Result<InterfaceDescriptor, AllocError> {
        let (ip_address, port) = self.allocate(scanner, live).await?;
        let keys = driver.generate_key_pair().await?;

        Ok(InterfaceDescriptor {
            id: InterfaceDescriptor::generate_id(),
            ip_address,
            port,
            private_key: keys.private_key,
            public_key: keys.public_key,
            table: crate::tunnel::Table::default(),
        })
    }
}

/// Partition `range` into the maximal sub-ranges not containing any
/// element of `reserved`
///
/// `reserved` must be sorted; elements outside the range are ignored.
/// The union of the result equals the range minus the reserved set, and
/// the sub-ranges are pairwise disjoint.
#[must_use]
pub fn split_range(range: RangeInclusive<u16>, reserved: &[u16]) -> Vec<RangeInclusive<u16>> {
    let (mut lo, hi) = (*range.start(), *range.end());
    let mut out = Vec::new();

    for &p in reserved {
        if p < lo || p > hi {
            continue;
        }
        if p > lo {
            out.push(lo..=p - 1);
        }
        if p == u16::MAX {
            return out;
        }
        lo = p + 1;
    }

    if lo <= hi {
        out.push(lo..=hi);
    }
    out
}

/// Uniformly pick a free block, then a host address inside it
///
/// The block's first and last addresses are excluded, so blocks smaller
/// than four addresses are never picked from. Live-tunnel collisions are
/// rejected and retried.
fn pick_address(free: &[Cidr], live: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    let usable: Vec<&Cidr> = free.iter().filter(|c| c.addresses() > 2).collect();
    if usable.is_empty() {
        return None;
    }

    let mut rng = rand::thread_rng();
    for _ in 0..PICK_ATTEMPTS {
        let block = usable[rng.gen_range(0..usable.len())];
        let (start, _) = block.range();
        let offset = rng.gen_range(1..block.addresses() - 1);
        let addr = Ipv4Addr::from(start + offset as u32);
        if !live.contains(&addr) {
            return Some(addr);
        }
    }
    None
}

/// Uniformly pick a free sub-range, then a port inside it
fn pick_port(free: &[RangeInclusive<u16>], live: &[u16]) -> Option<u16> {
    if free.is_empty() {
        return None;
    }

    let mut rng = rand::thread_rng();
    for _ in 0..PICK_ATTEMPTS {
        let sub = &free[rng.gen_range(0..free.len())];
        let port = rng.gen_range(*sub.start()..=*sub.end());
        if !live.contains(&port) {
            return Some(port);
        }
    }
    None
}
