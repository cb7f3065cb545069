//! wg-fleet: WireGuard tunnel fleet manager
//!
//! Manages the lifecycle of a fleet of WireGuard tunnels on a single Linux
//! host. For each remote peer a client wishes to reach, the fleet
//! allocates a unique interface name, a local address from unused private
//! space and a listen port from the unused dynamic range, writes a
//! `wg-quick` configuration, brings the interface up, monitors handshake
//! liveness and tears everything down when the lease expires or the
//! tunnel is closed.
//!
//! # Architecture
//!
//! ```text
//! open(id, ...) → TunnelRegistry ──spawns──▶ tunnel actor
//!                      │                        │
//!                      │                 configure → up → monitor
//!                 Allocator ◀── ResourceScanner  │
//!                      │                         ▼
//!                   Driver  ◀────────────── teardown
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::{Duration, SystemTime};
//!
//! use wg_fleet::allocator::Allocator;
//! use wg_fleet::driver::WgQuickDriver;
//! use wg_fleet::registry::TunnelRegistry;
//! use wg_fleet::scanner::ResourceScanner;
//! use wg_fleet::tunnel::{PeerDescriptor, TunnelOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = Arc::new(WgQuickDriver::new());
//! let registry = TunnelRegistry::new(driver.clone());
//! let allocator = Allocator::default();
//! let scanner = ResourceScanner::new();
//!
//! let interface = allocator
//!     .lease(&scanner, driver.as_ref(), &registry.live_endpoints())
//!     .await?;
//! let peer = PeerDescriptor {
//!     ip_address: "10.0.0.3".parse()?,
//!     endpoint: "vpn.example.com".into(),
//!     port: 51820,
//!     public_key: "h2W8fjxUwZH+G8/Qp/H7kzn4SQz/EJIhOVFMh6mmtX4=".into(),
//!     persistent_keepalive: 25,
//! };
//! let opts = TunnelOptions {
//!     expires_at: Some(SystemTime::now() + Duration::from_secs(3600)),
//!     ..TunnelOptions::default()
//! };
//!
//! registry.open("tunnel-1", interface, peer, opts).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cidr`]: IPv4 CIDR arithmetic
//! - [`scanner`]: host interface and socket scans
//! - [`allocator`]: address and port allocation
//! - [`driver`]: OS driver seam (`wg`, `wg-quick`, sysfs) with a mock
//! - [`quick_config`]: `wg-quick` `.conf` codec with metadata extras
//! - [`tunnel`]: descriptors and the per-tunnel state machine
//! - [`registry`]: tunnel supervisor and lookup index
//! - [`config`]: daemon configuration
//! - [`error`]: aggregated error types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod allocator;
pub mod cidr;
pub mod config;
pub mod driver;
pub mod error;
pub mod quick_config;
pub mod registry;
pub mod scanner;
pub mod tunnel;

// Re-export commonly used types at the crate root
pub use allocator::{default_address_pools, AllocError, Allocator, DYNAMIC_PORT_RANGE};
pub use cidr::{Cidr, CidrError};
pub use config::{
    is_valid_wg_key, load_config, load_config_str, ConfigError, FleetConfig, WG_KEY_BYTES,
};
pub use driver::{CmdOutput, Driver, DriverError, KeyPair, MockDriver, WgQuickDriver};
pub use error::{FleetError, Result};
pub use quick_config::{CodecError, QuickConfig};
pub use registry::{RegistryError, TunnelHandle, TunnelRegistry};
pub use scanner::{ResourceScanner, ScanError};
pub use tunnel::{
    ExitReason, InterfaceDescriptor, LivenessPolicy, PeerDescriptor, Table, TunnelOptions,
    TunnelState, TunnelStatus, INTERFACE_ID_PREFIX,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
