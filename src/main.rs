//! wg-fleet daemon
//!
//! Loads a JSON configuration, opens the tunnels it lists and supervises
//! them until SIGINT, then tears everything down.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! sudo ./wg-fleet
//!
//! # Run with a custom configuration
//! sudo ./wg-fleet -c /path/to/config.json
//!
//! # Validate a configuration without starting
//! ./wg-fleet -c /path/to/config.json --check
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wg_fleet::allocator::Allocator;
use wg_fleet::config::{load_config, FleetConfig, TunnelConfig};
use wg_fleet::driver::WgQuickDriver;
use wg_fleet::registry::TunnelRegistry;
use wg_fleet::scanner::ResourceScanner;
use wg_fleet::tunnel::{PeerDescriptor, TunnelOptions};

/// How long shutdown waits for tunnels to tear down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/wg-fleet/config.json");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-V" | "--version" => {
                    println!("wg-fleet {}", wg_fleet::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    print_help();
                    std::process::exit(2);
                }
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        "wg-fleet {} - WireGuard tunnel fleet manager

USAGE:
    wg-fleet [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file [default: /etc/wg-fleet/config.json]
        --check            Validate the configuration and exit
    -h, --help             Print help
    -V, --version          Print version",
        wg_fleet::VERSION
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.check_config {
        info!(path = %args.config_path.display(), "configuration is valid");
        return Ok(());
    }

    info!(version = wg_fleet::VERSION, "starting wg-fleet");

    let driver = Arc::new(WgQuickDriver::new());
    let registry = TunnelRegistry::new(driver.clone());
    let scanner = ResourceScanner::new();
    let allocator = Allocator::new(
        config.address_pools.clone(),
        config.port_range.as_range(),
    );

    for tunnel in &config.tunnels {
        if let Err(e) = open_tunnel(&config, tunnel, &registry, &allocator, &scanner, driver.as_ref()).await
        {
            error!(tunnel = %tunnel.id, error = %e, "failed to open tunnel");
        }
    }

    info!(tunnels = registry.list().len(), "fleet running; waiting for SIGINT");
    signal::ctrl_c().await?;

    info!("shutting down");
    registry.close_all(SHUTDOWN_TIMEOUT).await;

    Ok(())
}

async fn open_tunnel(
    config: &FleetConfig,
    tunnel: &TunnelConfig,
    registry: &TunnelRegistry,
    allocator: &Allocator,
    scanner: &ResourceScanner,
    driver: &WgQuickDriver,
) -> Result<()> {
    let interface = allocator
        .lease(scanner, driver, &registry.live_endpoints())
        .await?;

    let peer = PeerDescriptor {
        ip_address: tunnel.peer.ip_address,
        endpoint: tunnel.peer.endpoint.clone(),
        port: tunnel.peer.port,
        public_key: tunnel.peer.public_key.clone(),
        persistent_keepalive: tunnel.peer.persistent_keepalive,
    };

    let id = tunnel.id.clone();
    let opts = TunnelOptions {
        data_dir: config.data_dir.clone(),
        hooks: tunnel.hooks.clone(),
        expires_at: Some(SystemTime::now() + Duration::from_secs(tunnel.ttl_secs)),
        liveness: config.liveness.as_policy(),
        on_exit: Some(Arc::new(move |reason| {
            warn!(tunnel = %id, %reason, "tunnel exited");
        })),
        ..TunnelOptions::default()
    };

    registry.open(&tunnel.id, interface, peer, opts).await?;
    Ok(())
}
