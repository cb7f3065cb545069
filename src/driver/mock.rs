//! Deterministic driver for tests
//!
//! Behaves like a host where every interface operation succeeds, except for
//! the interface literally named `"failure"`, whose command-shaped
//! operations exit 1. Config files are really written and removed so tests
//! can assert on the filesystem.
//!
//! Statistics are fixed: 27 packets received, 8 transmitted, last
//! handshake at unix second 1656345389.

use async_trait::async_trait;

use crate::quick_config::QuickConfig;
use crate::tunnel::{InterfaceDescriptor, PeerDescriptor, TunnelOptions};

use super::{list_conf_files, remove_conf, write_conf, CmdOutput, Driver, DriverError, KeyPair};

/// Interface name whose operations fail
pub const FAILING_INTERFACE: &str = "failure";

/// Fixed received-packet counter
pub const MOCK_RX_PACKETS: u64 = 27;

/// Fixed transmitted-packet counter
pub const MOCK_TX_PACKETS: u64 = 8;

/// Fixed latest-handshake timestamp
pub const MOCK_LAST_HANDSHAKE: u64 = 1_656_345_389;

/// Test double for [`Driver`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MockDriver;

impl MockDriver {
    /// Create a new mock driver
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command_result(name: &str) -> CmdOutput {
        if name == FAILING_INTERFACE {
            CmdOutput {
                stdout: String::new(),
                code: 1,
            }
        } else {
            CmdOutput::ok("")
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn create_interface(&self, name: &str) -> Result<CmdOutput, DriverError> {
        Ok(Self::command_result(name))
    }

    async fn configure_wireguard(
        &self,
        tunnel_id: &str,
        interface: &InterfaceDescriptor,
        peer: &PeerDescriptor,
        opts: &TunnelOptions,
    ) -> Result<(), DriverError> {
        write_conf(tunnel_id, interface, peer, opts).await
    }

    async fn bring_up_interface(
        &self,
        name: &str,
        _opts: &TunnelOptions,
    ) -> Result<CmdOutput, DriverError> {
        Ok(Self::command_result(name))
    }

    async fn teardown_interface(
        &self,
        name: &str,
        opts: &TunnelOptions,
    ) -> Result<CmdOutput, DriverError> {
        remove_conf(name, opts).await;
        Ok(Self::command_result(name))
    }

    async fn list_interfaces(&self, opts: &TunnelOptions) -> Result<Vec<QuickConfig>, DriverError> {
        list_conf_files(opts).await
    }

    async fn generate_key_pair(&self) -> Result<KeyPair, DriverError> {
        Ok(KeyPair {
            private_key: "2PSyTqm+3rXzUK+T8jBhgZp9UHjFkgVZv4bXncWMyXY=".to_string(),
            public_key: "Pu7ymHtDqF4X9VNjVj9mYFBh/z7LGxY6VQJAGiSEgTM=".to_string(),
        })
    }

    async fn rx_packet_stats(&self, _name: &str) -> Result<u64, DriverError> {
        Ok(MOCK_RX_PACKETS)
    }

    async fn tx_packet_stats(&self, _name: &str) -> Result<u64, DriverError> {
        Ok(MOCK_TX_PACKETS)
    }

    async fn wg_latest_handshakes(&self, _name: &str) -> Result<u64, DriverError> {
        Ok(MOCK_LAST_HANDSHAKE)
    }

    fn interface_exists(&self, name: &str) -> bool {
        name != FAILING_INTERFACE
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::tunnel::Table;

    use super::*;

    fn parts(id: &str) -> (InterfaceDescriptor, PeerDescriptor) {
        let interface = InterfaceDescriptor {
            id: id.to_string(),
            ip_address: Ipv4Addr::new(10, 0, 0, 1),
            port: 51820,
            private_key: "priv".into(),
            public_key: "pub".into(),
            table: Table::Auto,
        };
        let peer = PeerDescriptor {
            ip_address: Ipv4Addr::new(10, 0, 0, 3),
            endpoint: "203.0.113.9".into(),
            port: 51821,
            public_key: "peer-pub".into(),
            persistent_keepalive: 25,
        };
        (interface, peer)
    }

    #[tokio::test]
    async fn test_mock_failure_name() {
        let driver = MockDriver::new();
        let opts = TunnelOptions::default();
        let up = driver.bring_up_interface("failure", &opts).await.unwrap();
        assert_eq!(up.code, 1);
        let up = driver.bring_up_interface("peridio-AAAAAAA", &opts).await.unwrap();
        assert!(up.success());
        assert!(!driver.interface_exists("failure"));
        assert!(driver.interface_exists("peridio-AAAAAAA"));

        let created = driver.create_interface("peridio-AAAAAAA").await.unwrap();
        assert!(created.success());
        let created = driver.create_interface("failure").await.unwrap();
        assert_eq!(created.code, 1);
    }

    #[tokio::test]
    async fn test_mock_deterministic_stats() {
        let driver = MockDriver::new();
        assert_eq!(driver.rx_packet_stats("any").await.unwrap(), 27);
        assert_eq!(driver.tx_packet_stats("any").await.unwrap(), 8);
        assert_eq!(driver.wg_latest_handshakes("any").await.unwrap(), 1_656_345_389);
    }

    #[tokio::test]
    async fn test_mock_conf_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let opts = TunnelOptions::with_data_dir(dir.path());
        let driver = MockDriver::new();
        let (interface, peer) = parts("peridio-TESTAAA");

        driver
            .configure_wireguard("t1", &interface, &peer, &opts)
            .await
            .unwrap();
        let conf = opts.conf_path("peridio-TESTAAA");
        assert!(conf.exists());

        let listed = driver.list_interfaces(&opts).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].tunnel_id(), Some("t1"));

        driver.teardown_interface("peridio-TESTAAA", &opts).await.unwrap();
        assert!(!conf.exists());
    }
}
