//! Driver backed by the real WireGuard tooling
//!
//! Shells out to `wg`, `wg-quick` and `ip`, and reads interface state from
//! `/sys/class/net`. Requires the tools on `PATH` and enough privilege to
//! manage interfaces; tests use [`super::MockDriver`] instead.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::quick_config::QuickConfig;
use crate::tunnel::{InterfaceDescriptor, PeerDescriptor, TunnelOptions};

use super::{list_conf_files, remove_conf, write_conf, CmdOutput, Driver, DriverError, KeyPair};

/// Driver that manages kernel WireGuard interfaces via `wg-quick`
#[derive(Debug, Clone, Copy, Default)]
pub struct WgQuickDriver;

impl WgQuickDriver {
    /// Create a new driver
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CmdOutput, DriverError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| DriverError::CommandFailed {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            debug!(
                command = program,
                ?args,
                code,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "command exited non-zero"
            );
        }

        Ok(CmdOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            code,
        })
    }

    async fn read_sysfs_counter(&self, name: &str, counter: &str) -> Result<u64, DriverError> {
        let path = format!("/sys/class/net/{name}/statistics/{counter}");
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DriverError::io(&path, e))?;
        content
            .trim()
            .parse()
            .map_err(|_| DriverError::ParseFailed {
                command: format!("read {path}"),
                reason: format!("not a decimal counter: {:?}", content.trim()),
            })
    }
}

#[async_trait]
impl Driver for WgQuickDriver {
    #[instrument(skip(self))]
    async fn create_interface(&self, name: &str) -> Result<CmdOutput, DriverError> {
        self.run("ip", &["link", "add", "dev", name, "type", "wireguard"])
            .await
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

    #[instrument(skip(self, opts))]
    async fn bring_up_interface(
        &self,
        name: &str,
        opts: &TunnelOptions,
    ) -> Result<CmdOutput, DriverError> {
        let conf = opts.conf_path(name);
        self.run("wg-quick", &["up", &conf.display().to_string()]).await
    }

    #[instrument(skip(self, opts))]
    async fn teardown_interface(
        &self,
        name: &str,
        opts: &TunnelOptions,
    ) -> Result<CmdOutput, DriverError> {
        let conf = opts.conf_path(name);
        let result = self.run("wg-quick", &["down", &conf.display().to_string()]).await;
        // The file goes away no matter how the command fared.
        remove_conf(name, opts).await;
        result
    }

    async fn list_interfaces(&self, opts: &TunnelOptions) -> Result<Vec<QuickConfig>, DriverError> {
        list_conf_files(opts).await
    }

    async fn generate_key_pair(&self) -> Result<KeyPair, DriverError> {
        let genkey = self.run("wg", &["genkey"]).await?;
        if !genkey.success() {
            return Err(DriverError::CommandFailed {
                command: "wg genkey".into(),
                reason: format!("exit code {}", genkey.code),
            });
        }
        let private_key = genkey.stdout.trim().to_string();

        // `wg pubkey` reads the private key on stdin.
        let mut child = Command::new("wg")
            .arg("pubkey")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::CommandFailed {
                command: "wg pubkey".into(),
                reason: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(private_key.as_bytes())
                .await
                .map_err(|e| DriverError::CommandFailed {
                    command: "wg pubkey".into(),
                    reason: e.to_string(),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DriverError::CommandFailed {
                command: "wg pubkey".into(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(DriverError::CommandFailed {
                command: "wg pubkey".into(),
                reason: format!("exit code {}", output.status.code().unwrap_or(-1)),
            });
        }

        Ok(KeyPair {
            private_key,
            public_key: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        })
    }

    async fn rx_packet_stats(&self, name: &str) -> Result<u64, DriverError> {
        self.read_sysfs_counter(name, "rx_packets").await
    }

    async fn tx_packet_stats(&self, name: &str) -> Result<u64, DriverError> {
        self.read_sysfs_counter(name, "tx_packets").await
    }

    async fn wg_latest_handshakes(&self, name: &str) -> Result<u64, DriverError> {
        let output = self.run("wg", &["show", name, "latest-handshakes"]).await?;
        parse_latest_handshake(&output.stdout).ok_or_else(|| DriverError::ParseFailed {
            command: format!("wg show {name} latest-handshakes"),
            reason: format!("unexpected output: {:?}", output.stdout),
        })
    }

    fn interface_exists(&self, name: &str) -> bool {
        Path::new("/sys/class/net").join(name).exists()
    }
}

/// Second whitespace-separated field of the first line, as unix seconds
///
/// `wg show <if> latest-handshakes` prints `<peer-pubkey>\t<seconds>` per
/// peer; an interface with no peers prints nothing, which counts as never
/// handshaken.
fn parse_latest_handshake(stdout: &str) -> Option<u64> {
    let Some(line) = stdout.lines().next() else {
        return Some(0);
    };
    if line.trim().is_empty() {
        return Some(0);
    }
    line.split_whitespace().nth(1)?.parse().ok()
}
