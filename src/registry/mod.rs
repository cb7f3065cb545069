//! Tunnel registry and supervisor
//!
//! Owns the set of live tunnel actors: spawns one per `open`, guarantees
//! uniqueness on the tunnel identifier, and indexes tunnels by interface
//! name. Entries disappear when an actor exits for any reason; crashed
//! tunnels are not restarted.
//!
//! # Lock ordering
//!
//! When acquiring multiple locks, take `tunnels` before `by_interface` to
//! prevent deadlocks.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::driver::{Driver, DriverError};
use crate::tunnel::actor::{Startup, TunnelActor, TunnelCommand, TunnelState};
use crate::tunnel::{ExitReason, InterfaceDescriptor, PeerDescriptor, TunnelOptions, TunnelStatus};

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A tunnel with this identifier is already running
    #[error("Tunnel already running: {0}")]
    AlreadyRunning(String),

    /// No tunnel with this identifier is running
    #[error("Tunnel not running: {0}")]
    NotRunning(String),

    /// Writing the tunnel's configuration failed before it could start
    #[error("Failed to configure interface: {0}")]
    Configure(#[source] DriverError),

    /// The actor stopped before answering a state query
    #[error("Tunnel stopped while being queried: {0}")]
    Stopped(String),
}

/// Handle for issuing commands to one live tunnel
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    tx: mpsc::Sender<TunnelCommand>,
}

impl TunnelHandle {
    /// Fetch the tunnel's current state
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Stopped` when the actor exits before
    /// replying.
    pub async fn state(&self) -> Result<TunnelState, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TunnelCommand::GetState(reply))
            .await
            .map_err(|_| RegistryError::Stopped("tunnel mailbox closed".into()))?;
        rx.await
            .map_err(|_| RegistryError::Stopped("tunnel exited before replying".into()))
    }
}

struct TunnelEntry {
    handle: TunnelHandle,
    interface: InterfaceDescriptor,
}

/// Shared maps between the registry facade and the actors
///
/// Actors hold an `Arc` to this and remove themselves during their
/// terminate step, so abnormal exits clean up without a reaper.
pub(crate) struct RegistryInner {
    tunnels: RwLock<HashMap<String, TunnelEntry>>,
    by_interface: RwLock<HashMap<String, String>>,
}

impl RegistryInner {
    pub(crate) fn remove(&self, id: &str, interface_id: &str) {
        let mut tunnels = self.tunnels.write();
        let mut by_interface = self.by_interface.write();
        tunnels.remove(id);
        by_interface.remove(interface_id);
        debug!(tunnel = %id, interface = %interface_id, "registry entry removed");
    }
}

/// Supervisor over the fleet of tunnel actors
pub struct TunnelRegistry {
    inner: Arc<RegistryInner>,
    driver: Arc<dyn Driver>,
}

impl TunnelRegistry {
    /// Create a registry over the given driver
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tunnels: RwLock::new(HashMap::new()),
                by_interface: RwLock::new(HashMap::new()),
            }),
            driver,
        }
    }

    /// Open a tunnel
    ///
    /// Serialises against concurrent opens of the same identifier: exactly
    /// one wins, the rest receive `AlreadyRunning`. When this returns `Ok`
    /// the tunnel's `.conf` exists on disk (written fresh, or found from a
    /// previous run of this process's `data_dir` and adopted).
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` on a duplicate identifier, `Configure` when the
    /// config write fails.
    pub async fn open(
        &self,
        id: &str,
        interface: InterfaceDescriptor,
        peer: PeerDescriptor,
        opts: TunnelOptions,
    ) -> Result<TunnelHandle, RegistryError> {
        let (tx, rx) = TunnelActor::mailbox();
        let handle = TunnelHandle { tx };

        // Reserve the identifier first so concurrent opens serialise on the
        // maps; everything after this must roll the reservation back on
        // failure. Uniqueness holds for both the tunnel id and the
        // interface name.
        {
            let mut tunnels = self.inner.tunnels.write();
            let mut by_interface = self.inner.by_interface.write();
            if tunnels.contains_key(id) {
                return Err(RegistryError::AlreadyRunning(id.to_string()));
            }
            if by_interface.contains_key(&interface.id) {
                return Err(RegistryError::AlreadyRunning(interface.id.clone()));
            }
            tunnels.insert(
                id.to_string(),
                TunnelEntry {
                    handle: handle.clone(),
                    interface: interface.clone(),
                },
            );
            by_interface.insert(interface.id.clone(), id.to_string());
        }

        let startup = match self.prepare(id, &interface, &peer, &opts).await {
            Ok(startup) => startup,
            Err(e) => {
                self.inner.remove(id, &interface.id);
                return Err(RegistryError::Configure(e));
            }
        };

        info!(tunnel = %id, interface = %interface.id, ?startup, "tunnel opened");

        let interface_id = interface.id.clone();
        let actor = TunnelActor {
            id: id.to_string(),
            interface,
            peer,
            expires_at: opts.expires_at,
            opts,
            driver: Arc::clone(&self.driver),
            registry: Arc::clone(&self.inner),
            rx,
            status: TunnelStatus::Start,
            exit_reason: ExitReason::Normal,
        };

        // The actor removes its own entry in its terminate step; this watch
        // covers the remaining case of the task aborting without reaching
        // it. Aborted tunnels are not restarted.
        let task = tokio::spawn(actor.run(startup));
        {
            let inner = Arc::clone(&self.inner);
            let id = id.to_string();
            tokio::spawn(async move {
                if task.await.is_err() {
                    tracing::error!(tunnel = %id, "tunnel task aborted; removing entry");
                    inner.remove(&id, &interface_id);
                }
            });
        }

        Ok(handle)
    }

    /// Ordered first step of a tunnel: adopt an existing config or write a
    /// fresh one
    async fn prepare(
        &self,
        id: &str,
        interface: &InterfaceDescriptor,
        peer: &PeerDescriptor,
        opts: &TunnelOptions,
    ) -> Result<Startup, DriverError> {
        let existing = self.driver.list_interfaces(opts).await.unwrap_or_default();
        let matching = existing.iter().find(|cfg| cfg.tunnel_id() == Some(id));

        match matching {
            Some(_) if self.driver.interface_exists(&interface.id) => {
                debug!(tunnel = %id, interface = %interface.id, "existing config and interface found");
                Ok(Startup::Adopted)
            }
            Some(_) => {
                debug!(tunnel = %id, "existing config found; interface needs bring-up");
                Ok(Startup::BringUp)
            }
            None => {
                self.driver
                    .configure_wireguard(id, interface, peer, opts)
                    .await?;
                Ok(Startup::BringUp)
            }
        }
    }

    /// Request a tunnel stop
    ///
    /// `Ok` means the stop signal was accepted, not that teardown has
    /// completed.
    ///
    /// # Errors
    ///
    /// `NotRunning` when no tunnel has this identifier.
    pub async fn close(&self, id: &str, reason: ExitReason) -> Result<(), RegistryError> {
        let handle = self
            .lookup(id)
            .ok_or_else(|| RegistryError::NotRunning(id.to_string()))?;

        // A closed mailbox means the actor is already on its way out,
        // which is what the caller asked for.
        let _ = handle.tx.send(TunnelCommand::Close(reason)).await;
        Ok(())
    }

    /// Move a tunnel's expiry
    ///
    /// # Errors
    ///
    /// `NotRunning` when no tunnel has this identifier.
    pub async fn extend(&self, id: &str, new_expires_at: SystemTime) -> Result<(), RegistryError> {
        let handle = self
            .lookup(id)
            .ok_or_else(|| RegistryError::NotRunning(id.to_string()))?;

        handle
            .tx
            .send(TunnelCommand::Extend(new_expires_at))
            .await
            .map_err(|_| RegistryError::NotRunning(id.to_string()))
    }

    /// Snapshot of the live tunnels
    #[must_use]
    pub fn list(&self) -> Vec<(String, TunnelHandle, InterfaceDescriptor)> {
        self.inner
            .tunnels
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.handle.clone(), entry.interface.clone()))
            .collect()
    }

    /// Look a tunnel up by its interface name
    #[must_use]
    pub fn get_by_interface_id(
        &self,
        interface_id: &str,
    ) -> Option<(String, TunnelHandle, InterfaceDescriptor)> {
        let id = self.inner.by_interface.read().get(interface_id).cloned()?;
        let tunnels = self.inner.tunnels.read();
        let entry = tunnels.get(&id)?;
        Some((id, entry.handle.clone(), entry.interface.clone()))
    }

    /// Fetch one tunnel's state by identifier
    ///
    /// # Errors
    ///
    /// `NotRunning` when no tunnel has this identifier.
    pub async fn get_state(&self, id: &str) -> Result<TunnelState, RegistryError> {
        let handle = self
            .lookup(id)
            .ok_or_else(|| RegistryError::NotRunning(id.to_string()))?;
        handle.state().await
    }

    /// Local `(address, port)` pairs of every live tunnel
    ///
    /// This is what the allocator checks new picks against.
    #[must_use]
    pub fn live_endpoints(&self) -> Vec<(Ipv4Addr, u16)> {
        self.inner
            .tunnels
            .read()
            .values()
            .map(|entry| (entry.interface.ip_address, entry.interface.port))
            .collect()
    }

    /// Stop every tunnel and wait for teardown
    ///
    /// Used on shutdown; waits up to `timeout` for the actors to drain.
    pub async fn close_all(&self, timeout: Duration) {
        let ids: Vec<String> = self.inner.tunnels.read().keys().cloned().collect();
        for id in &ids {
            let _ = self.close(id, ExitReason::Normal).await;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        while !self.inner.tunnels.read().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.inner.tunnels.read().len();
                tracing::warn!(remaining, "shutdown timed out waiting for tunnels");
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    fn lookup(&self, id: &str) -> Option<TunnelHandle> {
        self.inner
            .tunnels
            .read()
            .get(id)
            .map(|entry| entry.handle.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use crate::driver::MockDriver;
    use crate::tunnel::Table;

    use super::*;

    fn interface(id: &str, last_octet: u8, port: u16) -> InterfaceDescriptor {
        InterfaceDescriptor {
            id: id.to_string(),
            ip_address: Ipv4Addr::new(10, 100, 0, last_octet),
            port,
            private_key: "priv".into(),
            public_key: "pub".into(),
            table: Table::Auto,
        }
    }

    fn peer() -> PeerDescriptor {
        PeerDescriptor {
            ip_address: Ipv4Addr::new(10, 100, 0, 200),
            endpoint: "203.0.113.5".into(),
            port: 51820,
            public_key: "peer-pub".into(),
            persistent_keepalive: 25,
        }
    }

    fn registry() -> (TunnelRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (TunnelRegistry::new(Arc::new(MockDriver::new())), dir)
    }

    #[tokio::test]
    async fn test_open_writes_conf_before_returning() {
        let (registry, dir) = registry();
        let opts = TunnelOptions::with_data_dir(dir.path());

        registry
            .open("t1", interface("peridio-AAAAAAA", 1, 50001), peer(), opts.clone())
            .await
            .unwrap();

        assert!(opts.conf_path("peridio-AAAAAAA").exists());
    }

    #[tokio::test]
    async fn test_duplicate_open_rejected() {
        let (registry, dir) = registry();
        let opts = TunnelOptions::with_data_dir(dir.path());

        registry
            .open("t1", interface("peridio-AAAAAAA", 1, 50001), peer(), opts.clone())
            .await
            .unwrap();
        let err = registry
            .open("t1", interface("peridio-BBBBBBB", 2, 50002), peer(), opts)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning(id) if id == "t1"));
    }

    #[tokio::test]
    async fn test_duplicate_interface_id_rejected() {
        let (registry, dir) = registry();
        let opts = TunnelOptions::with_data_dir(dir.path());

        registry
            .open("t1", interface("peridio-AAAAAAA", 1, 50001), peer(), opts.clone())
            .await
            .unwrap();
        let err = registry
            .open("t2", interface("peridio-AAAAAAA", 2, 50002), peer(), opts)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_lookup_by_interface_id() {
        let (registry, dir) = registry();
        let opts = TunnelOptions::with_data_dir(dir.path());

        registry
            .open("t1", interface("peridio-AAAAAAA", 1, 50001), peer(), opts)
            .await
            .unwrap();

        let (id, _, iface) = registry.get_by_interface_id("peridio-AAAAAAA").unwrap();
        assert_eq!(id, "t1");
        assert_eq!(iface.port, 50001);
        assert!(registry.get_by_interface_id("peridio-ZZZZZZZ").is_none());
    }

    #[tokio::test]
    async fn test_close_unknown_tunnel() {
        let (registry, _dir) = registry();
        let err = registry.close("missing", ExitReason::Normal).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotRunning(_)));

        let err = registry
            .extend("missing", SystemTime::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotRunning(_)));
    }

    #[tokio::test]
    async fn test_live_endpoints() {
        let (registry, dir) = registry();
        let opts = TunnelOptions::with_data_dir(dir.path());

        registry
            .open("t1", interface("peridio-AAAAAAA", 1, 50001), peer(), opts.clone())
            .await
            .unwrap();
        registry
            .open("t2", interface("peridio-BBBBBBB", 2, 50002), peer(), opts)
            .await
            .unwrap();

        let mut endpoints = registry.live_endpoints();
        endpoints.sort();
        assert_eq!(
            endpoints,
            vec![
                (Ipv4Addr::new(10, 100, 0, 1), 50001),
                (Ipv4Addr::new(10, 100, 0, 2), 50002),
            ]
        );
    }
}
