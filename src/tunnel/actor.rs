//! Per-tunnel state machine
//!
//! One task per tunnel with a serialised mailbox. Bring-up work runs
//! before any command or timer is served; afterwards the actor oscillates
//! between liveness checks, the TTL timer and explicit commands until an
//! exit condition, at which point the terminate step tears the interface
//! down, fires the exit callback and removes the registry entry.
//!
//! ```text
//!            [spawn]
//!               │
//!               ▼
//!          ┌────────┐  interface appears    ┌──────┐
//!          │ Start  │──────────────────────▶│  Up  │
//!          └───┬────┘                       └──┬───┘
//!              │                               │
//!        up err / appearance                   ttl / close /
//!        timeout                               stale (opt-in)
//!              │                               │
//!              └──────────┐       ┌────────────┘
//!                         ▼       ▼
//!                   [terminate → clean up]
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::driver::Driver;
use crate::registry::RegistryInner;

use super::{
    is_stale, ExitReason, InterfaceDescriptor, PeerDescriptor, TunnelOptions, TunnelStatus,
};

/// How often the interface's appearance is polled after bring-up
pub const INTERFACE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long the interface may take to appear before the tunnel gives up
pub const INTERFACE_APPEAR_TIMEOUT: Duration = Duration::from_secs(10);

/// Mailbox depth per tunnel
const MAILBOX_CAPACITY: usize = 16;

/// Snapshot of a tunnel's current state
#[derive(Debug, Clone)]
pub struct TunnelState {
    /// Application-supplied tunnel identifier
    pub id: String,
    /// Local interface descriptor
    pub interface: InterfaceDescriptor,
    /// Remote peer descriptor
    pub peer: PeerDescriptor,
    /// Lifecycle phase
    pub status: TunnelStatus,
    /// Last recorded reason for a pending stop
    pub exit_reason: ExitReason,
    /// Current expiry, if a TTL is set
    pub expires_at: Option<SystemTime>,
}

/// Commands a tunnel actor serves
#[derive(Debug)]
pub(crate) enum TunnelCommand {
    /// Reply with the current state
    GetState(oneshot::Sender<TunnelState>),
    /// Move the TTL timer to a new absolute expiry
    Extend(SystemTime),
    /// Stop with the given reason
    Close(ExitReason),
}

/// How start-up left the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Startup {
    /// A matching `.conf` and a live kernel interface were adopted
    Adopted,
    /// Bring-up was issued; the interface must still appear
    BringUp,
}

pub(crate) struct TunnelActor {
    pub(crate) id: String,
    pub(crate) interface: InterfaceDescriptor,
    pub(crate) peer: PeerDescriptor,
    pub(crate) opts: TunnelOptions,
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) registry: Arc<RegistryInner>,
    pub(crate) rx: mpsc::Receiver<TunnelCommand>,
    pub(crate) status: TunnelStatus,
    pub(crate) exit_reason: ExitReason,
    pub(crate) expires_at: Option<SystemTime>,
}

impl TunnelActor {
    pub(crate) fn mailbox() -> (mpsc::Sender<TunnelCommand>, mpsc::Receiver<TunnelCommand>) {
        mpsc::channel(MAILBOX_CAPACITY)
    }

    /// Run the tunnel to completion, then clean up
    pub(crate) async fn run(mut self, startup: Startup) {
        let reason = self.lifecycle(startup).await;
        self.exit_reason = reason;
        self.terminate(reason).await;
    }

    async fn lifecycle(&mut self, startup: Startup) -> ExitReason {
        match startup {
            Startup::Adopted => {
                self.status = TunnelStatus::Up;
                info!(tunnel = %self.id, interface = %self.interface.id, "adopted running interface");
            }
            Startup::BringUp => {
                match self
                    .driver
                    .bring_up_interface(&self.interface.id, &self.opts)
                    .await
                {
                    Ok(out) if out.success() => {
                        debug!(tunnel = %self.id, interface = %self.interface.id, "bring-up issued");
                    }
                    Ok(out) => {
                        warn!(
                            tunnel = %self.id,
                            interface = %self.interface.id,
                            code = out.code,
                            "bring-up failed"
                        );
                        return ExitReason::DeviceUp;
                    }
                    Err(e) => {
                        warn!(tunnel = %self.id, interface = %self.interface.id, error = %e, "bring-up failed");
                        return ExitReason::DeviceUp;
                    }
                }
            }
        }

        self.event_loop().await
    }

    /// Serve timers and commands until an exit condition
    ///
    /// All deadlines are absolute instants, so the sleep futures can be
    /// recreated on every iteration without drifting.
    async fn event_loop(&mut self) -> ExitReason {
        let started = Instant::now();
        let appear_deadline = started + INTERFACE_APPEAR_TIMEOUT;
        let mut next_appear_poll = started + INTERFACE_POLL_INTERVAL;
        let mut next_liveness = started + self.opts.liveness.grace;

        loop {
            let ttl_deadline = self.ttl_deadline();

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(TunnelCommand::GetState(reply)) => {
                        let _ = reply.send(self.state());
                    }
                    Some(TunnelCommand::Extend(new_expires_at)) => {
                        info!(tunnel = %self.id, ?new_expires_at, "lease extended");
                        self.expires_at = Some(new_expires_at);
                    }
                    Some(TunnelCommand::Close(reason)) => {
                        info!(tunnel = %self.id, %reason, "close requested");
                        return reason;
                    }
                    // Registry dropped the sender: shut down cleanly.
                    None => return ExitReason::Normal,
                },

                () = tokio::time::sleep_until(ttl_deadline.into()) => {
                    info!(tunnel = %self.id, "lease expired");
                    return ExitReason::TtlTimeout;
                }

                () = tokio::time::sleep_until(next_appear_poll.into()),
                    if self.status == TunnelStatus::Start =>
                {
                    if self.driver.interface_exists(&self.interface.id) {
                        self.status = TunnelStatus::Up;
                        info!(tunnel = %self.id, interface = %self.interface.id, "interface up");
                    } else if Instant::now() >= appear_deadline {
                        warn!(
                            tunnel = %self.id,
                            interface = %self.interface.id,
                            "interface did not appear in time"
                        );
                        return ExitReason::InterfaceTimeout;
                    } else {
                        next_appear_poll += INTERFACE_POLL_INTERVAL;
                    }
                }

                () = tokio::time::sleep_until(next_liveness.into()),
                    if self.status == TunnelStatus::Up =>
                {
                    if self.check_liveness().await && self.opts.liveness.stop_on_stale {
                        return ExitReason::Stale;
                    }
                    next_liveness = Instant::now() + self.opts.liveness.interval;
                }
            }
        }
    }

    /// Read the traffic counters and classify the tunnel; returns whether
    /// it is stale
    async fn check_liveness(&self) -> bool {
        let name = &self.interface.id;
        let (rx, tx, handshake) = tokio::join!(
            self.driver.rx_packet_stats(name),
            self.driver.tx_packet_stats(name),
            self.driver.wg_latest_handshakes(name),
        );

        let (rx, tx, handshake) = match (rx, tx, handshake) {
            (Ok(rx), Ok(tx), Ok(handshake)) => (rx, tx, handshake),
            (rx, tx, handshake) => {
                warn!(
                    tunnel = %self.id,
                    rx_err = rx.is_err(),
                    tx_err = tx.is_err(),
                    handshake_err = handshake.is_err(),
                    "liveness probe failed"
                );
                return false;
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let stale = is_stale(rx, tx, handshake, now, self.opts.liveness.handshake_window);
        if stale {
            warn!(
                tunnel = %self.id,
                interface = %self.interface.id,
                rx, tx, handshake,
                "tunnel is stale"
            );
        } else {
            debug!(tunnel = %self.id, rx, tx, handshake, "tunnel alive");
        }
        stale
    }

    /// Best-effort cleanup: teardown, exit callback, registry removal
    async fn terminate(&mut self, reason: ExitReason) {
        info!(tunnel = %self.id, interface = %self.interface.id, %reason, "tearing down");

        // Exit codes are deliberately ignored; the interface may already be
        // gone and the config file is removed either way.
        if let Err(e) = self
            .driver
            .teardown_interface(&self.interface.id, &self.opts)
            .await
        {
            warn!(tunnel = %self.id, error = %e, "teardown failed");
        }

        if let Some(on_exit) = self.opts.on_exit.clone() {
            // Detached so a panicking callback cannot disturb cleanup.
            tokio::spawn(async move { on_exit(reason) });
        }

        self.registry.remove(&self.id, &self.interface.id);
    }

    fn state(&self) -> TunnelState {
        TunnelState {
            id: self.id.clone(),
            interface: self.interface.clone(),
            peer: self.peer.clone(),
            status: self.status,
            exit_reason: self.exit_reason,
            expires_at: self.expires_at,
        }
    }

    /// The TTL timer's deadline as a monotonic instant
    ///
    /// Without an expiry the deadline sits far in the future; the select
    /// arm effectively never fires.
    fn ttl_deadline(&self) -> Instant {
        match self.expires_at {
            Some(at) => {
                let remaining = at
                    .duration_since(SystemTime::now())
                    .unwrap_or(Duration::ZERO);
                Instant::now() + remaining
            }
            None => Instant::now() + Duration::from_secs(86_400 * 365),
        }
    }
}
