//! Discovery of advertising peers.
//!
//! The browser binds the discovery port and decodes every datagram that
//! arrives.  Adverts for another service token, or carrying our own
//! identity, are dropped.
//!
//! - First `Advertise` from an identity: **found**.  The datagram's source IP
//!   plus the advertised control port is where invitations go.
//! - `Withdraw`, or no `Advertise` for `peer_ttl`: **lost**.
//!
//! With `stop_after_first_find` set, the browser stops itself right after
//! reporting its first peer.  The game only ever needs one opponent.
//!
//! # Read timeout
//!
//! `recv_from` is bounded by [`POLL_INTERVAL`].  On every wake-up the loop
//! expires silent peers and re-checks the running flag, so `stop()` takes
//! effect within one interval.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use battlebump_core::protocol::{decode_message, PeerMessage, MAX_DISCOVERY_DATAGRAM};
use battlebump_core::PeerIdentity;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use super::{DiscoveryError, TransportEvent};

/// Upper bound on one receive.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Static settings of a browser.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub local: PeerIdentity,
    pub service_token: String,
    /// Bind address + discovery port.
    pub listen: SocketAddr,
    pub peer_ttl: Duration,
    pub stop_after_first_find: bool,
}

/// Browser lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserState {
    Idle,
    Browsing,
}

/// Scans for advertised peers.
pub struct Browser {
    config: BrowserConfig,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Browser {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// `Browsing` until `stop()` or, with find-one-and-stop, the first find.
    pub fn state(&self) -> BrowserState {
        if self.running.load(Ordering::Relaxed) {
            BrowserState::Browsing
        } else {
            BrowserState::Idle
        }
    }

    /// Binds the discovery port and starts scanning.  No-op when already
    /// browsing.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::BindFailed`] if the port cannot be bound.
    pub async fn start(
        &mut self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), DiscoveryError> {
        if self.state() == BrowserState::Browsing {
            debug!("browser already running");
            return Ok(());
        }
        // Wait for the previous scan to release the port.
        if let Some(old) = self.task.take() {
            old.abort();
            let _ = old.await;
        }

        let socket = UdpSocket::bind(self.config.listen)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                kind: "UDP",
                addr: self.config.listen,
                source,
            })?;

        // A fresh flag per scan so an aborted predecessor cannot flip it.
        self.running = Arc::new(AtomicBool::new(true));
        self.task = Some(tokio::spawn(browse_loop(
            socket,
            self.config.clone(),
            events,
            Arc::clone(&self.running),
        )));
        info!(listen = %self.config.listen, "browsing for peers");
        Ok(())
    }

    /// Stops scanning.  No-op when idle.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::Relaxed) {
            info!("stopped browsing");
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Peers currently considered present, with when each was last heard.
#[derive(Debug, Default)]
struct SeenPeers {
    last_heard: HashMap<PeerIdentity, Instant>,
}

impl SeenPeers {
    /// Returns `true` if `peer` was not present.
    fn heard(&mut self, peer: PeerIdentity, now: Instant) -> bool {
        self.last_heard.insert(peer, now).is_none()
    }

    fn withdraw(&mut self, peer: &PeerIdentity) -> bool {
        self.last_heard.remove(peer).is_some()
    }

    /// Removes and returns peers silent for longer than `ttl`.
    fn expire(&mut self, now: Instant, ttl: Duration) -> Vec<PeerIdentity> {
        let expired: Vec<PeerIdentity> = self
            .last_heard
            .iter()
            .filter(|(_, heard)| now.duration_since(**heard) > ttl)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &expired {
            self.last_heard.remove(peer);
        }
        expired
    }
}

async fn browse_loop(
    socket: UdpSocket,
    config: BrowserConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; MAX_DISCOVERY_DATAGRAM];
    let mut seen = SeenPeers::default();

    while running.load(Ordering::Relaxed) {
        for identity in seen.expire(Instant::now(), config.peer_ttl) {
            debug!(peer = %identity, "peer went silent");
            if events.send(TransportEvent::PeerLost { identity }).is_err() {
                return;
            }
        }

        let (len, src) = match tokio::time::timeout(POLL_INTERVAL, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                error!("discovery recv error: {e}");
                continue;
            }
        };

        let msg = match decode_message(&buf[..len]) {
            Ok((msg, _)) => msg,
            Err(e) => {
                debug!("failed to decode discovery datagram from {src}: {e}");
                continue;
            }
        };

        let event = match msg {
            PeerMessage::Advertise(advert) => {
                if advert.service_token != config.service_token || advert.peer == config.local {
                    trace!(peer = %advert.peer, "ignoring advert");
                    continue;
                }
                if !seen.heard(advert.peer.clone(), Instant::now()) {
                    continue;
                }
                let endpoint = SocketAddr::new(src.ip(), advert.control_port);
                info!(peer = %advert.peer, %endpoint, "found peer");
                TransportEvent::PeerFound {
                    identity: advert.peer,
                    info: advert.discovery_info,
                    endpoint,
                }
            }
            PeerMessage::Withdraw(withdraw) => {
                if withdraw.service_token != config.service_token || !seen.withdraw(&withdraw.peer) {
                    continue;
                }
                info!(peer = %withdraw.peer, "peer withdrew");
                TransportEvent::PeerLost {
                    identity: withdraw.peer,
                }
            }
            other => {
                debug!("unexpected {} on discovery port from {src}", other.name());
                continue;
            }
        };

        if config.stop_after_first_find && matches!(event, TransportEvent::PeerFound { .. }) {
            info!("peer found; browsing stops");
            running.store(false, Ordering::Relaxed);
        }
        if events.send(event).is_err() {
            return;
        }
    }
}
