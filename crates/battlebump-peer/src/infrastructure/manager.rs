//! The asynchronous manager façade.
//!
//! [`PeerManager`] is a cheap handle.  All state lives in one event-loop task
//! that owns the [`Coordinator`], the advertiser, the browser, the current
//! session task and the endpoint of every discovered peer.  The loop takes
//! input from two channels:
//!
//! - **commands** from the handle (`start_advertising`, `join`, `send`, …),
//!   so every operation returns immediately;
//! - **transport events** from the advertiser, browser and session tasks.
//!
//! Each input is handled to completion before the next one, which is what
//! keeps the two directories and the session slot consistent.  Outward
//! [`ManagerEvent`]s are pushed onto an unbounded channel after the handler
//! has finished, so a UI that calls back into the handle cannot deadlock.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use battlebump_core::{ConnectionState, DiscoveryInfo, PeerIdentity, Player, SERVICE_TOKEN};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::application::coordinator::{Coordinator, ManagerEvent};
use crate::application::directory::DiscoveredPeer;
use crate::application::error::{PeerError, TransmitError};
use crate::infrastructure::network::advertiser::{Advertiser, AdvertiserConfig};
use crate::infrastructure::network::browser::{Browser, BrowserConfig};
use crate::infrastructure::network::session::{self, SessionHandle};
use crate::infrastructure::network::TransportEvent;
use crate::infrastructure::storage::config::{AppConfig, ConfigError};

/// Runtime settings of a manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub local: PeerIdentity,
    pub service_token: String,
    /// Emit `ErrorOccurred` for swallowed failures.
    pub report_errors: bool,
    pub bind_address: IpAddr,
    pub broadcast_address: IpAddr,
    pub discovery_port: u16,
    /// `0` lets the OS choose.
    pub control_port: u16,
    pub advertise_interval: Duration,
    pub peer_ttl: Duration,
    /// Bound on an outbound invitation, and on an inbound one presenting
    /// its `Invite`.
    pub invite_timeout: Duration,
    pub stop_browsing_after_first_find: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            local: PeerIdentity::for_this_device(),
            service_token: SERVICE_TOKEN.to_string(),
            report_errors: false,
            bind_address: IpAddr::from([0, 0, 0, 0]),
            broadcast_address: IpAddr::from([255, 255, 255, 255]),
            discovery_port: 24850,
            control_port: 0,
            advertise_interval: Duration::from_secs(1),
            peer_ttl: Duration::from_secs(5),
            invite_timeout: Duration::from_secs(10),
            stop_browsing_after_first_find: true,
        }
    }
}

impl ManagerConfig {
    /// Builds runtime settings from the file config, with a fresh identity
    /// named after `display_name`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] if an address does not parse.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let net = &config.network;
        Ok(Self {
            local: PeerIdentity::new(config.peer.display_name.clone()),
            service_token: config.peer.service_token.clone(),
            report_errors: config.peer.report_errors,
            bind_address: parse_ip("bind_address", &net.bind_address)?,
            broadcast_address: parse_ip("broadcast_address", &net.broadcast_address)?,
            discovery_port: net.discovery_port,
            control_port: net.control_port,
            advertise_interval: Duration::from_millis(net.advertise_interval_ms),
            peer_ttl: Duration::from_millis(net.peer_ttl_ms),
            invite_timeout: Duration::from_secs(net.invite_timeout_secs),
            stop_browsing_after_first_find: net.stop_browsing_after_first_find,
        })
    }

    fn advertiser_config(&self) -> AdvertiserConfig {
        AdvertiserConfig {
            local: self.local.clone(),
            service_token: self.service_token.clone(),
            bind_address: self.bind_address,
            broadcast: SocketAddr::new(self.broadcast_address, self.discovery_port),
            control_port: self.control_port,
            interval: self.advertise_interval,
            handshake_timeout: self.invite_timeout,
        }
    }

    fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            local: self.local.clone(),
            service_token: self.service_token.clone(),
            listen: SocketAddr::new(self.bind_address, self.discovery_port),
            peer_ttl: self.peer_ttl,
            stop_after_first_find: self.stop_browsing_after_first_find,
        }
    }
}

fn parse_ip(field: &'static str, value: &str) -> Result<IpAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

enum Command {
    StartAdvertising(String),
    StopAdvertising,
    StartBrowsing,
    StopBrowsing,
    Join(PeerIdentity),
    Send(Player),
    Disconnect,
    DiscoveredPeers(oneshot::Sender<Vec<DiscoveredPeer>>),
    ConnectedPlayers(oneshot::Sender<HashMap<PeerIdentity, Player>>),
    SessionState(oneshot::Sender<Option<ConnectionState>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running session manager.
///
/// Dropping the handle shuts the manager down.
pub struct PeerManager {
    local: PeerIdentity,
    commands: mpsc::UnboundedSender<Command>,
}

impl PeerManager {
    /// Spawns the event loop.  Must be called inside a tokio runtime.
    ///
    /// Returns the handle and the receiver of outward notifications.
    pub fn start(config: ManagerConfig) -> (Self, mpsc::UnboundedReceiver<ManagerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let local = config.local.clone();
        let event_loop = EventLoop {
            coordinator: Coordinator::new(local.clone(), config.report_errors),
            advertiser: Advertiser::new(config.advertiser_config()),
            browser: None,
            routes: HashMap::new(),
            session: None,
            transport_tx,
            events: event_tx,
            config,
        };
        tokio::spawn(event_loop.run(command_rx, transport_rx));
        info!(peer = %local, "peer manager started");

        (
            Self {
                local,
                commands: command_tx,
            },
            event_rx,
        )
    }

    pub fn local_identity(&self) -> &PeerIdentity {
        &self.local
    }

    /// Starts advertising with `moveset_name` as discovery metadata.
    pub fn start_advertising(&self, moveset_name: impl Into<String>) {
        self.command(Command::StartAdvertising(moveset_name.into()));
    }

    pub fn stop_advertising(&self) {
        self.command(Command::StopAdvertising);
    }

    pub fn start_browsing(&self) {
        self.command(Command::StartBrowsing);
    }

    pub fn stop_browsing(&self) {
        self.command(Command::StopBrowsing);
    }

    /// Invites a discovered peer into a new session, replacing any current
    /// one.  Ignored when browsing was never started.
    pub fn join(&self, peer: PeerIdentity) {
        self.command(Command::Join(peer));
    }

    /// Sends `player` to every connected peer.  Fire-and-forget.
    pub fn send(&self, player: &Player) {
        self.command(Command::Send(player.clone()));
    }

    /// Ends the current session on both sides.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    pub async fn discovered_peers(&self) -> Vec<DiscoveredPeer> {
        self.query(Command::DiscoveredPeers).await.unwrap_or_default()
    }

    pub async fn connected_players(&self) -> HashMap<PeerIdentity, Player> {
        self.query(Command::ConnectedPlayers).await.unwrap_or_default()
    }

    /// State of the current session, `None` when there has never been one.
    pub async fn session_state(&self) -> Option<ConnectionState> {
        self.query(Command::SessionState).await.flatten()
    }

    /// Stops advertising and browsing, closes the session and waits for the
    /// event loop to finish.
    pub async fn shutdown(self) {
        let _ = self.query(Command::Shutdown).await;
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("peer manager is shut down; command dropped");
        }
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx));
        rx.await.ok()
    }
}

struct EventLoop {
    config: ManagerConfig,
    coordinator: Coordinator,
    advertiser: Advertiser,
    /// `Some` once browsing has been started, even after it stopped again.
    browser: Option<Browser>,
    /// Where each discovered peer takes invitations.
    routes: HashMap<PeerIdentity, SocketAddr>,
    session: Option<SessionHandle>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = transport.recv() => self.handle_transport(event),
            }
        }

        self.advertiser.stop().await;
        if let Some(browser) = self.browser.as_mut() {
            browser.stop();
        }
        if let Some(session) = self.session.take() {
            session.close().await;
        }
        info!(peer = %self.config.local, "peer manager stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn publish(&self, events: Vec<ManagerEvent>) {
        for event in events {
            if self.events.send(event).is_err() {
                debug!("no listener for manager events");
                return;
            }
        }
    }

    fn report(&self, err: PeerError) {
        self.publish(self.coordinator.failure(err));
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartAdvertising(moveset_name) => {
                let info = DiscoveryInfo::with_moveset_name(moveset_name);
                if let Err(e) = self.advertiser.start(info, self.transport_tx.clone()).await {
                    self.report(e.into());
                }
            }
            Command::StopAdvertising => self.advertiser.stop().await,
            Command::StartBrowsing => {
                let config = self.config.browser_config();
                let browser = self.browser.get_or_insert_with(|| Browser::new(config));
                if let Err(e) = browser.start(self.transport_tx.clone()).await {
                    self.report(e.into());
                }
            }
            Command::StopBrowsing => {
                if let Some(browser) = self.browser.as_mut() {
                    browser.stop();
                }
            }
            Command::Join(target) => self.join(target),
            Command::Send(player) => self.send(&player),
            Command::Disconnect => match &self.session {
                Some(session) => session.disconnect(),
                None => debug!("disconnect without a session"),
            },
            Command::DiscoveredPeers(reply) => {
                let _ = reply.send(self.coordinator.discovered_peers());
            }
            Command::ConnectedPlayers(reply) => {
                let _ = reply.send(self.coordinator.connected_players());
            }
            Command::SessionState(reply) => {
                let _ = reply.send(self.coordinator.session_state());
            }
            // Handled by the loop itself.
            Command::Shutdown(_) => {}
        }
    }

    fn join(&mut self, target: PeerIdentity) {
        if self.browser.is_none() {
            debug!(peer = %target, "join without a started browser; ignoring");
            return;
        }
        let Some(&addr) = self.routes.get(&target) else {
            self.report(PeerError::UnknownPeer(target));
            return;
        };

        let id = self.coordinator.begin_join(&target);
        // Replacing the handle aborts the previous session task.
        self.session = Some(session::spawn_invite(
            id,
            self.config.local.clone(),
            self.config.service_token.clone(),
            target,
            addr,
            self.config.invite_timeout,
            self.transport_tx.clone(),
        ));
    }

    fn send(&self, player: &Player) {
        let outbound = match self.coordinator.prepare_send(player) {
            Ok(outbound) => outbound,
            Err(e) => return self.report(e),
        };
        let result = match &self.session {
            Some(session) if session.id() == outbound.session => session.send(outbound.bytes),
            _ => Err(TransmitError::ChannelClosed),
        };
        match result {
            Ok(()) => debug!(recipients = outbound.recipients.len(), "player queued"),
            Err(e) => self.report(e.into()),
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound {
                identity,
                info,
                endpoint,
            } => {
                self.routes.insert(identity.clone(), endpoint);
                let events = self.coordinator.peer_found(identity, &info);
                self.publish(events);
            }
            TransportEvent::PeerLost { identity } => {
                self.routes.remove(&identity);
                let events = self.coordinator.peer_lost(&identity);
                self.publish(events);
            }
            TransportEvent::InvitationReceived { from, stream } => {
                match self.coordinator.invitation_received(from.clone()) {
                    Ok(id) => {
                        self.session = Some(session::spawn_accept(
                            id,
                            self.config.local.clone(),
                            from,
                            stream,
                            self.transport_tx.clone(),
                        ));
                    }
                    // Dropping the stream closes it unanswered.
                    Err(e) => info!("{e}"),
                }
            }
            TransportEvent::SessionStateChanged {
                session,
                peer,
                state,
            } => {
                let events = self.coordinator.state_changed(session, &peer, state);
                if events
                    .iter()
                    .any(|e| matches!(e, ManagerEvent::SessionStateChanged(ConnectionState::NotConnected)))
                {
                    self.routes.clear();
                }
                self.publish(events);
            }
            TransportEvent::DataReceived {
                session,
                from,
                bytes,
            } => {
                let events = self.coordinator.data_received(session, from, &bytes);
                self.publish(events);
            }
            TransportEvent::TransmitFailed { session, error } => {
                if self.coordinator.session_id() == Some(session) {
                    self.report(error.into());
                } else {
                    warn!(session = %session, "transmit failure on a replaced session: {error}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_documented_values() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.service_token, "RPSgame");
        assert_eq!(cfg.discovery_port, 24850);
        assert_eq!(cfg.invite_timeout, Duration::from_secs(10));
        assert!(cfg.stop_browsing_after_first_find);
        assert!(!cfg.report_errors);
    }

    #[test]
    fn test_from_app_config_converts_units() {
        // Arrange
        let mut app = AppConfig::default();
        app.peer.display_name = "Callum".to_string();
        app.network.advertise_interval_ms = 250;
        app.network.invite_timeout_secs = 3;
        app.network.broadcast_address = "192.168.1.255".to_string();

        // Act
        let cfg = ManagerConfig::from_app_config(&app).unwrap();

        // Assert
        assert_eq!(cfg.local.display_name(), "Callum");
        assert_eq!(cfg.advertise_interval, Duration::from_millis(250));
        assert_eq!(cfg.invite_timeout, Duration::from_secs(3));
        assert_eq!(cfg.broadcast_address, IpAddr::from([192, 168, 1, 255]));
    }

    #[test]
    fn test_from_app_config_rejects_bad_address() {
        let mut app = AppConfig::default();
        app.network.bind_address = "not-an-ip".to_string();
        let err = ManagerConfig::from_app_config(&app).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidAddress { field: "bind_address", .. }
        ));
    }

    #[test]
    fn test_sub_configs_share_discovery_port() {
        let cfg = ManagerConfig {
            discovery_port: 31000,
            ..ManagerConfig::default()
        };
        assert_eq!(cfg.advertiser_config().broadcast.port(), 31000);
        assert_eq!(cfg.browser_config().listen.port(), 31000);
    }

    #[tokio::test]
    async fn test_join_without_browser_is_ignored() {
        // Arrange
        let (manager, mut events) = PeerManager::start(ManagerConfig {
            report_errors: true,
            ..ManagerConfig::default()
        });

        // Act
        manager.join(PeerIdentity::new("A"));

        // Assert – no session, and no error even with reporting on
        assert_eq!(manager.session_state().await, None);
        assert!(events.try_recv().is_err());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_without_session_reports_when_enabled() {
        let (manager, mut events) = PeerManager::start(ManagerConfig {
            report_errors: true,
            ..ManagerConfig::default()
        });

        manager.send(&Player::default().choosing("rock"));

        match events.recv().await {
            Some(ManagerEvent::ErrorOccurred(PeerError::Transmit(TransmitError::NoSession))) => {}
            other => panic!("expected NoSession error, got {other:?}"),
        }
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_without_session_is_silent_by_default() {
        let (manager, mut events) = PeerManager::start(ManagerConfig::default());
        manager.send(&Player::default());
        assert!(manager.discovered_peers().await.is_empty());
        assert!(events.try_recv().is_err());
        manager.shutdown().await;
    }
}
