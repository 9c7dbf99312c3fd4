//! Presence broadcasting and invitation intake.
//!
//! While advertising, two tasks run:
//!
//! 1. The **beacon** sends an `Advertise` datagram to the broadcast address
//!    every `interval`.  It carries the service token, our identity, the TCP
//!    control port and the discovery metadata.
//! 2. The **listener** accepts TCP connections on the control port.  Each
//!    connection must open with an `Invite` frame carrying our service token
//!    within `handshake_timeout`; valid invitations are handed to the manager
//!    as [`TransportEvent::InvitationReceived`], anything else is closed.
//!
//! Whether an invitation is accepted is the manager's decision, not ours.
//! `stop()` sends one `Withdraw` datagram and ends both tasks.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use battlebump_core::protocol::{
    encode_message, encode_message_now, AdvertiseMessage, PeerMessage, SequenceCounter,
    WithdrawMessage, MAX_DISCOVERY_DATAGRAM,
};
use battlebump_core::{DiscoveryInfo, PeerIdentity};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::framing::read_frame;
use super::{DiscoveryError, TransportEvent};

/// Static settings of an advertiser.
#[derive(Debug, Clone)]
pub struct AdvertiserConfig {
    pub local: PeerIdentity,
    pub service_token: String,
    pub bind_address: IpAddr,
    /// Where `Advertise` datagrams go (broadcast address + discovery port).
    pub broadcast: SocketAddr,
    /// TCP port for invitations; `0` lets the OS choose.
    pub control_port: u16,
    pub interval: Duration,
    /// How long a new connection has to present its `Invite`.
    pub handshake_timeout: Duration,
}

/// Advertiser lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserState {
    Idle,
    Advertising,
}

struct Running {
    socket: Arc<UdpSocket>,
    alive: Arc<AtomicBool>,
    beacon: JoinHandle<()>,
    listener: JoinHandle<()>,
}

/// Advertises this peer and forwards incoming invitations.
pub struct Advertiser {
    config: AdvertiserConfig,
    sequence: Arc<SequenceCounter>,
    running: Option<Running>,
}

impl Advertiser {
    pub fn new(config: AdvertiserConfig) -> Self {
        Self {
            config,
            sequence: Arc::new(SequenceCounter::new()),
            running: None,
        }
    }

    pub fn state(&self) -> AdvertiserState {
        if self.running.is_some() {
            AdvertiserState::Advertising
        } else {
            AdvertiserState::Idle
        }
    }

    /// Binds the sockets and starts advertising `info`.
    ///
    /// Restarts with the new metadata when already advertising.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::AdvertTooLarge`] / [`DiscoveryError::InvalidAdvert`]
    ///   if `info` cannot travel in one discovery datagram.  Checked before
    ///   anything else, so a running advertisement keeps going.
    /// - [`DiscoveryError::BindFailed`] / [`DiscoveryError::Setup`] if a socket
    ///   cannot be bound or configured.  The advertiser is `Idle` afterwards.
    pub async fn start(
        &mut self,
        info: DiscoveryInfo,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<u16, DiscoveryError> {
        let mut advert = AdvertiseMessage {
            service_token: self.config.service_token.clone(),
            peer: self.config.local.clone(),
            control_port: 0,
            discovery_info: info,
        };
        check_advert_size(&advert)?;

        if self.running.is_some() {
            debug!("advertiser already running; restarting with new metadata");
            self.stop().await;
        }

        let listen_addr = SocketAddr::new(self.config.bind_address, self.config.control_port);
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                kind: "TCP",
                addr: listen_addr,
                source,
            })?;
        let control_port = listener.local_addr().map_err(DiscoveryError::Setup)?.port();

        let udp_addr = SocketAddr::new(self.config.bind_address, 0);
        let socket = UdpSocket::bind(udp_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailed {
                kind: "UDP",
                addr: udp_addr,
                source,
            })?;
        socket.set_broadcast(true).map_err(DiscoveryError::Setup)?;
        let socket = Arc::new(socket);

        let alive = Arc::new(AtomicBool::new(true));
        advert.control_port = control_port;
        let advert = PeerMessage::Advertise(advert);

        let beacon = tokio::spawn(beacon_loop(
            Arc::clone(&socket),
            self.config.broadcast,
            advert,
            self.config.interval,
            Arc::clone(&self.sequence),
            Arc::clone(&alive),
        ));
        let listener = tokio::spawn(listen_loop(
            listener,
            self.config.service_token.clone(),
            self.config.handshake_timeout,
            events,
            Arc::clone(&alive),
        ));

        info!(
            peer = %self.config.local,
            control_port,
            broadcast = %self.config.broadcast,
            "advertising"
        );
        self.running = Some(Running {
            socket,
            alive,
            beacon,
            listener,
        });
        Ok(control_port)
    }

    /// Withdraws the advertisement.  No-op when idle.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.alive.store(false, Ordering::Relaxed);
        running.beacon.abort();
        running.listener.abort();

        let withdraw = PeerMessage::Withdraw(WithdrawMessage {
            service_token: self.config.service_token.clone(),
            peer: self.config.local.clone(),
        });
        send_datagram(&running.socket, self.config.broadcast, &withdraw, &self.sequence).await;
        info!(peer = %self.config.local, "stopped advertising");
    }
}

/// The control port is fixed-width, so the placeholder does not change the
/// encoded size.
fn check_advert_size(advert: &AdvertiseMessage) -> Result<(), DiscoveryError> {
    let bytes = encode_message(&PeerMessage::Advertise(advert.clone()), 0, 0)
        .map_err(DiscoveryError::InvalidAdvert)?;
    if bytes.len() > MAX_DISCOVERY_DATAGRAM {
        return Err(DiscoveryError::AdvertTooLarge {
            len: bytes.len(),
            max: MAX_DISCOVERY_DATAGRAM,
        });
    }
    Ok(())
}

async fn beacon_loop(
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    advert: PeerMessage,
    interval: Duration,
    sequence: Arc<SequenceCounter>,
    alive: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    while alive.load(Ordering::Relaxed) {
        ticker.tick().await;
        send_datagram(&socket, dest, &advert, &sequence).await;
    }
}

async fn send_datagram(
    socket: &UdpSocket,
    dest: SocketAddr,
    msg: &PeerMessage,
    sequence: &SequenceCounter,
) {
    match encode_message_now(msg, sequence.next()) {
        Ok(bytes) => {
            if let Err(e) = socket.send_to(&bytes, dest).await {
                warn!("failed to send {} to {dest}: {e}", msg.name());
            }
        }
        Err(e) => error!("failed to encode {}: {e}", msg.name()),
    }
}

async fn listen_loop(
    listener: TcpListener,
    service_token: String,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
    alive: Arc<AtomicBool>,
) {
    while alive.load(Ordering::Relaxed) {
        let (stream, remote) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("control port accept failed: {e}");
                continue;
            }
        };
        debug!("control connection from {remote}");
        tokio::spawn(read_invitation(
            stream,
            remote,
            service_token.clone(),
            handshake_timeout,
            events.clone(),
        ));
    }
}

/// Waits for the opening `Invite` and forwards it.
async fn read_invitation(
    mut stream: TcpStream,
    remote: SocketAddr,
    service_token: String,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let first = match tokio::time::timeout(handshake_timeout, read_frame(&mut stream)).await {
        Ok(Ok(Some(msg))) => msg,
        Ok(Ok(None)) => {
            debug!("{remote} closed before inviting");
            return;
        }
        Ok(Err(e)) => {
            warn!("bad invitation from {remote}: {e}");
            return;
        }
        Err(_) => {
            warn!("{remote} sent no invitation within {handshake_timeout:?}");
            return;
        }
    };

    match first {
        PeerMessage::Invite(invite) if invite.service_token == service_token => {
            info!(peer = %invite.peer, "invitation received from {remote}");
            let _ = events.send(TransportEvent::InvitationReceived {
                from: invite.peer,
                stream,
            });
        }
        PeerMessage::Invite(invite) => {
            debug!(
                peer = %invite.peer,
                token = %invite.service_token,
                "invitation for another service; closing"
            );
        }
        other => warn!("expected Invite from {remote}, got {}", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::network::framing::write_frame;
    use battlebump_core::protocol::{decode_message, InviteMessage};

    fn config(broadcast: SocketAddr) -> AdvertiserConfig {
        AdvertiserConfig {
            local: PeerIdentity::new("A"),
            service_token: "RPSgame".to_string(),
            bind_address: "127.0.0.1".parse().unwrap(),
            broadcast,
            control_port: 0,
            interval: Duration::from_millis(50),
            handshake_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_no_op() {
        let mut adv = Advertiser::new(config("127.0.0.1:9".parse().unwrap()));
        adv.stop().await;
        assert_eq!(adv.state(), AdvertiserState::Idle);
    }

    #[tokio::test]
    async fn test_advertise_then_withdraw_datagrams() {
        // Arrange – a plain UDP socket stands in for a browser
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut adv = Advertiser::new(config(sink.local_addr().unwrap()));
        let (tx, _rx) = mpsc::unbounded_channel();

        // Act
        let port = adv
            .start(DiscoveryInfo::with_moveset_name("Classic"), tx)
            .await
            .unwrap();
        let mut buf = vec![0u8; 2048];
        let (len, _) = sink.recv_from(&mut buf).await.unwrap();
        let (advert, _) = decode_message(&buf[..len]).unwrap();

        // Assert
        assert_eq!(adv.state(), AdvertiserState::Advertising);
        match advert {
            PeerMessage::Advertise(msg) => {
                assert_eq!(msg.control_port, port);
                assert_eq!(msg.discovery_info.moveset_name(), Some("Classic"));
                assert_eq!(msg.service_token, "RPSgame");
            }
            other => panic!("expected Advertise, got {other:?}"),
        }

        adv.stop().await;
        assert_eq!(adv.state(), AdvertiserState::Idle);
        loop {
            let (len, _) = sink.recv_from(&mut buf).await.unwrap();
            if let (PeerMessage::Withdraw(w), _) = decode_message(&buf[..len]).unwrap() {
                assert_eq!(w.peer.display_name(), "A");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_valid_invite_is_forwarded() {
        // Arrange
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut adv = Advertiser::new(config(sink.local_addr().unwrap()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = adv.start(DiscoveryInfo::new(), tx).await.unwrap();
        let inviter = PeerIdentity::new("B");

        // Act
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let invite = PeerMessage::Invite(InviteMessage {
            service_token: "RPSgame".to_string(),
            peer: inviter.clone(),
        });
        write_frame(&mut stream, &invite, &SequenceCounter::new()).await.unwrap();

        // Assert
        match rx.recv().await {
            Some(TransportEvent::InvitationReceived { from, .. }) => assert_eq!(from, inviter),
            other => panic!("expected invitation, got {other:?}"),
        }
        adv.stop().await;
    }

    #[tokio::test]
    async fn test_invite_with_wrong_token_is_dropped() {
        // Arrange
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut adv = Advertiser::new(config(sink.local_addr().unwrap()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let port = adv.start(DiscoveryInfo::new(), tx).await.unwrap();

        // Act
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let invite = PeerMessage::Invite(InviteMessage {
            service_token: "OtherGame".to_string(),
            peer: PeerIdentity::new("B"),
        });
        write_frame(&mut stream, &invite, &SequenceCounter::new()).await.unwrap();

        // Assert – the connection is closed and nothing is forwarded
        assert!(read_frame(&mut stream).await.unwrap().is_none());
        assert!(rx.try_recv().is_err());
        adv.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_moveset_name_is_rejected_before_binding() {
        // Arrange
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut adv = Advertiser::new(config(sink.local_addr().unwrap()));
        let (tx, _rx) = mpsc::unbounded_channel();

        // Act
        let result = adv
            .start(DiscoveryInfo::with_moveset_name("m".repeat(5000)), tx)
            .await;

        // Assert
        match result {
            Err(DiscoveryError::AdvertTooLarge { len, max }) => {
                assert!(len > 5000);
                assert_eq!(max, MAX_DISCOVERY_DATAGRAM);
            }
            other => panic!("expected AdvertTooLarge, got {other:?}"),
        }
        assert_eq!(adv.state(), AdvertiserState::Idle);
    }

    #[tokio::test]
    async fn test_oversized_restart_keeps_current_advertisement() {
        // Arrange
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut adv = Advertiser::new(config(sink.local_addr().unwrap()));
        let (tx, _rx) = mpsc::unbounded_channel();
        adv.start(DiscoveryInfo::with_moveset_name("Classic"), tx.clone())
            .await
            .unwrap();

        // Act
        let result = adv
            .start(DiscoveryInfo::with_moveset_name("m".repeat(5000)), tx)
            .await;

        // Assert – beacons still carry the old metadata
        assert!(matches!(result, Err(DiscoveryError::AdvertTooLarge { .. })));
        assert_eq!(adv.state(), AdvertiserState::Advertising);
        let mut buf = vec![0u8; MAX_DISCOVERY_DATAGRAM];
        let (len, _) = sink.recv_from(&mut buf).await.unwrap();
        match decode_message(&buf[..len]).unwrap() {
            (PeerMessage::Advertise(msg), _) => {
                assert_eq!(msg.discovery_info.moveset_name(), Some("Classic"));
            }
            (other, _) => panic!("expected Advertise, got {other:?}"),
        }
        adv.stop().await;
    }
}
