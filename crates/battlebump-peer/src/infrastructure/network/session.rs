//! One point-to-point session over TCP.
//!
//! A session task is spawned per handshake, from either side:
//!
//! ```text
//!  inviter                                advertiser
//!  ───────                                ──────────
//!  Connecting                             (Invite read by the listener)
//!  connect + Invite{token, id}  ───────►  Connecting
//!                               ◄───────  InviteAccept{id}
//!  Connected                              Connected
//!          ◄──────── Data / Disconnect ────────►
//!  NotConnected on Disconnect, EOF, I/O error or timeout
//! ```
//!
//! Every state is reported as [`TransportEvent::SessionStateChanged`] tagged
//! with the session's [`SessionId`].  The reader half runs in its own task
//! and feeds frames through a channel, so a pending write never cuts a
//! frame read in half.  Dropping the [`SessionHandle`] ends the session.

use std::net::SocketAddr;
use std::time::Duration;

use battlebump_core::protocol::{
    InviteAcceptMessage, InviteMessage, PeerMessage, SequenceCounter,
};
use battlebump_core::{ConnectionState, PeerIdentity};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::framing::{read_frame, write_frame, FrameError};
use super::TransportEvent;
use crate::application::coordinator::SessionId;
use crate::application::error::TransmitError;

/// How long [`SessionHandle::close`] waits for the session task.
pub const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Why a handshake did not produce a session.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The remote closed without accepting.
    #[error("invitation was not accepted")]
    Declined,

    #[error("expected InviteAccept, got {0}")]
    UnexpectedMessage(&'static str),

    #[error("accepted by {actual}, expected {expected}")]
    WrongPeer {
        expected: PeerIdentity,
        actual: PeerIdentity,
    },

    #[error("no answer within {0:?}")]
    TimedOut(Duration),
}

/// Instructions from the manager to a session task.
#[derive(Debug)]
enum SessionCommand {
    Send(Vec<u8>),
    Disconnect,
}

/// The manager's grip on a running session task.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Queues `bytes` as one `Data` frame.
    ///
    /// # Errors
    ///
    /// [`TransmitError::ChannelClosed`] once the session task has ended.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransmitError> {
        self.commands
            .send(SessionCommand::Send(bytes))
            .map_err(|_| TransmitError::ChannelClosed)
    }

    /// Asks the remote to disconnect and ends the session.
    pub fn disconnect(&self) {
        let _ = self.commands.send(SessionCommand::Disconnect);
    }

    /// Disconnects and waits up to [`CLOSE_GRACE`] for the `Disconnect`
    /// frame to be written.  A session still in its handshake is aborted.
    pub async fn close(mut self) {
        self.disconnect();
        if tokio::time::timeout(CLOSE_GRACE, &mut self.task).await.is_err() {
            debug!(session = %self.id, "session did not close in time; aborting");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reports state for one session.
#[derive(Clone)]
struct Reporter {
    session: SessionId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Reporter {
    fn state(&self, peer: &PeerIdentity, state: ConnectionState) {
        let _ = self.events.send(TransportEvent::SessionStateChanged {
            session: self.session,
            peer: peer.clone(),
            state,
        });
    }
}

/// Invites `target` at `addr` and, if it accepts, runs the session.
pub fn spawn_invite(
    session: SessionId,
    local: PeerIdentity,
    service_token: String,
    target: PeerIdentity,
    addr: SocketAddr,
    timeout: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> SessionHandle {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let reporter = Reporter { session, events };

    let task = tokio::spawn(async move {
        reporter.state(&target, ConnectionState::Connecting);
        let sequence = SequenceCounter::new();

        let handshake = invite(&local, &service_token, &target, addr, &sequence);
        let outcome = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::TimedOut(timeout)),
        };
        match outcome {
            Ok(stream) => {
                info!(session = %session, peer = %target, "invitation accepted");
                reporter.state(&target, ConnectionState::Connected);
                run(stream, target, sequence, reporter, command_rx).await;
            }
            Err(e) => {
                warn!(session = %session, peer = %target, "invitation failed: {e}");
                reporter.state(&target, ConnectionState::NotConnected);
            }
        }
    });

    SessionHandle {
        id: session,
        commands,
        task,
    }
}

/// Accepts an invitation from `remote` on `stream` and runs the session.
pub fn spawn_accept(
    session: SessionId,
    local: PeerIdentity,
    remote: PeerIdentity,
    mut stream: TcpStream,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> SessionHandle {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let reporter = Reporter { session, events };

    let task = tokio::spawn(async move {
        reporter.state(&remote, ConnectionState::Connecting);
        let sequence = SequenceCounter::new();

        let accept = PeerMessage::InviteAccept(InviteAcceptMessage { peer: local });
        match write_frame(&mut stream, &accept, &sequence).await {
            Ok(()) => {
                reporter.state(&remote, ConnectionState::Connected);
                run(stream, remote, sequence, reporter, command_rx).await;
            }
            Err(e) => {
                warn!(session = %session, peer = %remote, "could not accept invitation: {e}");
                reporter.state(&remote, ConnectionState::NotConnected);
            }
        }
    });

    SessionHandle {
        id: session,
        commands,
        task,
    }
}

async fn invite(
    local: &PeerIdentity,
    service_token: &str,
    target: &PeerIdentity,
    addr: SocketAddr,
    sequence: &SequenceCounter,
) -> Result<TcpStream, HandshakeError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| HandshakeError::Connect { addr, source })?;

    let invite = PeerMessage::Invite(InviteMessage {
        service_token: service_token.to_string(),
        peer: local.clone(),
    });
    write_frame(&mut stream, &invite, sequence).await?;

    match read_frame(&mut stream).await? {
        Some(PeerMessage::InviteAccept(accept)) if &accept.peer == target => Ok(stream),
        Some(PeerMessage::InviteAccept(accept)) => Err(HandshakeError::WrongPeer {
            expected: target.clone(),
            actual: accept.peer,
        }),
        Some(other) => Err(HandshakeError::UnexpectedMessage(other.name())),
        None => Err(HandshakeError::Declined),
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Pumps frames until the session ends, then reports `NotConnected`.
async fn run(
    stream: TcpStream,
    remote: PeerIdentity,
    sequence: SequenceCounter,
    reporter: Reporter,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let session = reporter.session;
    let (reader, mut writer) = stream.into_split();
    let (frame_tx, mut frames) = mpsc::unbounded_channel();
    let _reader = AbortOnDrop(tokio::spawn(read_loop(reader, frame_tx)));

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(PeerMessage::Data(bytes)) => {
                    let _ = reporter.events.send(TransportEvent::DataReceived {
                        session,
                        from: remote.clone(),
                        bytes,
                    });
                }
                Some(PeerMessage::Disconnect) => {
                    info!(session = %session, peer = %remote, "peer disconnected");
                    break;
                }
                Some(other) => {
                    debug!(session = %session, "ignoring {} frame", other.name());
                }
                // Reader ended: EOF or a read error, already logged.
                None => break,
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Send(bytes)) => {
                    if let Err(e) = write_frame(&mut writer, &PeerMessage::Data(bytes), &sequence).await {
                        let _ = reporter.events.send(TransportEvent::TransmitFailed {
                            session,
                            error: TransmitError::Io {
                                peer: remote.clone(),
                                reason: e.to_string(),
                            },
                        });
                        break;
                    }
                }
                Some(SessionCommand::Disconnect) | None => {
                    say_goodbye(&mut writer, &sequence).await;
                    info!(session = %session, peer = %remote, "disconnected");
                    break;
                }
            },
        }
    }

    reporter.state(&remote, ConnectionState::NotConnected);
}

async fn read_loop(mut reader: OwnedReadHalf, frames: mpsc::UnboundedSender<PeerMessage>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(msg)) => {
                if frames.send(msg).is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!("session stream closed by peer");
                return;
            }
            Err(e) => {
                warn!("session read failed: {e}");
                return;
            }
        }
    }
}

async fn say_goodbye(writer: &mut OwnedWriteHalf, sequence: &SequenceCounter) {
    if let Err(e) = write_frame(writer, &PeerMessage::Disconnect, sequence).await {
        debug!("could not send Disconnect: {e}");
    }
}
