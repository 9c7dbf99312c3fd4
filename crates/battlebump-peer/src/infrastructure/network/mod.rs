//! LAN transport of the peer.
//!
//! # Sub-modules
//!
//! - **`advertiser`** – Broadcasts `Advertise` datagrams and accepts TCP
//!   invitations on the control port.
//! - **`browser`** – Listens for advertisements and reports peers found and
//!   lost.
//! - **`session`** – One TCP session task per handshake: reports its state,
//!   forwards received payloads, writes outgoing ones.
//! - **`framing`** – Reads and writes whole frames on a byte stream.
//!
//! Every task reports back to the manager's event loop through one
//! [`TransportEvent`] channel.

pub mod advertiser;
pub mod browser;
pub mod framing;
pub mod session;

use std::net::SocketAddr;

use battlebump_core::{ConnectionState, DiscoveryInfo, PeerIdentity, ProtocolError};
use thiserror::Error;
use tokio::net::TcpStream;

use crate::application::coordinator::SessionId;
use crate::application::error::{PeerError, TransmitError};

/// Error type for discovery sockets.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A socket could not be bound.
    #[error("failed to bind {kind} socket on {addr}: {source}")]
    BindFailed {
        kind: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A socket option or address query failed.
    #[error("socket setup failed: {0}")]
    Setup(#[source] std::io::Error),

    /// The encoded `Advertise` frame exceeds
    /// [`battlebump_core::protocol::MAX_DISCOVERY_DATAGRAM`].
    #[error("advertisement of {len} bytes exceeds the discovery limit of {max} bytes")]
    AdvertTooLarge { len: usize, max: usize },

    /// The `Advertise` frame could not be encoded.
    #[error("invalid advertisement: {0}")]
    InvalidAdvert(#[source] ProtocolError),
}

impl From<DiscoveryError> for PeerError {
    fn from(err: DiscoveryError) -> Self {
        let context = err.to_string();
        match err {
            DiscoveryError::BindFailed { source, .. } | DiscoveryError::Setup(source) => {
                PeerError::Io { context, source }
            }
            DiscoveryError::AdvertTooLarge { len, max } => PeerError::AdvertTooLarge { len, max },
            DiscoveryError::InvalidAdvert(source) => PeerError::InvalidAdvert(source),
        }
    }
}

/// Something a transport task observed.
#[derive(Debug)]
pub enum TransportEvent {
    /// An advertisement from a new peer.  `endpoint` is where it takes
    /// invitations.
    PeerFound {
        identity: PeerIdentity,
        info: DiscoveryInfo,
        endpoint: SocketAddr,
    },
    /// A peer withdrew or went silent.
    PeerLost { identity: PeerIdentity },
    /// A valid `Invite` arrived on the control port.  Dropping `stream`
    /// refuses it.
    InvitationReceived { from: PeerIdentity, stream: TcpStream },
    SessionStateChanged {
        session: SessionId,
        peer: PeerIdentity,
        state: ConnectionState,
    },
    DataReceived {
        session: SessionId,
        from: PeerIdentity,
        bytes: Vec<u8>,
    },
    /// A queued payload could not be written.
    TransmitFailed {
        session: SessionId,
        error: TransmitError,
    },
}
