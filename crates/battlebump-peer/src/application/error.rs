//! Error taxonomy of the session manager.
//!
//! None of these ever propagate out of the manager as a `Result`: every
//! failure is logged where it happens and, only when error reporting is
//! switched on, mirrored to the UI as [`crate::ManagerEvent::ErrorOccurred`].

use battlebump_core::{CodecError, ConnectionState, PeerIdentity, ProtocolError};
use thiserror::Error;

/// Every failure the manager can observe.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Incoming session bytes were not a valid player encoding.
    #[error("dropped data from {from}: {source}")]
    Decode {
        from: PeerIdentity,
        #[source]
        source: CodecError,
    },

    /// A player could not be encoded.  Indicates a programming error.
    #[error("could not encode player: {0}")]
    Encode(#[source] CodecError),

    /// A send could not be handed to the transport.
    #[error("transmit failed: {0}")]
    Transmit(#[from] TransmitError),

    /// An invitation arrived while a live session exists.
    #[error("ignored invitation from {0}: a session is already live")]
    InviteIgnored(PeerIdentity),

    /// `join` named a peer whose endpoint is unknown.
    #[error("cannot join {0}: peer has not been discovered")]
    UnknownPeer(PeerIdentity),

    /// The advertisement does not fit in one discovery datagram, so no
    /// browser could ever decode it.
    #[error("advertisement of {len} bytes exceeds the discovery limit of {max} bytes")]
    AdvertTooLarge { len: usize, max: usize },

    /// The advertisement could not be encoded at all.
    #[error("invalid advertisement: {0}")]
    InvalidAdvert(#[source] ProtocolError),

    /// A socket operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a send never reached the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransmitError {
    #[error("no session exists")]
    NoSession,

    #[error("session is {0}, not Connected")]
    NotConnected(ConnectionState),

    #[error("session has no connected peers")]
    NoConnectedPeers,

    #[error("session task is gone")]
    ChannelClosed,

    #[error("write to {peer} failed: {reason}")]
    Io { peer: PeerIdentity, reason: String },
}
