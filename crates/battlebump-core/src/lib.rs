//! # battlebump-core
//!
//! Shared library for BattleBump peers containing the local-network wire
//! protocol, the player payload and its codec, and the small domain types
//! that both ends of a session agree on.
//!
//! This crate has no socket code and no async runtime.  Everything here is a
//! pure function or a plain value, so it can be tested byte-for-byte.
//!
//! # Architecture overview
//!
//! BattleBump is a two-player game played between two devices on the same
//! LAN.  One device *advertises* itself, the other *browses* for advertisers,
//! invites one, and from then on the two exchange [`Player`] snapshots.
//!
//! - **`identity`** – [`PeerIdentity`]: who an endpoint is.
//! - **`domain`** – [`ConnectionState`] and [`DiscoveryInfo`], the vocabulary
//!   the session layer reports in.
//! - **`player`** – [`Player`] and the bincode-based codec that turns it into
//!   the opaque bytes carried by a session.
//! - **`protocol`** – The framed binary messages that travel over UDP
//!   (discovery) and TCP (sessions).

pub mod domain;
pub mod identity;
pub mod player;
pub mod protocol;

pub use domain::{ConnectionState, DiscoveryInfo, MOVESET_NAME_KEY, SERVICE_TOKEN};
pub use identity::PeerIdentity;
pub use player::{decode_player, encode_player, CodecError, Player};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::PeerMessage;
