//! All BattleBump wire message types.
//!
//! Discovery messages (`Advertise`, `Withdraw`) travel as single UDP
//! datagrams.  Session messages (`Invite`, `InviteAccept`, `Data`,
//! `Disconnect`) travel over the TCP stream of one session.

use crate::domain::DiscoveryInfo;
use crate::identity::PeerIdentity;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Largest payload accepted by [`crate::protocol::codec::decode_message`].
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// Largest whole frame sent as one discovery datagram: an Ethernet MTU less
/// the IPv4 and UDP headers.  Browsers receive into a buffer of this size.
pub const MAX_DISCOVERY_DATAGRAM: usize = 1472;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type byte carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Session channel (0x00–0x7F)
    Invite = 0x01,
    InviteAccept = 0x02,
    Disconnect = 0x09,
    Data = 0x10,
    // Discovery (0x80–0x8F)
    Advertise = 0x80,
    Withdraw = 0x81,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Invite),
            0x02 => Ok(MessageType::InviteAccept),
            0x09 => Ok(MessageType::Disconnect),
            0x10 => Ok(MessageType::Data),
            0x80 => Ok(MessageType::Advertise),
            0x81 => Ok(MessageType::Withdraw),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// Periodic presence broadcast from an advertising peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseMessage {
    /// Discovery namespace; browsers drop adverts with a different token.
    pub service_token: String,
    /// Who is advertising.
    pub peer: PeerIdentity,
    /// TCP port on which the advertiser accepts invitations.
    pub control_port: u16,
    /// Free-form metadata; only `movesetName` is interpreted.
    pub discovery_info: DiscoveryInfo,
}

/// Sent once when a peer stops advertising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawMessage {
    pub service_token: String,
    pub peer: PeerIdentity,
}

/// First frame on a freshly opened session stream, sent by the inviter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteMessage {
    pub service_token: String,
    /// Identity of the inviting peer.
    pub peer: PeerIdentity,
}

/// Reply from the advertiser that completes the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteAcceptMessage {
    /// Identity of the accepting peer.
    pub peer: PeerIdentity,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Any message that can appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Invite(InviteMessage),
    InviteAccept(InviteAcceptMessage),
    /// Orderly end of a session.
    Disconnect,
    /// Opaque application payload (an encoded player).
    Data(Vec<u8>),
    Advertise(AdvertiseMessage),
    Withdraw(WithdrawMessage),
}

impl PeerMessage {
    /// Returns the [`MessageType`] code for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            PeerMessage::Invite(_) => MessageType::Invite,
            PeerMessage::InviteAccept(_) => MessageType::InviteAccept,
            PeerMessage::Disconnect => MessageType::Disconnect,
            PeerMessage::Data(_) => MessageType::Data,
            PeerMessage::Advertise(_) => MessageType::Advertise,
            PeerMessage::Withdraw(_) => MessageType::Withdraw,
        }
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            PeerMessage::Invite(_) => "Invite",
            PeerMessage::InviteAccept(_) => "InviteAccept",
            PeerMessage::Disconnect => "Disconnect",
            PeerMessage::Data(_) => "Data",
            PeerMessage::Advertise(_) => "Advertise",
            PeerMessage::Withdraw(_) => "Withdraw",
        }
    }
}
