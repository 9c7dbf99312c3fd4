//! Binary codec for BattleBump wire messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//!
//! Payload building blocks:
//! - string: `[len:2][utf8:len]`
//! - identity: `[uuid:16][display_name:string]`
//! - discovery info: `[count:1]` followed by `count` `(key:string, value:string)` pairs

use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::DiscoveryInfo;
use crate::identity::PeerIdentity;
use crate::protocol::messages::{
    AdvertiseMessage, InviteAcceptMessage, InviteMessage, MessageType, PeerMessage,
    WithdrawMessage, HEADER_SIZE, MAX_PAYLOAD_LEN, PROTOCOL_VERSION,
};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The payload exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {0} bytes exceeds the limit of {max} bytes", max = MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`PeerMessage`] into a byte vector including the 24-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_LEN`], or [`ProtocolError::MalformedPayload`] if a string or
/// metadata map is too long for its length prefix.
///
/// # Examples
///
/// ```rust
/// use battlebump_core::protocol::{decode_message, encode_message, PeerMessage};
///
/// let msg = PeerMessage::Data(vec![1, 2, 3]);
/// let bytes = encode_message(&msg, 7, 0).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(
    msg: &PeerMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg)?;
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`PeerMessage`] stamped with the current system time.
///
/// # Errors
///
/// See [`encode_message`].
pub fn encode_message_now(
    msg: &PeerMessage,
    sequence_number: u64,
) -> Result<Vec<u8>, ProtocolError> {
    encode_message(msg, sequence_number, current_timestamp_us())
}

/// Decodes one [`PeerMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(PeerMessage, usize), ProtocolError> {
    let header = decode_header(bytes)?;
    let total_needed = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: header.payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let msg = decode_payload(header.message_type, payload)?;
    Ok((msg, total_needed))
}

/// The fields of a frame header a stream reader needs before the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: MessageType,
    pub payload_len: usize,
    pub sequence_number: u64,
    pub timestamp_us: u64,
}

/// Validates and parses the 24-byte header at the start of `bytes`.
///
/// Stream readers call this after reading exactly [`HEADER_SIZE`] bytes to
/// learn how many payload bytes follow.
///
/// # Errors
///
/// Returns [`ProtocolError`] for short input, unknown version or type, or a
/// declared payload larger than [`MAX_PAYLOAD_LEN`].
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let type_byte = bytes[1];
    let message_type =
        MessageType::try_from(type_byte).map_err(|_| ProtocolError::UnknownMessageType(type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(payload_len));
    }

    Ok(FrameHeader {
        message_type,
        payload_len,
        sequence_number: read_u64(bytes, 8)?,
        timestamp_us: read_u64(bytes, 16)?,
    })
}

/// Returns the current time as microseconds since the Unix epoch.
pub fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &PeerMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    match msg {
        PeerMessage::Invite(m) => encode_invite(&mut buf, m)?,
        PeerMessage::InviteAccept(m) => write_identity(&mut buf, &m.peer)?,
        PeerMessage::Disconnect => {} // empty payload
        PeerMessage::Data(bytes) => buf.extend_from_slice(bytes),
        PeerMessage::Advertise(m) => encode_advertise(&mut buf, m)?,
        PeerMessage::Withdraw(m) => encode_withdraw(&mut buf, m)?,
    }
    Ok(buf)
}

fn encode_invite(buf: &mut Vec<u8>, m: &InviteMessage) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.service_token)?;
    write_identity(buf, &m.peer)
}

fn encode_advertise(buf: &mut Vec<u8>, m: &AdvertiseMessage) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.service_token)?;
    write_identity(buf, &m.peer)?;
    buf.extend_from_slice(&m.control_port.to_be_bytes());
    write_discovery_info(buf, &m.discovery_info)
}

fn encode_withdraw(buf: &mut Vec<u8>, m: &WithdrawMessage) -> Result<(), ProtocolError> {
    write_length_prefixed_string(buf, &m.service_token)?;
    write_identity(buf, &m.peer)
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<PeerMessage, ProtocolError> {
    match msg_type {
        MessageType::Invite => decode_invite(payload).map(PeerMessage::Invite),
        MessageType::InviteAccept => {
            let (peer, end) = read_identity(payload, 0)?;
            require_exact(payload, end, "InviteAccept")?;
            Ok(PeerMessage::InviteAccept(InviteAcceptMessage { peer }))
        }
        MessageType::Disconnect => {
            require_exact(payload, 0, "Disconnect")?;
            Ok(PeerMessage::Disconnect)
        }
        MessageType::Data => Ok(PeerMessage::Data(payload.to_vec())),
        MessageType::Advertise => decode_advertise(payload).map(PeerMessage::Advertise),
        MessageType::Withdraw => decode_withdraw(payload).map(PeerMessage::Withdraw),
    }
}

fn decode_invite(p: &[u8]) -> Result<InviteMessage, ProtocolError> {
    let (service_token, off) = read_length_prefixed_string(p, 0)?;
    let (peer, end) = read_identity(p, off)?;
    require_exact(p, end, "Invite")?;
    Ok(InviteMessage {
        service_token,
        peer,
    })
}

fn decode_advertise(p: &[u8]) -> Result<AdvertiseMessage, ProtocolError> {
    let (service_token, off) = read_length_prefixed_string(p, 0)?;
    let (peer, off) = read_identity(p, off)?;
    require_len(p, off + 2, "Advertise.control_port")?;
    let control_port = u16::from_be_bytes([p[off], p[off + 1]]);
    let (discovery_info, end) = read_discovery_info(p, off + 2)?;
    require_exact(p, end, "Advertise")?;
    Ok(AdvertiseMessage {
        service_token,
        peer,
        control_port,
        discovery_info,
    })
}

fn decode_withdraw(p: &[u8]) -> Result<WithdrawMessage, ProtocolError> {
    let (service_token, off) = read_length_prefixed_string(p, 0)?;
    let (peer, end) = read_identity(p, off)?;
    require_exact(p, end, "Withdraw")?;
    Ok(WithdrawMessage {
        service_token,
        peer,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn require_exact(buf: &[u8], end: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() != end {
        return Err(ProtocolError::MalformedPayload(format!(
            "{context}: {} trailing bytes",
            buf.len().saturating_sub(end)
        )));
    }
    Ok(())
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    let bytes: [u8; 8] = buf
        .get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        })?;
    Ok(u64::from_be_bytes(bytes))
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    let bytes: [u8; 16] = buf
        .get(offset..offset + 16)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            ProtocolError::MalformedPayload(format!(
                "need 16 bytes for UUID at offset {offset}, got {}",
                buf.len().saturating_sub(offset)
            ))
        })?;
    Ok(Uuid::from_bytes(bytes))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("string of {} bytes is too long", s.len()))
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

fn write_identity(buf: &mut Vec<u8>, peer: &PeerIdentity) -> Result<(), ProtocolError> {
    buf.extend_from_slice(peer.id().as_bytes());
    write_length_prefixed_string(buf, peer.display_name())
}

fn read_identity(buf: &[u8], offset: usize) -> Result<(PeerIdentity, usize), ProtocolError> {
    let id = read_uuid(buf, offset)?;
    let (name, end) = read_length_prefixed_string(buf, offset + 16)?;
    Ok((PeerIdentity::from_parts(id, name), end))
}

fn write_discovery_info(buf: &mut Vec<u8>, info: &DiscoveryInfo) -> Result<(), ProtocolError> {
    let count = u8::try_from(info.len()).map_err(|_| {
        ProtocolError::MalformedPayload(format!("{} discovery entries exceed 255", info.len()))
    })?;
    buf.push(count);
    for (key, value) in info.iter() {
        write_length_prefixed_string(buf, key)?;
        write_length_prefixed_string(buf, value)?;
    }
    Ok(())
}

fn read_discovery_info(buf: &[u8], offset: usize) -> Result<(DiscoveryInfo, usize), ProtocolError> {
    require_len(buf, offset + 1, "DiscoveryInfo.count")?;
    let count = buf[offset] as usize;
    let mut off = offset + 1;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let (key, next) = read_length_prefixed_string(buf, off)?;
        let (value, next) = read_length_prefixed_string(buf, next)?;
        entries.push((key, value));
        off = next;
    }
    Ok((entries.into_iter().collect(), off))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &PeerMessage) -> PeerMessage {
        let encoded = encode_message(msg, 0, 0).expect("encode failed");
        let (decoded, consumed) = decode_message(&encoded).expect("decode failed");
        assert_eq!(consumed, encoded.len(), "consumed bytes should equal total encoded size");
        decoded
    }

    fn advertise(info: DiscoveryInfo) -> PeerMessage {
        PeerMessage::Advertise(AdvertiseMessage {
            service_token: "RPSgame".to_string(),
            peer: PeerIdentity::new("host-phone"),
            control_port: 40123,
            discovery_info: info,
        })
    }

    #[test]
    fn test_advertise_with_moveset_round_trip() {
        let msg = advertise(DiscoveryInfo::with_moveset_name("Classic"));
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_advertise_with_empty_info_round_trip() {
        let msg = advertise(DiscoveryInfo::new());
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_invite_round_trip() {
        let msg = PeerMessage::Invite(InviteMessage {
            service_token: "RPSgame".to_string(),
            peer: PeerIdentity::new("browser"),
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_disconnect_has_empty_payload() {
        let bytes = encode_message(&PeerMessage::Disconnect, 0, 0).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
    }

    #[test]
    fn test_empty_data_round_trip() {
        let msg = PeerMessage::Data(Vec::new());
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_decode_consumes_only_first_frame() {
        // Arrange – two frames back to back
        let first = encode_message(&PeerMessage::Data(vec![9; 3]), 1, 0).unwrap();
        let second = encode_message(&PeerMessage::Disconnect, 2, 0).unwrap();
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        // Act
        let (msg, consumed) = decode_message(&stream).unwrap();

        // Assert
        assert_eq!(msg, PeerMessage::Data(vec![9; 3]));
        assert_eq!(consumed, first.len());
    }

    // ── Error conditions ──────────────────────────────────────────────────────

    #[test]
    fn test_decode_empty_bytes_returns_insufficient_data() {
        let result = decode_message(&[]);
        assert!(matches!(result, Err(ProtocolError::InsufficientData { .. })));
    }

    #[test]
    fn test_decode_five_garbage_bytes_returns_insufficient_data() {
        let result = decode_message(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00]);
        assert!(matches!(result, Err(ProtocolError::InsufficientData { .. })));
    }

    #[test]
    fn test_decode_unknown_message_type_returns_error() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = 0xFF;
        let result = decode_message(&bytes);
        assert!(matches!(result, Err(ProtocolError::UnknownMessageType(0xFF))));
    }

    #[test]
    fn test_decode_wrong_version_returns_error() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = 0x99;
        bytes[1] = MessageType::Disconnect as u8;
        let result = decode_message(&bytes);
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(0x99))));
    }

    #[test]
    fn test_decode_payload_length_exceeds_available_returns_error() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = MessageType::Data as u8;
        bytes[4..8].copy_from_slice(&100u32.to_be_bytes());
        let result = decode_message(&bytes);
        assert!(matches!(result, Err(ProtocolError::PayloadLengthMismatch { .. })));
    }

    #[test]
    fn test_decode_header_rejects_oversized_declared_payload() {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[0] = PROTOCOL_VERSION;
        bytes[1] = MessageType::Data as u8;
        bytes[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        let result = decode_header(&bytes);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_data() {
        let msg = PeerMessage::Data(vec![0; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            encode_message(&msg, 0, 0),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_decode_disconnect_with_payload_is_malformed() {
        let mut bytes = encode_message(&PeerMessage::Disconnect, 0, 0).unwrap();
        bytes[4..8].copy_from_slice(&1u32.to_be_bytes());
        bytes.push(0xAA);
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_truncated_identity_is_malformed() {
        // Invite payload with a token but only half a UUID.
        let mut payload = Vec::new();
        write_length_prefixed_string(&mut payload, "RPSgame").unwrap();
        payload.extend_from_slice(&[0u8; 8]);
        let mut bytes = vec![PROTOCOL_VERSION, MessageType::Invite as u8, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&payload);
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_decode_invalid_utf8_display_name_is_malformed() {
        let mut payload = Vec::new();
        payload.extend_from_slice(Uuid::nil().as_bytes());
        payload.extend_from_slice(&2u16.to_be_bytes());
        payload.extend_from_slice(&[0xC3, 0x28]);
        let mut bytes = vec![PROTOCOL_VERSION, MessageType::InviteAccept as u8, 0, 0];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&payload);
        assert!(matches!(
            decode_message(&bytes),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_encode_rejects_display_name_longer_than_prefix() {
        let msg = PeerMessage::InviteAccept(InviteAcceptMessage {
            peer: PeerIdentity::new("n".repeat(u16::MAX as usize + 1)),
        });
        assert!(matches!(
            encode_message(&msg, 0, 0),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    // ── Header layout ─────────────────────────────────────────────────────────

    #[test]
    fn test_header_encodes_sequence_and_timestamp() {
        let seq = 0x1234_5678_9ABC_DEF0u64;
        let ts = 0xABCD_EF01_2345_6789u64;
        let bytes = encode_message(&PeerMessage::Disconnect, seq, ts).unwrap();
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.sequence_number, seq);
        assert_eq!(header.timestamp_us, ts);
        assert_eq!(header.message_type, MessageType::Disconnect);
        assert_eq!(header.payload_len, 0);
    }

    #[test]
    fn test_encode_message_now_stamps_a_positive_timestamp() {
        let bytes = encode_message_now(&PeerMessage::Disconnect, 0).unwrap();
        assert!(decode_header(&bytes).unwrap().timestamp_us > 0);
    }
}
