//! Frame I/O over a byte stream.
//!
//! A session stream carries back-to-back frames.  The reader first takes
//! exactly [`HEADER_SIZE`] bytes, learns the payload length from the header,
//! then reads that many more bytes before decoding the whole frame.

use battlebump_core::protocol::{
    decode_header, decode_message, encode_message_now, PeerMessage, ProtocolError,
    SequenceCounter, HEADER_SIZE,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors from reading or writing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Protocol(#[from] ProtocolError),

    /// The stream ended in the middle of a frame.
    #[error("stream closed mid-frame")]
    Truncated,
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
///
/// # Errors
///
/// [`FrameError::Truncated`] if the stream ends inside a frame, otherwise an
/// I/O or protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<PeerMessage>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut frame = vec![0u8; HEADER_SIZE];

    // Distinguish a clean EOF (zero bytes) from one mid-header.
    let first = reader.read(&mut frame).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < HEADER_SIZE {
        read_exact_or_truncated(reader, &mut frame[first..]).await?;
    }

    let header = decode_header(&frame)?;
    frame.resize(HEADER_SIZE + header.payload_len, 0);
    read_exact_or_truncated(reader, &mut frame[HEADER_SIZE..]).await?;

    let (msg, _) = decode_message(&frame)?;
    Ok(Some(msg))
}

/// Encodes `msg` with the next sequence number and writes it out.
///
/// # Errors
///
/// A protocol error if the message cannot be encoded, or an I/O error.
pub async fn write_frame<W>(
    writer: &mut W,
    msg: &PeerMessage,
    sequence: &SequenceCounter,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message_now(msg, sequence.next())?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated),
        Err(e) => Err(FrameError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use battlebump_core::protocol::{encode_message, InviteAcceptMessage};
    use battlebump_core::PeerIdentity;

    #[tokio::test]
    async fn test_write_then_read_single_frame() {
        // Arrange
        let (mut a, mut b) = tokio::io::duplex(1024);
        let seq = SequenceCounter::new();
        let msg = PeerMessage::Data(vec![1, 2, 3]);

        // Act
        write_frame(&mut a, &msg, &seq).await.unwrap();
        let got = read_frame(&mut b).await.unwrap();

        // Assert
        assert_eq!(got, Some(msg));
        assert_eq!(seq.issued(), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_are_split_correctly() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let seq = SequenceCounter::new();
        let accept = PeerMessage::InviteAccept(InviteAcceptMessage {
            peer: PeerIdentity::new("A"),
        });
        write_frame(&mut a, &accept, &seq).await.unwrap();
        write_frame(&mut a, &PeerMessage::Data(vec![9; 100]), &seq).await.unwrap();
        write_frame(&mut a, &PeerMessage::Disconnect, &seq).await.unwrap();

        assert_eq!(read_frame(&mut b).await.unwrap(), Some(accept));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(PeerMessage::Data(vec![9; 100])));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(PeerMessage::Disconnect));
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_payload_is_truncated() {
        // Arrange – a full header promising 3 payload bytes, then only 1
        let (mut a, mut b) = tokio::io::duplex(64);
        let bytes = encode_message(&PeerMessage::Data(vec![1, 2, 3]), 0, 0).unwrap();
        a.write_all(&bytes[..bytes.len() - 2]).await.unwrap();
        drop(a);

        // Act
        let result = read_frame(&mut b).await;

        // Assert
        assert!(matches!(result, Err(FrameError::Truncated)));
    }

    #[tokio::test]
    async fn test_bad_version_is_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut bytes = encode_message(&PeerMessage::Disconnect, 0, 0).unwrap();
        bytes[0] = 0x7F;
        a.write_all(&bytes).await.unwrap();
        let result = read_frame(&mut b).await;
        assert!(matches!(
            result,
            Err(FrameError::Protocol(ProtocolError::UnsupportedVersion(0x7F)))
        ));
    }
}
