//! The [`Player`] payload and its byte codec.
//!
//! A session treats the payload as an opaque blob; only the two endpoints
//! interpret it.  Both endpoints of a given build use the same bincode
//! configuration, so the encoding is stable between them.
//!
//! ```rust
//! use battlebump_core::{decode_player, encode_player, Player};
//!
//! let player = Player {
//!     choice: Some("rock".to_string()),
//!     ..Player::default()
//! };
//! let bytes = encode_player(&player).unwrap();
//! assert_eq!(decode_player(&bytes).unwrap(), player);
//! ```

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on an encoded player.  Anything larger is rejected on decode.
pub const MAX_PLAYER_BYTES: u64 = 64 * 1024;

/// Errors produced by the player codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The value could not be serialized.  Indicates a programming error.
    #[error("failed to encode player: {0}")]
    Encode(String),

    /// The bytes are not a valid encoding of a [`Player`].
    #[error("failed to decode player: {0}")]
    Decode(String),
}

/// One player's current game state, as exchanged between the two peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Name shown to the opponent.
    pub name: String,
    /// Moveset the player is playing with.
    pub moveset_name: Option<String>,
    /// Move picked for the current round, if any.
    pub choice: Option<String>,
    /// Whether the player is waiting for the next round.
    pub ready: bool,
    /// Rounds won so far.
    pub score: u32,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Returns a copy with `choice` set.
    pub fn choosing(mut self, choice: impl Into<String>) -> Self {
        self.choice = Some(choice.into());
        self
    }
}

fn codec_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PLAYER_BYTES)
        .with_fixint_encoding()
        .with_big_endian()
        .reject_trailing_bytes()
}

/// Encodes a player into its byte representation.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] only if the value exceeds
/// [`MAX_PLAYER_BYTES`].
pub fn encode_player(player: &Player) -> Result<Vec<u8>, CodecError> {
    codec_options()
        .serialize(player)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a player from bytes produced by [`encode_player`].
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for truncated, oversized, trailing, or
/// otherwise malformed input.
pub fn decode_player(bytes: &[u8]) -> Result<Player, CodecError> {
    codec_options()
        .deserialize(bytes)
        .map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_choice_only() {
        // Arrange
        let player = Player::default().choosing("rock");

        // Act
        let bytes = encode_player(&player).expect("encode");
        let decoded = decode_player(&bytes).expect("decode");

        // Assert
        assert_eq!(decoded, player);
    }

    #[test]
    fn test_round_trip_all_fields_populated() {
        let player = Player {
            name: "Callum".to_string(),
            moveset_name: Some("Classic".to_string()),
            choice: Some("scissors".to_string()),
            ready: true,
            score: 7,
        };
        let bytes = encode_player(&player).unwrap();
        assert_eq!(decode_player(&bytes).unwrap(), player);
    }

    #[test]
    fn test_round_trip_unicode_move_names() {
        let player = Player::new("Dave").choosing("🪨 rock");
        let bytes = encode_player(&player).unwrap();
        assert_eq!(decode_player(&bytes).unwrap(), player);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let player = Player::new("a").choosing("paper");
        assert_eq!(encode_player(&player).unwrap(), encode_player(&player).unwrap());
    }

    #[test]
    fn test_decode_five_garbage_bytes_fails() {
        // Arrange
        let garbage = [0xDE, 0xAD, 0xBE, 0xEF, 0x00];

        // Act
        let result = decode_player(&garbage);

        // Assert
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_empty_input_fails() {
        assert!(matches!(decode_player(&[]), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = encode_player(&Player::new("x")).unwrap();
        bytes.push(0x00);
        assert!(matches!(decode_player(&bytes), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_huge_declared_string_length() {
        // A name length of u64::MAX must not be trusted.
        let bytes = vec![0xFF; 8];
        assert!(matches!(decode_player(&bytes), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_player() {
        let player = Player::new("x".repeat(MAX_PLAYER_BYTES as usize));
        assert!(matches!(encode_player(&player), Err(CodecError::Encode(_))));
    }
}
