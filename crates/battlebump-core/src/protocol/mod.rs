//! Protocol module containing message types, the binary codec, and the
//! per-channel sequence counter.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_header, decode_message, encode_message, encode_message_now, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
