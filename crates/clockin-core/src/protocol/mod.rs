//! Protocol module containing the JSON message types and the text codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_client_msg, encode_server_envelope, ProtocolError, MAX_FRAME_BYTES};
pub use messages::*;
