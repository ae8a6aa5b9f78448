//! Text codec for the WebSocket protocol.
//!
//! Wire format: one JSON object per WebSocket text frame, UTF-8, at most
//! [`MAX_FRAME_BYTES`] bytes for inbound frames.  The size cap is checked
//! before parsing so an oversized frame never reaches `serde_json`.

use thiserror::Error;

use crate::protocol::messages::{ClientMsg, ServerEnvelope};

/// Largest inbound frame the hub will parse.
///
/// The biggest legitimate inbound message is a `submitCode` with two ids and a
/// 12-digit code, well under 1 KiB.
pub const MAX_FRAME_BYTES: usize = 4096;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame exceeded [`MAX_FRAME_BYTES`].
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The frame was not valid JSON or did not match any message shape.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// An outbound message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(String),
}

/// Parses one inbound text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] or [`ProtocolError::Malformed`].
///
/// # Examples
///
/// ```rust
/// use clockin_core::{decode_client_msg, ClientMsg};
///
/// let msg = decode_client_msg(r#"{"type":"rotateNow","teamId":"T1"}"#).unwrap();
/// assert_eq!(msg, ClientMsg::RotateNow { team_id: "T1".into() });
/// ```
pub fn decode_client_msg(text: &str) -> Result<ClientMsg, ProtocolError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len: text.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Serializes one outbound envelope to a text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Serialize`] if `serde_json` fails, which for these
/// plain data types would indicate a bug.
pub fn encode_server_envelope(envelope: &ServerEnvelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::Serialize(e.to_string()))
}
