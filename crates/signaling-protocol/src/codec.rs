//! Codec for encoding and decoding signaling frames.

use crate::events::{ClientEvent, ServerEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Default upper bound for one inbound frame.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame exceeds the configured size limit
    #[error("Frame too large: {len} bytes (limit {max})")]
    TooLarge { len: usize, max: usize },

    /// Frame is not valid JSON for the expected event set
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Event decoded but a payload inside it has the wrong shape
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Decode a frame sent by a client.
///
/// # Errors
///
/// Returns `CodecError::TooLarge` if `text` exceeds `max_len` bytes and
/// `CodecError::Json` if it is not a known client event.
pub fn decode_client(text: &str, max_len: usize) -> Result<ClientEvent, CodecError> {
    decode(text, max_len)
}

/// Encode a client event as a text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decode a frame sent by the relay.
///
/// # Errors
///
/// Returns `CodecError::TooLarge` if `text` exceeds `max_len` bytes and
/// `CodecError::Json` if it is not a known relay event.
pub fn decode_server(text: &str, max_len: usize) -> Result<ServerEvent, CodecError> {
    decode(text, max_len)
}

/// Encode a relay event as a text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

fn decode<T: DeserializeOwned>(text: &str, max_len: usize) -> Result<T, CodecError> {
    if text.len() > max_len {
        return Err(CodecError::TooLarge {
            len: text.len(),
            max: max_len,
        });
    }
    Ok(serde_json::from_str(text)?)
}

fn encode<T: Serialize>(event: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}
