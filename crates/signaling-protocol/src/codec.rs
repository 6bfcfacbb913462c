//! Codec for encoding and decoding signaling frames.

use crate::messages::{ClientFrame, ServerFrame};
use serde_json::Value;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame was not valid JSON or did not match the protocol
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    /// Frame exceeded the maximum accepted size
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

/// Largest text frame accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Encode a client frame to JSON text
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a client frame from JSON text
///
/// # Errors
///
/// Returns an error if the text is oversized, not JSON, or names an unknown
/// request or notification.
pub fn decode_client_frame(text: &str) -> Result<ClientFrame, CodecError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a server frame to JSON text
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, CodecError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a server frame from JSON text
///
/// # Errors
///
/// Returns an error if the text is not a valid server frame
pub fn decode_server_frame(text: &str) -> Result<ServerFrame, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Recover the correlation id of a request frame that failed to decode, so
/// the sender still receives an error response for it.
#[must_use]
pub fn recover_request_id(text: &str) -> Option<u64> {
    if text.len() > MAX_FRAME_BYTES {
        return None;
    }
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != "request" {
        return None;
    }
    value.get("id")?.as_u64()
}
