//! Room service error types.
//!
//! Every signaling request failure is reported only to the requester as
//! `{"error": reason}`. The reason comes from [`RoomError::client_message`];
//! internal details are logged server-side but not exposed to clients.

use crate::media::MediaError;
use std::fmt;
use thiserror::Error;

/// The kind of object a stale or unknown id referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Room,
    Peer,
    Transport,
    /// The consuming peer has no open recv-direction transport.
    RecvTransport,
    Producer,
    Consumer,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Resource::Room => "Room",
            Resource::Peer => "Peer",
            Resource::Transport => "Transport",
            Resource::RecvTransport => "Recv transport",
            Resource::Producer => "Producer",
            Resource::Consumer => "Consumer",
        };
        f.write_str(text)
    }
}

/// Room service error type.
///
/// Maps to numeric codes used in logs and metrics:
/// - `Malformed`: `BAD_REQUEST` (1)
/// - `NotFound`: `NOT_FOUND` (4)
/// - `Conflict`, `AlreadyJoined`, `ConnectionLeft`: `CONFLICT` (5)
/// - `Internal`, `Media`, `Config`: `INTERNAL_ERROR` (6)
/// - `NoWorkersAvailable`, `RoomClosed`, `Draining`: `UNAVAILABLE` (7)
/// - `Incompatible`: `INCOMPATIBLE` (8)
#[derive(Debug, Clone, Error)]
pub enum RoomError {
    /// Room, peer, transport, producer or consumer referenced by a stale or invalid id.
    #[error("{0} not found")]
    NotFound(Resource),

    /// Receiving capabilities cannot decode the requested producer.
    #[error("Cannot consume: incompatible RTP capabilities")]
    Incompatible,

    /// Worker pool is empty; new rooms cannot be created.
    #[error("No media workers available")]
    NoWorkersAvailable,

    /// Media engine operation failed.
    #[error("Media engine error: {0}")]
    Media(#[from] MediaError),

    /// Connection is already in a different room.
    #[error("Already joined a room")]
    AlreadyJoined,

    /// Connection has left; no further requests are accepted.
    #[error("Connection has left")]
    ConnectionLeft,

    /// Request conflicts with existing state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Room was retired while the request was in flight.
    #[error("Room is closed")]
    RoomClosed,

    /// Service is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Frame could not be decoded.
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RoomError::Malformed(_) => 1,  // BAD_REQUEST
            RoomError::NotFound(_) => 4,   // NOT_FOUND
            RoomError::Conflict(_) | RoomError::AlreadyJoined | RoomError::ConnectionLeft => 5, // CONFLICT
            RoomError::Internal(_) | RoomError::Media(_) | RoomError::Config(_) => 6, // INTERNAL_ERROR
            RoomError::NoWorkersAvailable | RoomError::RoomClosed | RoomError::Draining => 7, // UNAVAILABLE
            RoomError::Incompatible => 8, // INCOMPATIBLE
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::NotFound(Resource::RecvTransport) => {
                "No recv transport found for consumer".to_string()
            }
            RoomError::NotFound(_)
            | RoomError::Incompatible
            | RoomError::AlreadyJoined
            | RoomError::ConnectionLeft
            | RoomError::RoomClosed => self.to_string(),
            RoomError::NoWorkersAvailable => "Server is at capacity, please try again".to_string(),
            RoomError::Draining => "Server is shutting down, please reconnect".to_string(),
            RoomError::Conflict(msg) => msg.clone(),
            RoomError::Malformed(_) => "Malformed request".to_string(),
            RoomError::Media(e) => e.client_message(),
            RoomError::Internal(_) | RoomError::Config(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// Returns a bounded label for the `error_type` metric dimension.
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            RoomError::NotFound(_) => "not_found",
            RoomError::Incompatible => "incompatible",
            RoomError::NoWorkersAvailable => "no_workers",
            RoomError::Media(_) => "media",
            RoomError::AlreadyJoined => "already_joined",
            RoomError::ConnectionLeft => "connection_left",
            RoomError::Conflict(_) => "conflict",
            RoomError::RoomClosed => "room_closed",
            RoomError::Draining => "draining",
            RoomError::Malformed(_) => "malformed",
            RoomError::Config(_) => "config",
            RoomError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(RoomError::NotFound(Resource::Peer).error_code(), 4);
        assert_eq!(RoomError::Conflict("dup".to_string()).error_code(), 5);
        assert_eq!(RoomError::AlreadyJoined.error_code(), 5);
        assert_eq!(RoomError::Internal("boom".to_string()).error_code(), 6);
        assert_eq!(RoomError::NoWorkersAvailable.error_code(), 7);
        assert_eq!(RoomError::Incompatible.error_code(), 8);
    }

    #[test]
    fn test_not_found_messages_name_the_resource() {
        assert_eq!(
            RoomError::NotFound(Resource::Room).client_message(),
            "Room not found"
        );
        assert_eq!(
            RoomError::NotFound(Resource::Transport).client_message(),
            "Transport not found"
        );
        assert_eq!(
            RoomError::NotFound(Resource::RecvTransport).client_message(),
            "No recv transport found for consumer"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = RoomError::Internal("channel send failed: 10.0.0.3".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");
        assert!(!internal.client_message().contains("10.0.0.3"));

        let config = RoomError::Config("bad port range".to_string());
        assert_eq!(config.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_incompatible_message() {
        assert_eq!(
            RoomError::Incompatible.client_message(),
            "Cannot consume: incompatible RTP capabilities"
        );
    }

    #[test]
    fn test_media_error_conversion() {
        let err: RoomError = MediaError::TransportClosed.into();
        assert!(matches!(err, RoomError::Media(_)));
        assert_eq!(err.error_type_label(), "media");
    }
}
