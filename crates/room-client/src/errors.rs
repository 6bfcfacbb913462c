//! Client error types.

use common::{MediaKind, ProducerId};
use signaling_protocol::ReplyError;
use thiserror::Error;

/// Failures of the signaling channel itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The connection did not become ready within the bound.
    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    /// The connection closed before a response arrived.
    #[error("Disconnected")]
    Disconnected,

    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

/// Failures reported by a [`MediaDevice`](crate::device::MediaDevice).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("Device could not load router capabilities: {0}")]
    Load(String),

    #[error("No {0} source available")]
    Unavailable(MediaKind),

    #[error("Local transport error: {0}")]
    Transport(String),

    #[error("Local consumer error: {0}")]
    Consumer(String),
}

/// Failures of the session state machine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error(transparent)]
    Channel(ChannelError),

    /// The server rejected `joinRoom`.
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    /// Device and router share no codec.
    #[error("Incompatible capabilities")]
    IncompatibleCapabilities,

    /// Neither audio nor video could be captured.
    #[error("Media acquisition failed: {0}")]
    MediaAcquisitionFailed(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A request other than `joinRoom` was rejected by the server.
    #[error("{method} failed: {reason}")]
    Request { method: &'static str, reason: String },

    #[error("No {0} track is being produced")]
    NotProducing(MediaKind),

    #[error("Session is not live")]
    NotLive,

    #[error("Session already active")]
    AlreadyActive,

    /// Another consume of the same producer has not finished yet.
    #[error("Producer {0} is already being consumed")]
    ConsumeInProgress(ProducerId),
}

impl From<ChannelError> for SessionError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::ConnectionTimeout => SessionError::ConnectionTimeout,
            other => SessionError::Channel(other),
        }
    }
}

impl SessionError {
    pub(crate) fn from_reply(method: &'static str, e: ReplyError) -> Self {
        let reason = match e {
            ReplyError::Rejected(reason) => reason,
            ReplyError::Payload(detail) => format!("unexpected payload: {detail}"),
        };
        SessionError::Request { method, reason }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_timeout_maps_to_session_timeout() {
        let err: SessionError = ChannelError::ConnectionTimeout.into();
        assert_eq!(err, SessionError::ConnectionTimeout);

        let err: SessionError = ChannelError::Disconnected.into();
        assert_eq!(err.to_string(), "Disconnected");
    }

    #[test]
    fn test_rejected_reply_keeps_server_reason() {
        let err = SessionError::from_reply(
            "consume",
            ReplyError::Rejected("Cannot consume: incompatible RTP capabilities".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "consume failed: Cannot consume: incompatible RTP capabilities"
        );
    }
}
