//! Media engine boundary.
//!
//! The room service never forwards packets itself. It drives a media engine
//! through the capability traits below: a [`MediaEngine`] spawns workers, a
//! worker hosts routers (one per room), a router hosts transports, and
//! transports carry producers and consumers.
//!
//! Closing an object closes everything it owns. A worker that dies takes its
//! routers with it; rooms bound to such a router stay registered and their
//! operations fail with ordinary [`MediaError`]s until the room is evicted.

pub mod local;

use async_trait::async_trait;
use common::{ConsumerId, MediaKind, ProducerId, TransportId};
use serde_json::{Map, Value};
use signaling_protocol::{
    DtlsParameters, RtpCapabilities, RtpCodecCapability, RtpParameters, TransportInfo,
};
use std::sync::Arc;
use thiserror::Error;

pub use local::LocalMediaEngine;

/// Media engine error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Failed to spawn media worker: {0}")]
    WorkerSpawn(String),

    #[error("Media worker is closed")]
    WorkerClosed,

    #[error("Router is closed")]
    RouterClosed,

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Producer not found")]
    ProducerNotFound,

    #[error("Transport is already connected")]
    AlreadyConnected,

    #[error("Invalid DTLS parameters: {0}")]
    InvalidDtls(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Consumer is closed")]
    ConsumerClosed,

    /// No producer codec can be decoded with the given capabilities.
    #[error("Incompatible RTP capabilities")]
    Incompatible,

    #[error("Crypto failure: {0}")]
    Crypto(String),
}

impl MediaError {
    /// Returns a client-safe error message.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MediaError::WorkerSpawn(_) | MediaError::Crypto(_) => {
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Parameters applied to every worker spawned by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

/// Parameters for a new WebRTC transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Address advertised in ICE candidates.
    pub announced_ip: String,
}

/// Factory for media workers.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Spawn a new worker.
    async fn spawn_worker(
        &self,
        settings: &WorkerSettings,
    ) -> Result<Arc<dyn MediaWorker>, MediaError>;
}

/// One media engine worker (a process or thread in a real engine).
#[async_trait]
pub trait MediaWorker: Send + Sync {
    fn id(&self) -> &str;

    fn is_alive(&self) -> bool;

    /// Resolves once the worker has died or been closed.
    async fn died(&self);

    /// Create a router configured with `codecs`.
    async fn create_router(
        &self,
        codecs: &[RtpCodecCapability],
    ) -> Result<Arc<dyn MediaRouter>, MediaError>;

    fn close(&self);
}

/// Per-room media router.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> &str;

    fn worker_id(&self) -> &str;

    /// Codecs and header extensions the router accepts, with payload types assigned.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Returns true if `producer_id` is an open producer on this router and
    /// one of its codecs can be decoded with `capabilities`.
    async fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool;

    async fn create_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<Arc<dyn MediaTransport>, MediaError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// WebRTC transport owned by one peer.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &TransportId;

    /// ICE and DTLS parameters the client needs to build its side.
    fn info(&self) -> TransportInfo;

    /// Complete the DTLS handshake with the remote parameters.
    async fn connect(&self, remote: DtlsParameters) -> Result<(), MediaError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<Arc<dyn MediaProducer>, MediaError>;

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn MediaConsumer>, MediaError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Outbound track registered on a router.
pub trait MediaProducer: Send + Sync {
    fn id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn app_data(&self) -> &Value;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Inbound track bound to one producer.
#[async_trait]
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> &ConsumerId;

    fn producer_id(&self) -> &ProducerId;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> &RtpParameters;

    async fn resume(&self) -> Result<(), MediaError>;

    fn is_paused(&self) -> bool;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Codec set every router is created with.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    let mut h264_parameters = Map::new();
    h264_parameters.insert("packetization-mode".to_string(), Value::from(1));
    h264_parameters.insert("profile-level-id".to_string(), Value::from("42e01f"));

    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            preferred_payload_type: None,
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            preferred_payload_type: None,
            clock_rate: 90000,
            channels: None,
            parameters: Map::new(),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: None,
            clock_rate: 90000,
            channels: None,
            parameters: h264_parameters,
        },
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_codecs_cover_both_kinds() {
        let codecs = default_media_codecs();
        assert_eq!(codecs.len(), 3);
        assert!(codecs.iter().any(|c| c.mime_type == "audio/opus"));
        assert!(codecs.iter().any(|c| c.mime_type == "video/VP8"));

        let h264 = codecs.iter().find(|c| c.mime_type == "video/H264").unwrap();
        assert_eq!(h264.parameters["packetization-mode"], 1);
        assert_eq!(h264.parameters["profile-level-id"], "42e01f");
    }

    #[test]
    fn test_client_message_hides_spawn_details() {
        let err = MediaError::WorkerSpawn("fork failed: EAGAIN".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert_eq!(
            MediaError::TransportClosed.client_message(),
            "Transport is closed"
        );
    }
}
