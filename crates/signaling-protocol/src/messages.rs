//! Frames and payloads of the signaling protocol.
//!
//! Requests and events are closed tagged enums so that dispatchers match them
//! exhaustively. All payload fields are camelCase on the wire.

use crate::rtp::{DtlsParameters, IceCandidate, IceParameters, RtpCapabilities, RtpParameters};
use chrono::{DateTime, Utc};
use common::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Client -> server
// ============================================================================

/// One frame sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// A request answered exactly once by a response with the same `id`.
    Request { id: u64, request: Request },
    /// A fire-and-forget message with no response.
    Notify { message: Notification },
}

/// Requests that receive exactly one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    JoinRoom {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    CreateTransport {
        direction: TransportDirection,
    },
    ConnectTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default)]
        app_data: Value,
    },
    CloseProducer {
        producer_id: ProducerId,
    },
    Consume {
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    },
    ResumeConsumer {
        consumer_id: ConsumerId,
    },
}

impl Request {
    /// Wire name of the request, also used as a bounded metric label.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Request::JoinRoom { .. } => "joinRoom",
            Request::CreateTransport { .. } => "createTransport",
            Request::ConnectTransport { .. } => "connectTransport",
            Request::Produce { .. } => "produce",
            Request::CloseProducer { .. } => "closeProducer",
            Request::Consume { .. } => "consume",
            Request::ResumeConsumer { .. } => "resumeConsumer",
        }
    }
}

/// Fire-and-forget client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Notification {
    ChatMessage { message: String },
    MediaStateChanged { kind: MediaKind, enabled: bool },
    LeaveRoom,
}

// ============================================================================
// Server -> client
// ============================================================================

/// One frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Response { id: u64, body: Reply },
    Event { event: ServerEvent },
}

/// Body of a response: either `{"success":true, ...data}` or `{"error":"reason"}`.
///
/// Use [`Reply::ok`], [`Reply::ack`] or [`Reply::err`] to build one; they
/// guarantee exactly one of the two shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(flatten)]
    data: Map<String, Value>,
}

/// Error returned when reading a reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplyError {
    /// The server answered with `{"error": reason}`.
    #[error("{0}")]
    Rejected(String),

    /// The success payload did not have the expected shape.
    #[error("Unexpected reply payload: {0}")]
    Payload(String),
}

impl Reply {
    /// Successful reply carrying the fields of `data` (which must serialize to
    /// a JSON object or to null).
    pub fn ok<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        let data = match serde_json::to_value(data)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        Ok(Self {
            success: Some(true),
            error: None,
            data,
        })
    }

    /// Successful reply with no payload.
    #[must_use]
    pub fn ack() -> Self {
        Self {
            success: Some(true),
            error: None,
            data: Map::new(),
        }
    }

    /// Failed reply carrying a client-safe reason.
    #[must_use]
    pub fn err(reason: impl Into<String>) -> Self {
        Self {
            success: None,
            error: Some(reason.into()),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Decode the success payload into `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, ReplyError> {
        if let Some(reason) = self.error {
            return Err(ReplyError::Rejected(reason));
        }
        serde_json::from_value(Value::Object(self.data))
            .map_err(|e| ReplyError::Payload(e.to_string()))
    }

    /// Check for success, ignoring any payload.
    pub fn into_ack(self) -> Result<(), ReplyError> {
        match self.error {
            Some(reason) => Err(ReplyError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

/// Events pushed by the server without a prior request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    PeerJoined {
        peer_id: PeerId,
        display_name: String,
    },
    PeerLeft {
        peer_id: PeerId,
        display_name: String,
    },
    NewProducer {
        producer_id: ProducerId,
        peer_id: PeerId,
        kind: MediaKind,
        #[serde(default)]
        app_data: Value,
    },
    ProducerClosed {
        producer_id: ProducerId,
        peer_id: PeerId,
    },
    PeerMediaStateChanged {
        peer_id: PeerId,
        kind: MediaKind,
        enabled: bool,
    },
    ChatMessage(ChatMessage),
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ServerEvent::PeerJoined { .. } => "peerJoined",
            ServerEvent::PeerLeft { .. } => "peerLeft",
            ServerEvent::NewProducer { .. } => "newProducer",
            ServerEvent::ProducerClosed { .. } => "producerClosed",
            ServerEvent::PeerMediaStateChanged { .. } => "peerMediaStateChanged",
            ServerEvent::ChatMessage(_) => "chatMessage",
        }
    }
}

/// A chat message as rebroadcast by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: PeerId,
    pub sender_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Response payloads
// ============================================================================

/// Summary of a peer already present in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: PeerId,
    pub display_name: String,
    pub producer_ids: Vec<ProducerId>,
}

/// Payload of a successful `joinRoom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    /// Identity assigned to the joining connection.
    pub peer_id: PeerId,
    pub router_capabilities: RtpCapabilities,
    pub existing_peers: Vec<PeerSummary>,
}

/// Everything a client needs to build its side of a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportResponse {
    pub transport: TransportInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceResponse {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResponse {
    pub consumer: ConsumerInfo,
}
