//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::errors::RoomError;
use crate::media::MediaRouter;
use chrono::{DateTime, Utc};
use common::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
use serde::Serialize;
use serde_json::Value;
use signaling_protocol::{
    ConsumerInfo, DtlsParameters, PeerSummary, RtpCapabilities, RtpParameters, ServerEvent,
    ServerFrame, TransportInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `RoomRegistryActor`.
pub enum RegistryMessage {
    /// Return the room for `room_id`, creating it (and its router) if absent.
    GetOrCreate {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, RoomError>>,
    },

    /// Look up an existing room.
    Get {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Close and drop a room. Responds with false if it was already absent.
    Remove {
        room_id: RoomId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Posted back by the task that creates a room's router.
    RouterReady {
        room_id: RoomId,
        result: Result<Arc<dyn MediaRouter>, RoomError>,
    },

    /// The last peer left a room; start its grace timer.
    RoomEmptied { room_id: RoomId },

    /// Grace timer fired; evict the room if it stayed empty.
    EvictIfEmpty { room_id: RoomId },

    /// Get current status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Close every room and stop the actor.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Registry status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub rooms: usize,
    /// Rooms whose router is still being created.
    pub pending_rooms: usize,
}

/// Messages sent to `RoomActor`.
pub enum RoomMessage {
    AddPeer {
        peer_id: PeerId,
        display_name: String,
        outbound: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<JoinOutcome, RoomError>>,
    },

    /// Responds with false if the peer was not present.
    RemovePeer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<bool>,
    },

    CreateTransport {
        peer_id: PeerId,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportInfo, RoomError>>,
    },

    ConnectTransport {
        peer_id: PeerId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    Produce {
        peer_id: PeerId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
        respond_to: oneshot::Sender<Result<ProducedTrack, RoomError>>,
    },

    /// Responds with the closed producer's kind, or `None` if it was absent.
    CloseProducer {
        peer_id: PeerId,
        producer_id: ProducerId,
        respond_to: oneshot::Sender<Result<Option<MediaKind>, RoomError>>,
    },

    Consume {
        peer_id: PeerId,
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
        respond_to: oneshot::Sender<Result<ConsumerInfo, RoomError>>,
    },

    ResumeConsumer {
        peer_id: PeerId,
        consumer_id: ConsumerId,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    PeersExcept {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Vec<PeerSummary>>,
    },

    /// Broadcast an event caused by `origin`'s request to every other peer.
    ///
    /// Sent by the signaling handler after the originating response has been
    /// queued, so the requester always learns the outcome first.
    Announce { origin: PeerId, event: Announcement },

    /// Rebroadcast a chat message to every peer, sender included.
    Chat { peer_id: PeerId, message: String },

    /// Rebroadcast a media state change to every peer except the sender.
    MediaState {
        peer_id: PeerId,
        kind: MediaKind,
        enabled: bool,
    },

    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },

    /// Close the room if it has been empty for at least `grace`.
    RetireIfEmpty {
        grace: Duration,
        respond_to: oneshot::Sender<bool>,
    },
}

/// Events announced after a successful request.
#[derive(Debug, Clone, PartialEq)]
pub enum Announcement {
    /// The origin joined the room.
    PeerJoined,
    NewProducer { producer_id: ProducerId },
    ProducerClosed { producer_id: ProducerId },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write a frame to the socket.
    Send { frame: ServerFrame },

    /// Flush and close the socket.
    Close { reason: String },
}

impl ConnectionMessage {
    #[must_use]
    pub fn event(event: ServerEvent) -> Self {
        ConnectionMessage::Send {
            frame: ServerFrame::Event { event },
        }
    }
}

/// Result of `addPeer`.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub router_capabilities: RtpCapabilities,
    /// Other peers, oldest first.
    pub existing_peers: Vec<PeerSummary>,
    /// False when the peer was already present (duplicate join).
    pub newly_joined: bool,
}

/// Result of `produce`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedTrack {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// Room state as served by `GET /api/rooms/:id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub peer_count: usize,
    pub created_at: DateTime<Utc>,
    pub peers: Vec<PeerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    pub producer_ids: Vec<ProducerId>,
    pub consumers: Vec<ConsumerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSnapshot {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub paused: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = RoomSnapshot {
            id: RoomId::from("r1"),
            peer_count: 1,
            created_at: Utc::now(),
            peers: vec![PeerSnapshot {
                id: PeerId::from("p1"),
                display_name: "Ada".to_string(),
                joined_at: Utc::now(),
                producer_ids: vec![ProducerId::from("prod-1")],
                consumers: vec![ConsumerSnapshot {
                    id: ConsumerId::from("c1"),
                    producer_id: ProducerId::from("prod-2"),
                    kind: MediaKind::Audio,
                    paused: true,
                }],
            }],
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["peerCount"], 1);
        assert!(json["createdAt"].is_string());
        assert_eq!(json["peers"][0]["displayName"], "Ada");
        assert_eq!(json["peers"][0]["producerIds"][0], "prod-1");
        assert_eq!(json["peers"][0]["consumers"][0]["producerId"], "prod-2");
        assert_eq!(json["peers"][0]["consumers"][0]["paused"], true);
    }

    #[test]
    fn test_connection_event_helper() {
        let msg = ConnectionMessage::event(ServerEvent::PeerLeft {
            peer_id: PeerId::from("p1"),
            display_name: "Ada".to_string(),
        });
        match msg {
            ConnectionMessage::Send {
                frame: ServerFrame::Event { event },
            } => assert_eq!(event.name(), "peerLeft"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
