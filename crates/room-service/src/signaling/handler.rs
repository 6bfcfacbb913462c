//! Per-connection signaling dispatcher.
//!
//! A [`SignalingSession`] owns the room association of one WebSocket
//! connection and answers each request exactly once through the
//! connection's writer actor.
//!
//! ```text
//! Unjoined --joinRoom--> Joined --leaveRoom / disconnect--> Left
//! ```
//!
//! Requests are handled one at a time in arrival order. Side-effecting
//! requests queue their response first and only then ask the room to
//! announce the change, so the requester always learns the outcome of its
//! own request before any other peer hears about it.

use crate::actors::{Announcement, ConnectionActorHandle, RoomActorHandle, RoomRegistryHandle};
use crate::errors::{Resource, RoomError};
use crate::observability::metrics;

use common::{PeerId, RoomId};
use signaling_protocol::codec::{decode_client_frame, recover_request_id};
use signaling_protocol::sanitize::{display_name_or_default, sanitize_chat_message};
use signaling_protocol::{
    ClientFrame, ConsumeResponse, CreateTransportResponse, JoinRoomResponse, Notification,
    ProduceResponse, Reply, Request, ServerFrame,
};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

enum SessionState {
    Unjoined,
    Joined { room: RoomActorHandle },
    Left,
}

/// Signaling state of one connection.
pub struct SignalingSession {
    peer_id: PeerId,
    outbound: ConnectionActorHandle,
    registry: RoomRegistryHandle,
    state: SessionState,
}

type Handled = Result<(Reply, Option<Announcement>), RoomError>;

impl SignalingSession {
    #[must_use]
    pub fn new(
        peer_id: PeerId,
        outbound: ConnectionActorHandle,
        registry: RoomRegistryHandle,
    ) -> Self {
        Self {
            peer_id,
            outbound,
            registry,
            state: SessionState::Unjoined,
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Room this connection is currently joined to.
    #[must_use]
    pub fn room_id(&self) -> Option<&RoomId> {
        match &self.state {
            SessionState::Joined { room } => Some(room.room_id()),
            SessionState::Unjoined | SessionState::Left => None,
        }
    }

    #[must_use]
    pub fn has_left(&self) -> bool {
        matches!(self.state, SessionState::Left)
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match decode_client_frame(text) {
            Ok(ClientFrame::Request { id, request }) => self.handle_request(id, request).await,
            Ok(ClientFrame::Notify { message }) => self.handle_notification(message).await,
            Err(e) => {
                let error = RoomError::Malformed(e.to_string());
                metrics::record_error(error.error_type_label());
                match recover_request_id(text) {
                    Some(id) => {
                        warn!(
                            target: "room.signaling",
                            peer_id = %self.peer_id,
                            request_id = id,
                            error = %e,
                            "Malformed request"
                        );
                        self.respond(id, Reply::err(error.client_message())).await;
                    }
                    None => {
                        warn!(
                            target: "room.signaling",
                            peer_id = %self.peer_id,
                            error = %e,
                            "Dropping undecodable frame"
                        );
                    }
                }
            }
        }
    }

    #[instrument(
        skip_all,
        name = "room.signaling.request",
        fields(peer_id = %self.peer_id, request_id = id, method = request.method())
    )]
    async fn handle_request(&mut self, id: u64, request: Request) {
        let method = request.method();
        let start = Instant::now();

        let (reply, announcement) = match self.dispatch(request).await {
            Ok(handled) => handled,
            Err(e) => {
                metrics::record_error(e.error_type_label());
                match &e {
                    RoomError::Internal(_) | RoomError::Media(_) | RoomError::Config(_) => {
                        warn!(
                            target: "room.signaling",
                            peer_id = %self.peer_id,
                            method,
                            error = %e,
                            "Request failed"
                        );
                    }
                    _ => {
                        debug!(
                            target: "room.signaling",
                            peer_id = %self.peer_id,
                            method,
                            error = %e,
                            "Request rejected"
                        );
                    }
                }
                (Reply::err(e.client_message()), None)
            }
        };

        metrics::record_signaling_request(method, reply.is_success(), start.elapsed());
        self.respond(id, reply).await;

        // The response is queued ahead of anything the announcement causes.
        if let (Some(event), SessionState::Joined { room }) = (announcement, &self.state) {
            if let Err(e) = room.announce(self.peer_id.clone(), event).await {
                debug!(
                    target: "room.signaling",
                    peer_id = %self.peer_id,
                    error = %e,
                    "Announcement not delivered"
                );
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Handled {
        match request {
            Request::JoinRoom {
                room_id,
                display_name,
            } => self.join_room(room_id, display_name).await,

            Request::CreateTransport { direction } => {
                let transport = self
                    .joined_room()?
                    .create_transport(self.peer_id.clone(), direction)
                    .await?;
                Ok((ok_reply(&CreateTransportResponse { transport })?, None))
            }

            Request::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                self.joined_room()?
                    .connect_transport(self.peer_id.clone(), transport_id, dtls_parameters)
                    .await?;
                Ok((Reply::ack(), None))
            }

            Request::Produce {
                transport_id,
                kind,
                rtp_parameters,
                app_data,
            } => {
                let produced = self
                    .joined_room()?
                    .produce(
                        self.peer_id.clone(),
                        transport_id,
                        kind,
                        rtp_parameters,
                        app_data,
                    )
                    .await?;
                let reply = ok_reply(&ProduceResponse {
                    producer_id: produced.producer_id.clone(),
                })?;
                Ok((
                    reply,
                    Some(Announcement::NewProducer {
                        producer_id: produced.producer_id,
                    }),
                ))
            }

            Request::CloseProducer { producer_id } => {
                let closed = self
                    .joined_room()?
                    .close_producer(self.peer_id.clone(), producer_id.clone())
                    .await?;
                let announcement =
                    closed.map(|_| Announcement::ProducerClosed { producer_id });
                Ok((Reply::ack(), announcement))
            }

            Request::Consume {
                producer_peer_id,
                producer_id,
                rtp_capabilities,
            } => {
                let consumer = self
                    .joined_room()?
                    .consume(
                        self.peer_id.clone(),
                        producer_peer_id,
                        producer_id,
                        rtp_capabilities,
                    )
                    .await?;
                Ok((ok_reply(&ConsumeResponse { consumer })?, None))
            }

            Request::ResumeConsumer { consumer_id } => {
                self.joined_room()?
                    .resume_consumer(self.peer_id.clone(), consumer_id)
                    .await?;
                Ok((Reply::ack(), None))
            }
        }
    }

    async fn join_room(&mut self, room_id: RoomId, display_name: Option<String>) -> Handled {
        let room = match &self.state {
            SessionState::Left => return Err(RoomError::ConnectionLeft),
            SessionState::Joined { room } if room.room_id() == &room_id => Some(room.clone()),
            SessionState::Joined { .. } => return Err(RoomError::AlreadyJoined),
            SessionState::Unjoined => None,
        };
        let display_name = display_name_or_default(display_name.as_deref());

        let (room, outcome) = match room {
            Some(room) => {
                let outcome = room
                    .add_peer(self.peer_id.clone(), display_name, self.outbound.clone())
                    .await?;
                (room, outcome)
            }
            None => self.join_fresh(&room_id, display_name).await?,
        };

        if outcome.newly_joined {
            info!(
                target: "room.signaling",
                peer_id = %self.peer_id,
                room_id = %room_id,
                "Joined room"
            );
        }

        let reply = ok_reply(&JoinRoomResponse {
            peer_id: self.peer_id.clone(),
            router_capabilities: outcome.router_capabilities,
            existing_peers: outcome.existing_peers,
        })?;
        self.state = SessionState::Joined { room };

        let announcement = outcome.newly_joined.then_some(Announcement::PeerJoined);
        Ok((reply, announcement))
    }

    /// Join through the registry, retrying once if the room was retired
    /// between lookup and join.
    async fn join_fresh(
        &self,
        room_id: &RoomId,
        display_name: String,
    ) -> Result<(RoomActorHandle, crate::actors::JoinOutcome), RoomError> {
        let mut retried = false;
        loop {
            let room = self.registry.get_or_create(room_id.clone()).await?;
            match room
                .add_peer(
                    self.peer_id.clone(),
                    display_name.clone(),
                    self.outbound.clone(),
                )
                .await
            {
                Ok(outcome) => return Ok((room, outcome)),
                Err(RoomError::RoomClosed) if !retried => {
                    debug!(
                        target: "room.signaling",
                        peer_id = %self.peer_id,
                        room_id = %room_id,
                        "Room retired during join, retrying"
                    );
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn joined_room(&self) -> Result<&RoomActorHandle, RoomError> {
        match &self.state {
            SessionState::Joined { room } => Ok(room),
            SessionState::Unjoined => Err(RoomError::NotFound(Resource::Room)),
            SessionState::Left => Err(RoomError::ConnectionLeft),
        }
    }

    async fn handle_notification(&mut self, notification: Notification) {
        match notification {
            Notification::ChatMessage { message } => {
                let SessionState::Joined { room } = &self.state else {
                    return;
                };
                let Some(message) = sanitize_chat_message(&message) else {
                    return;
                };
                let _ = room.chat(self.peer_id.clone(), message).await;
            }

            Notification::MediaStateChanged { kind, enabled } => {
                let SessionState::Joined { room } = &self.state else {
                    return;
                };
                let _ = room.media_state(self.peer_id.clone(), kind, enabled).await;
            }

            Notification::LeaveRoom => self.leave("leaveRoom").await,
        }
    }

    /// Leave the current room. Safe to call repeatedly; only the first call
    /// removes the peer.
    pub async fn leave(&mut self, reason: &'static str) {
        let previous = std::mem::replace(&mut self.state, SessionState::Left);
        let SessionState::Joined { room } = previous else {
            return;
        };

        match room.remove_peer(self.peer_id.clone()).await {
            Ok(_) => {
                info!(
                    target: "room.signaling",
                    peer_id = %self.peer_id,
                    room_id = %room.room_id(),
                    reason,
                    "Left room"
                );
            }
            Err(e) => {
                debug!(
                    target: "room.signaling",
                    peer_id = %self.peer_id,
                    room_id = %room.room_id(),
                    error = %e,
                    "Room already closed on leave"
                );
            }
        }
    }

    async fn respond(&self, id: u64, body: Reply) {
        if let Err(e) = self
            .outbound
            .send_frame(ServerFrame::Response { id, body })
            .await
        {
            debug!(
                target: "room.signaling",
                peer_id = %self.peer_id,
                request_id = id,
                error = %e,
                "Response not delivered, connection closing"
            );
        }
    }
}

fn ok_reply<T: serde::Serialize>(data: &T) -> Result<Reply, RoomError> {
    Reply::ok(data).map_err(|e| RoomError::Internal(format!("reply encoding failed: {e}")))
}
