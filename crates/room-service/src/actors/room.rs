//! `RoomActor` - per-room actor that owns peers and their media objects.
//!
//! Each `RoomActor`:
//! - Owns one media router for the lifetime of the room
//! - Owns every peer in the room, with the transports, producers and
//!   consumers that peer created
//! - Broadcasts room events through each peer's `ConnectionActorHandle`
//!
//! All state is confined to the actor task, so every operation re-validates
//! the peer and transport it touches instead of trusting an earlier lookup.
//!
//! # Emptiness
//!
//! The room remembers the instant it last became empty. When the last peer
//! leaves it notifies the registry, which schedules a deferred
//! [`RoomMessage::RetireIfEmpty`]; the room retires only if it stayed empty
//! for the whole grace window.

use super::connection::ConnectionActorHandle;
use super::messages::{
    Announcement, ConsumerSnapshot, JoinOutcome, PeerSnapshot, ProducedTrack, RegistryMessage,
    RoomMessage, RoomSnapshot,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::errors::{Resource, RoomError};
use crate::media::{MediaConsumer, MediaProducer, MediaRouter, MediaTransport, TransportOptions};

use chrono::{DateTime, Utc};
use common::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
use serde_json::Value;
use signaling_protocol::{
    ChatMessage, ConsumerInfo, DtlsParameters, PeerSummary, RtpCapabilities, RtpParameters,
    ServerEvent, TransportInfo,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
///
/// Every method fails with [`RoomError::RoomClosed`] once the actor has
/// stopped.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RoomError::RoomClosed)?;
        rx.await.map_err(|_| RoomError::RoomClosed)
    }

    async fn notify(&self, message: RoomMessage) -> Result<(), RoomError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| RoomError::RoomClosed)
    }

    /// Add a peer. Adding a peer that is already present returns the current
    /// view with `newly_joined == false` and leaves its state untouched.
    pub async fn add_peer(
        &self,
        peer_id: PeerId,
        display_name: String,
        outbound: ConnectionActorHandle,
    ) -> Result<JoinOutcome, RoomError> {
        self.request(|respond_to| RoomMessage::AddPeer {
            peer_id,
            display_name,
            outbound,
            respond_to,
        })
        .await?
    }

    /// Remove a peer. Returns false if it was not present.
    pub async fn remove_peer(&self, peer_id: PeerId) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomMessage::RemovePeer {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn create_transport(
        &self,
        peer_id: PeerId,
        direction: TransportDirection,
    ) -> Result<TransportInfo, RoomError> {
        self.request(|respond_to| RoomMessage::CreateTransport {
            peer_id,
            direction,
            respond_to,
        })
        .await?
    }

    pub async fn connect_transport(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::ConnectTransport {
            peer_id,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn produce(
        &self,
        peer_id: PeerId,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<ProducedTrack, RoomError> {
        self.request(|respond_to| RoomMessage::Produce {
            peer_id,
            transport_id,
            kind,
            rtp_parameters,
            app_data,
            respond_to,
        })
        .await?
    }

    /// Close a producer and every consumer bound to it.
    ///
    /// Returns the producer's kind, or `None` if no such producer was open.
    pub async fn close_producer(
        &self,
        peer_id: PeerId,
        producer_id: ProducerId,
    ) -> Result<Option<MediaKind>, RoomError> {
        self.request(|respond_to| RoomMessage::CloseProducer {
            peer_id,
            producer_id,
            respond_to,
        })
        .await?
    }

    pub async fn consume(
        &self,
        peer_id: PeerId,
        producer_peer_id: PeerId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerInfo, RoomError> {
        self.request(|respond_to| RoomMessage::Consume {
            peer_id,
            producer_peer_id,
            producer_id,
            rtp_capabilities,
            respond_to,
        })
        .await?
    }

    pub async fn resume_consumer(
        &self,
        peer_id: PeerId,
        consumer_id: ConsumerId,
    ) -> Result<(), RoomError> {
        self.request(|respond_to| RoomMessage::ResumeConsumer {
            peer_id,
            consumer_id,
            respond_to,
        })
        .await?
    }

    /// Summaries of every peer except `peer_id`, oldest first.
    pub async fn peers_except(&self, peer_id: PeerId) -> Result<Vec<PeerSummary>, RoomError> {
        self.request(|respond_to| RoomMessage::PeersExcept {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn announce(&self, origin: PeerId, event: Announcement) -> Result<(), RoomError> {
        self.notify(RoomMessage::Announce { origin, event }).await
    }

    pub async fn chat(&self, peer_id: PeerId, message: String) -> Result<(), RoomError> {
        self.notify(RoomMessage::Chat { peer_id, message }).await
    }

    pub async fn media_state(
        &self,
        peer_id: PeerId,
        kind: MediaKind,
        enabled: bool,
    ) -> Result<(), RoomError> {
        self.notify(RoomMessage::MediaState {
            peer_id,
            kind,
            enabled,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|respond_to| RoomMessage::GetSnapshot { respond_to })
            .await
    }

    /// Retire the room if it has been empty for at least `grace`.
    pub async fn retire_if_empty(&self, grace: Duration) -> Result<bool, RoomError> {
        self.request(|respond_to| RoomMessage::RetireIfEmpty { grace, respond_to })
            .await
    }

    /// Close the room, its peers and its router.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}

struct OpenTransport {
    direction: TransportDirection,
    transport: Arc<dyn MediaTransport>,
}

/// A participant and the media objects it owns.
struct Peer {
    display_name: String,
    joined_at: DateTime<Utc>,
    join_seq: u64,
    outbound: ConnectionActorHandle,
    transports: Vec<OpenTransport>,
    producers: Vec<Arc<dyn MediaProducer>>,
    consumers: Vec<Arc<dyn MediaConsumer>>,
}

impl Peer {
    fn transport(&self, transport_id: &TransportId) -> Option<&OpenTransport> {
        self.transports
            .iter()
            .find(|t| t.transport.id() == transport_id && !t.transport.is_closed())
    }

    fn open_transport(&self, direction: TransportDirection) -> Option<&OpenTransport> {
        self.transports
            .iter()
            .find(|t| t.direction == direction && !t.transport.is_closed())
    }

    fn producer(&self, producer_id: &ProducerId) -> Option<&Arc<dyn MediaProducer>> {
        self.producers
            .iter()
            .find(|p| p.id() == producer_id && !p.is_closed())
    }

    fn open_producer_ids(&self) -> Vec<ProducerId> {
        self.producers
            .iter()
            .filter(|p| !p.is_closed())
            .map(|p| p.id().clone())
            .collect()
    }

    /// Drop every consumer bound to one of `producer_ids`, closing it.
    fn close_consumers_of(&mut self, producer_ids: &[ProducerId]) {
        self.consumers.retain(|consumer| {
            if producer_ids.contains(consumer.producer_id()) {
                consumer.close();
                false
            } else {
                true
            }
        });
    }

    /// Close producers, then consumers, then transports.
    fn close_media(&mut self) -> Vec<ProducerId> {
        let closed: Vec<ProducerId> = self.producers.iter().map(|p| p.id().clone()).collect();
        for producer in self.producers.drain(..) {
            producer.close();
        }
        for consumer in self.consumers.drain(..) {
            consumer.close();
        }
        for open in self.transports.drain(..) {
            open.transport.close();
        }
        closed
    }

    fn summary(&self, id: &PeerId) -> PeerSummary {
        PeerSummary {
            id: id.clone(),
            display_name: self.display_name.clone(),
            producer_ids: self.open_producer_ids(),
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    router: Arc<dyn MediaRouter>,
    transport_options: TransportOptions,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    created_at: DateTime<Utc>,
    peers: HashMap<PeerId, Peer>,
    next_join_seq: u64,
    /// Set while the room has no peers.
    empty_since: Option<Instant>,
    registry: mpsc::WeakSender<RegistryMessage>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor around an already created router.
    ///
    /// The room starts empty; `registry` is notified each time it becomes
    /// empty again.
    pub fn spawn(
        room_id: RoomId,
        router: Arc<dyn MediaRouter>,
        transport_options: TransportOptions,
        registry: mpsc::WeakSender<RegistryMessage>,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            router,
            transport_options,
            receiver,
            cancel_token: cancel_token.clone(),
            created_at: Utc::now(),
            peers: HashMap::new(),
            next_join_seq: 0,
            empty_since: Some(Instant::now()),
            registry,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "room.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "room.actor.room",
            room_id = %self.room_id,
            router_id = %self.router.id(),
            worker_id = %self.router.worker_id(),
            "RoomActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "room.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            debug!(
                                target: "room.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.close_room();

        info!(
            target: "room.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::AddPeer {
                peer_id,
                display_name,
                outbound,
                respond_to,
            } => {
                let outcome = self.add_peer(peer_id, display_name, outbound);
                let _ = respond_to.send(Ok(outcome));
            }

            RoomMessage::RemovePeer {
                peer_id,
                respond_to,
            } => {
                let removed = self.remove_peer(&peer_id);
                let _ = respond_to.send(removed);
            }

            RoomMessage::CreateTransport {
                peer_id,
                direction,
                respond_to,
            } => {
                let result = self.create_transport(&peer_id, direction).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectTransport {
                peer_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .connect_transport(&peer_id, &transport_id, dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                peer_id,
                transport_id,
                kind,
                rtp_parameters,
                app_data,
                respond_to,
            } => {
                let result = self
                    .produce(&peer_id, &transport_id, kind, rtp_parameters, app_data)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::CloseProducer {
                peer_id,
                producer_id,
                respond_to,
            } => {
                let result = self.close_producer(&peer_id, &producer_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::Consume {
                peer_id,
                producer_peer_id,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .consume(&peer_id, &producer_peer_id, &producer_id, &rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ResumeConsumer {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = self.resume_consumer(&peer_id, &consumer_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::PeersExcept {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.peers_except(&peer_id));
            }

            RoomMessage::Announce { origin, event } => self.announce(&origin, event),

            RoomMessage::Chat { peer_id, message } => self.chat(&peer_id, message),

            RoomMessage::MediaState {
                peer_id,
                kind,
                enabled,
            } => self.media_state(&peer_id, kind, enabled),

            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            RoomMessage::RetireIfEmpty { grace, respond_to } => {
                let _ = respond_to.send(self.retire_if_empty(grace));
            }
        }
    }

    fn add_peer(
        &mut self,
        peer_id: PeerId,
        display_name: String,
        outbound: ConnectionActorHandle,
    ) -> JoinOutcome {
        let newly_joined = !self.peers.contains_key(&peer_id);

        if newly_joined {
            self.next_join_seq += 1;
            info!(
                target: "room.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Peer joined"
            );
            self.peers.insert(
                peer_id.clone(),
                Peer {
                    display_name,
                    joined_at: Utc::now(),
                    join_seq: self.next_join_seq,
                    outbound,
                    transports: Vec::new(),
                    producers: Vec::new(),
                    consumers: Vec::new(),
                },
            );
            self.empty_since = None;
            self.metrics.peer_joined();
        } else {
            debug!(
                target: "room.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Duplicate join, returning existing peer"
            );
        }

        JoinOutcome {
            router_capabilities: self.router.rtp_capabilities(),
            existing_peers: self.peers_except(&peer_id),
            newly_joined,
        }
    }

    fn remove_peer(&mut self, peer_id: &PeerId) -> bool {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return false;
        };

        let closed_producers = peer.close_media();
        let Some(peer) = self.peers.remove(peer_id) else {
            return false;
        };

        for other in self.peers.values_mut() {
            other.close_consumers_of(&closed_producers);
        }

        self.metrics.peer_left();
        info!(
            target: "room.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            remaining = self.peers.len(),
            "Peer left"
        );

        self.broadcast(
            Some(peer_id),
            &ServerEvent::PeerLeft {
                peer_id: peer_id.clone(),
                display_name: peer.display_name,
            },
        );

        if self.peers.is_empty() {
            self.empty_since = Some(Instant::now());
            self.notify_emptied();
        }

        true
    }

    fn notify_emptied(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // The registry may be awaiting this actor, so deliver off the actor task.
        let room_id = self.room_id.clone();
        tokio::spawn(async move {
            if registry
                .send(RegistryMessage::RoomEmptied {
                    room_id: room_id.clone(),
                })
                .await
                .is_err()
            {
                debug!(
                    target: "room.actor.room",
                    room_id = %room_id,
                    "Registry gone before room emptied notice"
                );
            }
        });
    }

    async fn create_transport(
        &mut self,
        peer_id: &PeerId,
        direction: TransportDirection,
    ) -> Result<TransportInfo, RoomError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or(RoomError::NotFound(Resource::Peer))?;

        peer.transports.retain(|t| !t.transport.is_closed());
        if peer.open_transport(direction).is_some() {
            return Err(RoomError::Conflict(format!(
                "A {} transport is already open",
                direction.as_str()
            )));
        }

        let transport = self
            .router
            .create_transport(&self.transport_options)
            .await?;
        let info = transport.info();

        let Some(peer) = self.peers.get_mut(peer_id) else {
            transport.close();
            return Err(RoomError::NotFound(Resource::Peer));
        };
        peer.transports.push(OpenTransport {
            direction,
            transport,
        });

        debug!(
            target: "room.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %info.id,
            direction = direction.as_str(),
            "Transport created"
        );
        Ok(info)
    }

    async fn connect_transport(
        &self,
        peer_id: &PeerId,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or(RoomError::NotFound(Resource::Peer))?;
        let open = peer
            .transport(transport_id)
            .ok_or(RoomError::NotFound(Resource::Transport))?;

        open.transport.connect(dtls_parameters).await?;
        Ok(())
    }

    async fn produce(
        &mut self,
        peer_id: &PeerId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: Value,
    ) -> Result<ProducedTrack, RoomError> {
        let peer = self
            .peers
            .get(peer_id)
            .ok_or(RoomError::NotFound(Resource::Peer))?;
        let transport = peer
            .transport(transport_id)
            .filter(|t| t.direction == TransportDirection::Send)
            .map(|t| Arc::clone(&t.transport))
            .ok_or(RoomError::NotFound(Resource::Transport))?;

        let producer = transport.produce(kind, rtp_parameters, app_data).await?;
        let producer_id = producer.id().clone();

        let Some(peer) = self.peers.get_mut(peer_id) else {
            producer.close();
            return Err(RoomError::NotFound(Resource::Peer));
        };
        peer.producers.retain(|p| !p.is_closed());
        peer.producers.push(producer);

        info!(
            target: "room.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = kind.as_str(),
            "Producer created"
        );
        Ok(ProducedTrack { producer_id, kind })
    }

    fn close_producer(
        &mut self,
        peer_id: &PeerId,
        producer_id: &ProducerId,
    ) -> Result<Option<MediaKind>, RoomError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or(RoomError::NotFound(Resource::Peer))?;

        let Some(position) = peer.producers.iter().position(|p| p.id() == producer_id) else {
            return Ok(None);
        };
        let producer = peer.producers.remove(position);
        if producer.is_closed() {
            return Ok(None);
        }
        producer.close();
        let kind = producer.kind();

        let closed = [producer_id.clone()];
        for other in self.peers.values_mut() {
            other.close_consumers_of(&closed);
        }

        info!(
            target: "room.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            "Producer closed"
        );
        Ok(Some(kind))
    }

    async fn consume(
        &mut self,
        peer_id: &PeerId,
        producer_peer_id: &PeerId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerInfo, RoomError> {
        if !self.peers.contains_key(peer_id) {
            return Err(RoomError::NotFound(Resource::Peer));
        }

        let producer_open = self
            .peers
            .get(producer_peer_id)
            .and_then(|p| p.producer(producer_id))
            .is_some();
        if !producer_open {
            return Err(RoomError::NotFound(Resource::Producer));
        }

        if !self.router.can_consume(producer_id, rtp_capabilities).await {
            debug!(
                target: "room.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                producer_id = %producer_id,
                "Capabilities cannot consume producer"
            );
            return Err(RoomError::Incompatible);
        }

        let recv = self
            .peers
            .get(peer_id)
            .and_then(|p| p.open_transport(TransportDirection::Recv))
            .map(|t| Arc::clone(&t.transport))
            .ok_or(RoomError::NotFound(Resource::RecvTransport))?;

        let consumer = recv.consume(producer_id, rtp_capabilities, true).await?;
        let info = ConsumerInfo {
            id: consumer.id().clone(),
            producer_id: consumer.producer_id().clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
        };

        let Some(peer) = self.peers.get_mut(peer_id) else {
            consumer.close();
            return Err(RoomError::NotFound(Resource::Peer));
        };
        peer.consumers.retain(|c| !c.is_closed());
        peer.consumers.push(consumer);

        debug!(
            target: "room.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            consumer_id = %info.id,
            producer_id = %producer_id,
            "Consumer created (paused)"
        );
        Ok(info)
    }

    async fn resume_consumer(
        &self,
        peer_id: &PeerId,
        consumer_id: &ConsumerId,
    ) -> Result<(), RoomError> {
        let consumer = self
            .peers
            .get(peer_id)
            .ok_or(RoomError::NotFound(Resource::Peer))?
            .consumers
            .iter()
            .find(|c| c.id() == consumer_id && !c.is_closed())
            .map(Arc::clone)
            .ok_or(RoomError::NotFound(Resource::Consumer))?;

        consumer.resume().await?;
        Ok(())
    }

    fn peers_except(&self, peer_id: &PeerId) -> Vec<PeerSummary> {
        let mut others: Vec<(&PeerId, &Peer)> =
            self.peers.iter().filter(|(id, _)| *id != peer_id).collect();
        others.sort_by_key(|(_, peer)| peer.join_seq);
        others
            .into_iter()
            .map(|(id, peer)| peer.summary(id))
            .collect()
    }

    /// Re-validate an announcement against current state and broadcast it.
    fn announce(&self, origin: &PeerId, event: Announcement) {
        let Some(peer) = self.peers.get(origin) else {
            debug!(
                target: "room.actor.room",
                room_id = %self.room_id,
                peer_id = %origin,
                "Dropping announcement from departed peer"
            );
            return;
        };

        let event = match event {
            Announcement::PeerJoined => ServerEvent::PeerJoined {
                peer_id: origin.clone(),
                display_name: peer.display_name.clone(),
            },
            Announcement::NewProducer { producer_id } => {
                let Some(producer) = peer.producer(&producer_id) else {
                    return;
                };
                ServerEvent::NewProducer {
                    peer_id: origin.clone(),
                    kind: producer.kind(),
                    app_data: producer.app_data().clone(),
                    producer_id,
                }
            }
            Announcement::ProducerClosed { producer_id } => ServerEvent::ProducerClosed {
                producer_id,
                peer_id: origin.clone(),
            },
        };

        self.broadcast(Some(origin), &event);
    }

    fn chat(&self, peer_id: &PeerId, message: String) {
        let Some(peer) = self.peers.get(peer_id) else {
            return;
        };

        let chat = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: peer_id.clone(),
            sender_name: peer.display_name.clone(),
            message,
            timestamp: Utc::now(),
        };
        self.broadcast(None, &ServerEvent::ChatMessage(chat));
    }

    fn media_state(&self, peer_id: &PeerId, kind: MediaKind, enabled: bool) {
        if !self.peers.contains_key(peer_id) {
            return;
        }
        self.broadcast(
            Some(peer_id),
            &ServerEvent::PeerMediaStateChanged {
                peer_id: peer_id.clone(),
                kind,
                enabled,
            },
        );
    }

    /// Deliver `event` to every peer except `except`. At-most-once.
    fn broadcast(&self, except: Option<&PeerId>, event: &ServerEvent) {
        for (id, peer) in &self.peers {
            if Some(id) == except {
                continue;
            }
            if !peer.outbound.try_send_event(event.clone()) {
                debug!(
                    target: "room.actor.room",
                    room_id = %self.room_id,
                    peer_id = %id,
                    event = event.name(),
                    "Event not delivered"
                );
            }
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        let mut peers: Vec<(&PeerId, &Peer)> = self.peers.iter().collect();
        peers.sort_by_key(|(_, peer)| peer.join_seq);

        RoomSnapshot {
            id: self.room_id.clone(),
            peer_count: self.peers.len(),
            created_at: self.created_at,
            peers: peers
                .into_iter()
                .map(|(id, peer)| PeerSnapshot {
                    id: id.clone(),
                    display_name: peer.display_name.clone(),
                    joined_at: peer.joined_at,
                    producer_ids: peer.open_producer_ids(),
                    consumers: peer
                        .consumers
                        .iter()
                        .filter(|c| !c.is_closed())
                        .map(|c| ConsumerSnapshot {
                            id: c.id().clone(),
                            producer_id: c.producer_id().clone(),
                            kind: c.kind(),
                            paused: c.is_paused(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn retire_if_empty(&mut self, grace: Duration) -> bool {
        let expired = self.peers.is_empty()
            && self
                .empty_since
                .is_some_and(|since| since.elapsed() >= grace);

        if expired {
            info!(
                target: "room.actor.room",
                room_id = %self.room_id,
                "Room stayed empty for the grace window, retiring"
            );
            self.cancel_token.cancel();
        }
        expired
    }

    fn close_room(&mut self) {
        for (_, mut peer) in self.peers.drain() {
            peer.close_media();
            self.metrics.peer_left();
        }
        self.router.close();
        self.receiver.close();
    }
}
