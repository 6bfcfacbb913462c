//! Client session state machine.
//!
//! ```text
//! Idle -> Connecting -> AwaitingJoinAck -> LoadingCapabilities
//!      -> AcquiringLocalMedia -> CreatingTransports -> Producing
//!      -> ConsumingExisting -> Live
//! ```
//!
//! Any failing step moves to `Failed(reason)`; nothing is retried
//! automatically. Once live, a background task folds server events into the
//! [`RoomView`] and consumes newly announced producers.

use crate::channel::{SignalingClient, DEFAULT_CONNECT_TIMEOUT};
use crate::device::{LocalTrack, MediaDevice};
use crate::errors::SessionError;
use crate::view::{RemoteTrack, RoomView};

use common::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportDirection, TransportId};
use serde::de::DeserializeOwned;
use signaling_protocol::{
    ConsumeResponse, CreateTransportResponse, JoinRoomResponse, Notification, ProduceResponse,
    ReplyError, Request, RtpCapabilities, ServerEvent,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Where and how to join.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling endpoint, e.g. `ws://host:5001/ws`.
    pub url: String,
    pub room_id: RoomId,
    pub display_name: Option<String>,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, room_id: impl Into<RoomId>) -> Self {
        Self {
            url: url.into(),
            room_id: room_id.into(),
            display_name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingJoinAck,
    LoadingCapabilities,
    AcquiringLocalMedia,
    CreatingTransports,
    Producing,
    ConsumingExisting,
    Live,
    Failed(String),
}

/// State shared between the controller and its event task.
struct Shared {
    client: SignalingClient,
    device: Arc<dyn MediaDevice>,
    local_peer_id: PeerId,
    recv_capabilities: RtpCapabilities,
    view: Arc<watch::Sender<RoomView>>,
    consumers: Mutex<HashMap<ConsumerId, (PeerId, RemoteTrack)>>,
    /// Producers with a consume request outstanding.
    consuming: Mutex<HashSet<ProducerId>>,
}

struct LiveSession {
    shared: Arc<Shared>,
    producers: HashMap<MediaKind, ProducerId>,
    events_task: JoinHandle<()>,
}

impl LiveSession {
    fn shutdown(self) {
        self.events_task.abort();
        self.shared.device.close();
        let _ = self.shared.client.notify(Notification::LeaveRoom);
        self.shared.client.close();
    }
}

/// Result of the steps up to and including producing.
struct Negotiated {
    joined: JoinRoomResponse,
    recv_capabilities: RtpCapabilities,
    producers: HashMap<MediaKind, ProducerId>,
}

/// Drives one client through join, media negotiation and the live phase.
pub struct SessionController {
    device: Arc<dyn MediaDevice>,
    state: Arc<watch::Sender<SessionState>>,
    view: Arc<watch::Sender<RoomView>>,
    live: Option<LiveSession>,
}

impl SessionController {
    #[must_use]
    pub fn new(device: Arc<dyn MediaDevice>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (view, _) = watch::channel(RoomView::default());
        Self {
            device,
            state: Arc::new(state),
            view: Arc::new(view),
            live: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Snapshot of the room as currently known.
    #[must_use]
    pub fn view(&self) -> RoomView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_view(&self) -> watch::Receiver<RoomView> {
        self.view.subscribe()
    }

    #[must_use]
    pub fn local_peer_id(&self) -> Option<PeerId> {
        self.live.as_ref().map(|live| live.shared.local_peer_id.clone())
    }

    #[must_use]
    pub fn producer_id(&self, kind: MediaKind) -> Option<ProducerId> {
        self.live
            .as_ref()
            .and_then(|live| live.producers.get(&kind).cloned())
    }

    fn set_state(&self, state: SessionState) {
        debug!(target: "room.client.session", state = ?state, "Session state");
        self.state.send_replace(state);
    }

    fn fail(&self, error: SessionError) -> SessionError {
        warn!(target: "room.client.session", error = %error, "Join failed");
        self.set_state(SessionState::Failed(error.to_string()));
        error
    }

    /// Run the join sequence through to `Live`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step; the state is then
    /// `Failed` with the same reason.
    #[instrument(skip_all, name = "room.client.join", fields(room_id = %config.room_id))]
    pub async fn join(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        let can_start = matches!(
            *self.state.borrow(),
            SessionState::Idle | SessionState::Failed(_)
        );
        if !can_start {
            return Err(SessionError::AlreadyActive);
        }
        if let Some(stale) = self.live.take() {
            stale.shutdown();
        }

        self.set_state(SessionState::Connecting);
        let (client, events) =
            match SignalingClient::connect(&config.url, config.connect_timeout).await {
                Ok(connected) => connected,
                Err(e) => return Err(self.fail(e.into())),
            };

        let negotiated = match self.negotiate(&client, &config).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                self.device.close();
                client.close();
                self.view.send_replace(RoomView::default());
                return Err(self.fail(e));
            }
        };

        let shared = Arc::new(Shared {
            client,
            device: Arc::clone(&self.device),
            local_peer_id: negotiated.joined.peer_id.clone(),
            recv_capabilities: negotiated.recv_capabilities,
            view: Arc::clone(&self.view),
            consumers: Mutex::new(HashMap::new()),
            consuming: Mutex::new(HashSet::new()),
        });

        self.set_state(SessionState::ConsumingExisting);
        for peer in &negotiated.joined.existing_peers {
            for producer_id in &peer.producer_ids {
                if let Err(e) = shared.consume(&peer.id, producer_id).await {
                    warn!(
                        target: "room.client.session",
                        peer_id = %peer.id,
                        producer_id = %producer_id,
                        error = %e,
                        "Failed to consume existing producer"
                    );
                }
            }
        }

        let events_task = tokio::spawn(run_events(
            Arc::clone(&shared),
            events,
            Arc::clone(&self.state),
        ));
        info!(
            target: "room.client.session",
            peer_id = %shared.local_peer_id,
            producers = negotiated.producers.len(),
            "Session live"
        );
        self.live = Some(LiveSession {
            shared,
            producers: negotiated.producers,
            events_task,
        });
        self.set_state(SessionState::Live);
        Ok(())
    }

    async fn negotiate(
        &self,
        client: &SignalingClient,
        config: &SessionConfig,
    ) -> Result<Negotiated, SessionError> {
        self.set_state(SessionState::AwaitingJoinAck);
        let joined: JoinRoomResponse = client
            .request(Request::JoinRoom {
                room_id: config.room_id.clone(),
                display_name: config.display_name.clone(),
            })
            .await?
            .into_result()
            .map_err(|e| match e {
                ReplyError::Rejected(reason) => SessionError::JoinRejected(reason),
                other => SessionError::from_reply("joinRoom", other),
            })?;

        self.set_state(SessionState::LoadingCapabilities);
        let native = self.device.load(&joined.router_capabilities).await?;
        let recv_capabilities = joined.router_capabilities.intersect(&native);
        if recv_capabilities.codecs.is_empty() {
            return Err(SessionError::IncompatibleCapabilities);
        }
        self.view.send_replace(RoomView::joined(
            joined.peer_id.clone(),
            &joined.existing_peers,
        ));

        self.set_state(SessionState::AcquiringLocalMedia);
        let tracks = self.acquire_tracks().await?;

        self.set_state(SessionState::CreatingTransports);
        let send_transport = self.open_transport(client, TransportDirection::Send).await?;
        self.open_transport(client, TransportDirection::Recv).await?;

        self.set_state(SessionState::Producing);
        let mut producers = HashMap::new();
        for track in tracks {
            let kind = track.kind;
            let produced: ProduceResponse = call(
                client,
                Request::Produce {
                    transport_id: send_transport.clone(),
                    kind,
                    rtp_parameters: track.rtp_parameters,
                    app_data: track.app_data,
                },
            )
            .await?;
            producers.insert(kind, produced.producer_id);
        }

        Ok(Negotiated {
            joined,
            recv_capabilities,
            producers,
        })
    }

    /// Video first, then audio. Losing one kind degrades the session; losing
    /// both fails it.
    async fn acquire_tracks(&self) -> Result<Vec<LocalTrack>, SessionError> {
        let video = self.device.acquire_track(MediaKind::Video).await;
        let audio = self.device.acquire_track(MediaKind::Audio).await;

        match (video, audio) {
            (Err(video), Err(audio)) => Err(SessionError::MediaAcquisitionFailed(format!(
                "video: {video}; audio: {audio}"
            ))),
            (video, audio) => {
                if let Err(e) = &video {
                    warn!(target: "room.client.session", error = %e, "Continuing audio-only");
                }
                if let Err(e) = &audio {
                    warn!(target: "room.client.session", error = %e, "Continuing video-only");
                }
                Ok(video.into_iter().chain(audio).collect())
            }
        }
    }

    async fn open_transport(
        &self,
        client: &SignalingClient,
        direction: TransportDirection,
    ) -> Result<TransportId, SessionError> {
        let created: CreateTransportResponse =
            call(client, Request::CreateTransport { direction }).await?;
        let dtls_parameters = self
            .device
            .create_transport(direction, &created.transport)
            .await?;
        call_ack(
            client,
            Request::ConnectTransport {
                transport_id: created.transport.id.clone(),
                dtls_parameters,
            },
        )
        .await?;
        Ok(created.transport.id)
    }

    fn live(&self) -> Result<&LiveSession, SessionError> {
        match (&self.live, &*self.state.borrow()) {
            (Some(live), SessionState::Live) => Ok(live),
            _ => Err(SessionError::NotLive),
        }
    }

    /// Pause or resume a local track and tell the room.
    ///
    /// # Errors
    ///
    /// `NotLive` outside the live phase, `NotProducing` if no track of
    /// `kind` is produced.
    pub fn set_media_enabled(&self, kind: MediaKind, enabled: bool) -> Result<(), SessionError> {
        let live = self.live()?;
        if !live.producers.contains_key(&kind) {
            return Err(SessionError::NotProducing(kind));
        }
        live.shared.device.set_track_enabled(kind, enabled);
        live.shared
            .client
            .notify(Notification::MediaStateChanged { kind, enabled })?;
        Ok(())
    }

    /// Stop producing `kind` and close the producer on the server.
    ///
    /// # Errors
    ///
    /// `NotLive`, `NotProducing`, or the server's rejection.
    pub async fn close_producer(&mut self, kind: MediaKind) -> Result<(), SessionError> {
        self.live()?;
        let Some(live) = self.live.as_mut() else {
            return Err(SessionError::NotLive);
        };
        let producer_id = live
            .producers
            .remove(&kind)
            .ok_or(SessionError::NotProducing(kind))?;
        live.shared.device.stop_track(kind);
        call_ack(&live.shared.client, Request::CloseProducer { producer_id }).await
    }

    /// Send a chat message. It appears in the log once the server echoes it.
    ///
    /// # Errors
    ///
    /// `NotLive`, or `Channel` if the connection is gone.
    pub fn send_chat(&self, message: impl Into<String>) -> Result<(), SessionError> {
        self.live()?
            .shared
            .client
            .notify(Notification::ChatMessage {
                message: message.into(),
            })?;
        Ok(())
    }

    /// Consume one remote producer again after an earlier failure.
    ///
    /// # Errors
    ///
    /// `NotLive`, `ConsumeInProgress` while another consume of the same
    /// producer is outstanding, or the error of the failing consume step.
    pub async fn retry_consume(
        &self,
        peer_id: &PeerId,
        producer_id: &ProducerId,
    ) -> Result<RemoteTrack, SessionError> {
        self.live()?.shared.consume(peer_id, producer_id).await
    }

    /// Leave the room and return to `Idle`. Safe to call in any state.
    pub fn leave(&mut self) {
        if let Some(live) = self.live.take() {
            info!(target: "room.client.session", peer_id = %live.shared.local_peer_id, "Leaving room");
            live.shutdown();
        }
        self.view.send_replace(RoomView::default());
        self.set_state(SessionState::Idle);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.shutdown();
        }
    }
}

impl Shared {
    /// Consume one producer, attach it locally, then resume it.
    ///
    /// At most one consume per producer is in flight; a second caller gets
    /// `ConsumeInProgress` instead of a duplicate consumer.
    async fn consume(
        &self,
        peer_id: &PeerId,
        producer_id: &ProducerId,
    ) -> Result<RemoteTrack, SessionError> {
        {
            let consumers = self.consumers.lock().await;
            if let Some((_, track)) = consumers
                .values()
                .find(|(_, track)| &track.producer_id == producer_id)
            {
                return Ok(track.clone());
            }
            if !self.consuming.lock().await.insert(producer_id.clone()) {
                return Err(SessionError::ConsumeInProgress(producer_id.clone()));
            }
        }

        let result = self.consume_new(peer_id, producer_id).await;
        self.consuming.lock().await.remove(producer_id);
        result
    }

    async fn consume_new(
        &self,
        peer_id: &PeerId,
        producer_id: &ProducerId,
    ) -> Result<RemoteTrack, SessionError> {
        let response: ConsumeResponse = call(
            &self.client,
            Request::Consume {
                producer_peer_id: peer_id.clone(),
                producer_id: producer_id.clone(),
                rtp_capabilities: self.recv_capabilities.clone(),
            },
        )
        .await?;
        let consumer = response.consumer;

        self.device.attach_consumer(&consumer).await?;
        if let Err(e) = call_ack(
            &self.client,
            Request::ResumeConsumer {
                consumer_id: consumer.id.clone(),
            },
        )
        .await
        {
            self.device.close_consumer(&consumer.id);
            return Err(e);
        }

        let track = RemoteTrack {
            producer_id: consumer.producer_id,
            consumer_id: consumer.id,
            kind: consumer.kind,
        };
        let mut attached = false;
        self.view
            .send_modify(|view| attached = view.attach_track(peer_id, track.clone()));
        if attached {
            self.consumers
                .lock()
                .await
                .insert(track.consumer_id.clone(), (peer_id.clone(), track.clone()));
            debug!(
                target: "room.client.session",
                peer_id = %peer_id,
                producer_id = %track.producer_id,
                kind = %track.kind,
                "Consuming"
            );
        } else {
            // Peer left while the consumer was being set up.
            self.device.close_consumer(&track.consumer_id);
        }
        Ok(track)
    }

    /// Close local consumers matching `filter`.
    async fn close_consumers(&self, filter: impl Fn(&PeerId, &RemoteTrack) -> bool) {
        let mut consumers = self.consumers.lock().await;
        consumers.retain(|consumer_id, (peer_id, track)| {
            if filter(peer_id, track) {
                self.device.close_consumer(consumer_id);
                false
            } else {
                true
            }
        });
    }

    async fn handle_event(&self, event: ServerEvent) {
        match &event {
            ServerEvent::PeerLeft { peer_id, .. } => {
                self.close_consumers(|owner, _| owner == peer_id).await;
            }
            ServerEvent::ProducerClosed { producer_id, .. } => {
                self.close_consumers(|_, track| &track.producer_id == producer_id)
                    .await;
            }
            ServerEvent::NewProducer {
                producer_id,
                peer_id,
                ..
            } if peer_id != &self.local_peer_id => {
                if let Err(e) = self.consume(peer_id, producer_id).await {
                    warn!(
                        target: "room.client.session",
                        peer_id = %peer_id,
                        producer_id = %producer_id,
                        error = %e,
                        "Failed to consume new producer"
                    );
                }
                return;
            }
            _ => {}
        }
        self.view.send_modify(|view| view.apply(&event));
    }
}

async fn run_events(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    state: Arc<watch::Sender<SessionState>>,
) {
    while let Some(event) = events.recv().await {
        shared.handle_event(event).await;
    }

    warn!(target: "room.client.session", "Signaling channel lost");
    shared.device.close();
    state.send_replace(SessionState::Failed("Disconnected".to_string()));
}

async fn call<T: DeserializeOwned>(
    client: &SignalingClient,
    request: Request,
) -> Result<T, SessionError> {
    let method = request.method();
    client
        .request(request)
        .await?
        .into_result()
        .map_err(|e| SessionError::from_reply(method, e))
}

async fn call_ack(client: &SignalingClient, request: Request) -> Result<(), SessionError> {
    let method = request.method();
    client
        .request(request)
        .await?
        .into_ack()
        .map_err(|e| SessionError::from_reply(method, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::DeviceError;
    use async_trait::async_trait;
    use signaling_protocol::{ConsumerInfo, DtlsParameters, TransportInfo};
    use tokio::net::TcpListener;

    struct NoDevice;

    #[async_trait]
    impl MediaDevice for NoDevice {
        async fn load(&self, _: &RtpCapabilities) -> Result<RtpCapabilities, DeviceError> {
            Err(DeviceError::Load("unused".to_string()))
        }
        async fn acquire_track(&self, kind: MediaKind) -> Result<LocalTrack, DeviceError> {
            Err(DeviceError::Unavailable(kind))
        }
        async fn create_transport(
            &self,
            _: TransportDirection,
            _: &TransportInfo,
        ) -> Result<DtlsParameters, DeviceError> {
            Err(DeviceError::Transport("unused".to_string()))
        }
        async fn attach_consumer(&self, _: &ConsumerInfo) -> Result<(), DeviceError> {
            Ok(())
        }
        fn close_consumer(&self, _: &ConsumerId) {}
        fn set_track_enabled(&self, _: MediaKind, _: bool) {}
        fn stop_track(&self, _: MediaKind) {}
        fn close(&self) {}
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("ws://127.0.0.1:5001/ws", "r1")
            .with_display_name("Ada")
            .with_connect_timeout(Duration::from_secs(1));
        assert_eq!(config.room_id.as_str(), "r1");
        assert_eq!(config.display_name.as_deref(), Some("Ada"));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(
            SessionConfig::new("ws://x", "r").connect_timeout,
            DEFAULT_CONNECT_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_controls_require_live_session() {
        let mut controller = SessionController::new(Arc::new(NoDevice));
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(
            controller.set_media_enabled(MediaKind::Audio, false),
            Err(SessionError::NotLive)
        );
        assert_eq!(controller.send_chat("hi"), Err(SessionError::NotLive));
        assert_eq!(
            controller.close_producer(MediaKind::Video).await,
            Err(SessionError::NotLive)
        );

        controller.leave();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_connection_timeout_fails_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_tcp, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut controller = SessionController::new(Arc::new(NoDevice));
        let mut states = controller.subscribe_state();
        let config = SessionConfig::new(format!("ws://{addr}/ws"), "r1")
            .with_connect_timeout(Duration::from_millis(100));

        let result = controller.join(config).await;
        assert_eq!(result, Err(SessionError::ConnectionTimeout));
        assert_eq!(
            controller.state(),
            SessionState::Failed("Connection timed out".to_string())
        );
        assert!(states.has_changed().unwrap());
        assert!(controller.local_peer_id().is_none());
    }
}
