//! `RoomRegistryActor` - singleton owner of every `RoomActor`.
//!
//! The registry is the top-level actor of the room service:
//!
//! - Singleton per process
//! - Creates rooms lazily on first reference, one router per room
//! - Evicts rooms that stayed empty for the grace window
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Room creation
//!
//! Acquiring a worker and creating a router happens in a spawned task so the
//! registry keeps serving other rooms meanwhile. Concurrent `get_or_create`
//! calls for a room that is still being created wait for the same result,
//! so a room id never gets two routers.

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};
use crate::errors::RoomError;
use crate::media::{default_media_codecs, MediaRouter, TransportOptions};
use crate::workers::WorkerPool;

use common::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::SendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each room actor to stop.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type RoomWaiter = oneshot::Sender<Result<RoomActorHandle, RoomError>>;

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// How long a room must stay empty before it is evicted.
    pub empty_room_grace: Duration,
    /// Applied to every transport created in any room.
    pub transport_options: TransportOptions,
}

/// Handle to the `RoomRegistryActor`.
///
/// Fails with [`RoomError::Draining`] once the registry has stopped.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(pool: WorkerPool, settings: RegistrySettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor {
            receiver,
            weak_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            pool,
            settings,
            rooms: HashMap::new(),
            creating: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| RoomError::Draining)?;
        rx.await.map_err(|_| RoomError::Draining)
    }

    /// Return the room for `room_id`, creating it if needed.
    pub async fn get_or_create(&self, room_id: RoomId) -> Result<RoomActorHandle, RoomError> {
        self.request(|respond_to| RegistryMessage::GetOrCreate {
            room_id,
            respond_to,
        })
        .await?
    }

    /// Look up an existing, open room.
    pub async fn get(&self, room_id: RoomId) -> Result<Option<RoomActorHandle>, RoomError> {
        self.request(|respond_to| RegistryMessage::Get {
            room_id,
            respond_to,
        })
        .await
    }

    /// Close and drop a room. Returns false if it was already absent.
    pub async fn remove(&self, room_id: RoomId) -> Result<bool, RoomError> {
        self.request(|respond_to| RegistryMessage::Remove {
            room_id,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<RegistryStatus, RoomError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Close every room and stop the registry.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    router: Arc<dyn MediaRouter>,
}

impl ManagedRoom {
    /// A room whose actor stopped or whose router died is treated as absent.
    fn is_usable(&self) -> bool {
        !self.handle.is_closed() && !self.router.is_closed()
    }
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Used by spawned tasks and rooms to post back; never keeps the actor alive.
    weak_sender: mpsc::WeakSender<RegistryMessage>,
    cancel_token: CancellationToken,
    pool: WorkerPool,
    settings: RegistrySettings,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Rooms whose router is being created, with everyone waiting for them.
    creating: HashMap<RoomId, Vec<RoomWaiter>>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    #[instrument(skip_all, name = "room.actor.registry")]
    async fn run(mut self) {
        info!(target: "room.actor.registry", "RoomRegistryActor started");

        loop {
            // Check for terminated room actors
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "room.actor.registry",
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "room.actor.registry",
                                "RoomRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "room.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: RegistryMessage) -> bool {
        match message {
            RegistryMessage::GetOrCreate {
                room_id,
                respond_to,
            } => self.get_or_create(room_id, respond_to),

            RegistryMessage::Get {
                room_id,
                respond_to,
            } => {
                let handle = self
                    .rooms
                    .get(&room_id)
                    .filter(|managed| managed.is_usable())
                    .map(|managed| managed.handle.clone());
                let _ = respond_to.send(handle);
            }

            RegistryMessage::Remove {
                room_id,
                respond_to,
            } => {
                let removed = self.forget_room(&room_id, "removed");
                let _ = respond_to.send(removed);
            }

            RegistryMessage::RouterReady { room_id, result } => {
                self.install_room(room_id, result);
            }

            RegistryMessage::RoomEmptied { room_id } => {
                if self.rooms.contains_key(&room_id) {
                    self.schedule_eviction(room_id);
                }
            }

            RegistryMessage::EvictIfEmpty { room_id } => self.evict_if_empty(&room_id).await,

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    rooms: self.rooms.len(),
                    pending_rooms: self.creating.len(),
                });
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.graceful_shutdown().await;
                let _ = respond_to.send(());
                return true;
            }
        }
        false
    }

    fn get_or_create(&mut self, room_id: RoomId, respond_to: RoomWaiter) {
        if !self.accepting_new {
            let _ = respond_to.send(Err(RoomError::Draining));
            return;
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if managed.is_usable() {
                let _ = respond_to.send(Ok(managed.handle.clone()));
                return;
            }
            self.forget_room(&room_id, "stale");
        }

        if let Some(waiters) = self.creating.get_mut(&room_id) {
            waiters.push(respond_to);
            return;
        }
        self.creating.insert(room_id.clone(), vec![respond_to]);

        debug!(
            target: "room.actor.registry",
            room_id = %room_id,
            "Creating router for new room"
        );

        let pool = self.pool.clone();
        let registry = self.weak_sender.clone();
        tokio::spawn(async move {
            let result = match pool.acquire_worker().await {
                Ok(worker) => worker
                    .create_router(&default_media_codecs())
                    .await
                    .map_err(RoomError::from),
                Err(e) => Err(e),
            };

            let Some(registry) = registry.upgrade() else {
                if let Ok(router) = result {
                    router.close();
                }
                return;
            };
            if let Err(SendError(RegistryMessage::RouterReady {
                result: Ok(router), ..
            })) = registry
                .send(RegistryMessage::RouterReady { room_id, result })
                .await
            {
                router.close();
            }
        });
    }

    fn install_room(&mut self, room_id: RoomId, result: Result<Arc<dyn MediaRouter>, RoomError>) {
        let waiters = self.creating.remove(&room_id).unwrap_or_default();

        let router = match result {
            Ok(router) if self.accepting_new => router,
            Ok(router) => {
                router.close();
                for waiter in waiters {
                    let _ = waiter.send(Err(RoomError::Draining));
                }
                return;
            }
            Err(e) => {
                warn!(
                    target: "room.actor.registry",
                    room_id = %room_id,
                    error = %e,
                    "Failed to create room"
                );
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                return;
            }
        };

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            Arc::clone(&router),
            self.settings.transport_options.clone(),
            self.weak_sender.clone(),
            Arc::clone(&self.metrics),
            self.cancel_token.child_token(),
        );

        for waiter in waiters {
            let _ = waiter.send(Ok(handle.clone()));
        }

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle,
                task_handle,
                router: Arc::clone(&router),
            },
        );
        self.metrics.room_created();

        info!(
            target: "room.actor.registry",
            room_id = %room_id,
            worker_id = %router.worker_id(),
            total_rooms = self.rooms.len(),
            "Room created"
        );

        // A room nobody joins is evicted like any other empty room.
        self.schedule_eviction(room_id);
    }

    fn schedule_eviction(&self, room_id: RoomId) {
        let registry = self.weak_sender.clone();
        let grace = self.settings.empty_room_grace;
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {}
                () = tokio::time::sleep(grace) => {
                    if let Some(registry) = registry.upgrade() {
                        let _ = registry.send(RegistryMessage::EvictIfEmpty { room_id }).await;
                    }
                }
            }
        });
    }

    async fn evict_if_empty(&mut self, room_id: &RoomId) {
        let Some(managed) = self.rooms.get(room_id) else {
            return;
        };

        match managed
            .handle
            .retire_if_empty(self.settings.empty_room_grace)
            .await
        {
            Ok(true) | Err(_) => {
                self.forget_room(room_id, "evicted");
            }
            Ok(false) => {
                debug!(
                    target: "room.actor.registry",
                    room_id = %room_id,
                    "Room repopulated or recently emptied, keeping it"
                );
            }
        }
    }

    /// Close and drop a room. Returns false if it was absent.
    fn forget_room(&mut self, room_id: &RoomId, reason: &'static str) -> bool {
        let Some(managed) = self.rooms.remove(room_id) else {
            return false;
        };

        managed.handle.cancel();
        self.metrics.room_removed();

        info!(
            target: "room.actor.registry",
            room_id = %room_id,
            reason,
            total_rooms = self.rooms.len(),
            "Room removed"
        );
        true
    }

    /// Perform graceful shutdown.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "room.actor.registry",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for (_, waiters) in self.creating.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(RoomError::Draining));
            }
        }

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "room.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "room.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "room.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        self.cancel_token.cancel();
        info!(target: "room.actor.registry", "Graceful shutdown complete");
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            self.metrics.room_removed();

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "room.actor.registry",
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "room.actor.registry",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked - triggering investigation"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActor;
    use crate::media::{LocalMediaEngine, WorkerSettings};
    use axum::extract::ws::Message;
    use common::PeerId;

    const GRACE: Duration = Duration::from_secs(30);

    async fn registry_with(
        engine: &LocalMediaEngine,
        workers: usize,
    ) -> (RoomRegistryHandle, WorkerPool, Arc<ActorMetrics>) {
        let pool = WorkerPool::start(
            Arc::new(engine.clone()),
            WorkerSettings {
                rtc_min_port: 40000,
                rtc_max_port: 40100,
            },
            workers,
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            pool.clone(),
            RegistrySettings {
                empty_room_grace: GRACE,
                transport_options: TransportOptions {
                    announced_ip: "127.0.0.1".to_string(),
                },
            },
            Arc::clone(&metrics),
        );
        (registry, pool, metrics)
    }

    async fn join(room: &RoomActorHandle, id: &str) {
        let (tx, _rx) = futures::channel::mpsc::unbounded::<Message>();
        let (outbound, _task) = ConnectionActor::spawn(
            PeerId::from(id),
            tx,
            Duration::from_secs(600),
            CancellationToken::new(),
        );
        room.add_peer(PeerId::from(id), id.to_string(), outbound)
            .await
            .unwrap();
    }

    async fn wait_for_rooms(registry: &RoomRegistryHandle, expected: usize) {
        for _ in 0..100 {
            if registry.status().await.unwrap().rooms == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.status().await.unwrap().rooms, expected);
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_room() {
        let engine = LocalMediaEngine::new();
        let (registry, _pool, metrics) = registry_with(&engine, 2).await;

        let (first, second) = tokio::join!(
            registry.get_or_create(RoomId::from("r1")),
            registry.get_or_create(RoomId::from("r1")),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        let a = first.snapshot().await.unwrap();
        let b = second.snapshot().await.unwrap();
        assert_eq!(a.created_at, b.created_at);

        let status = registry.status().await.unwrap();
        assert_eq!(status.rooms, 1);
        assert_eq!(status.pending_rooms, 0);
        assert_eq!(metrics.room_count(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_room() {
        let engine = LocalMediaEngine::new();
        let (registry, _pool, _metrics) = registry_with(&engine, 1).await;
        assert!(registry.get(RoomId::from("nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let engine = LocalMediaEngine::new();
        let (registry, _pool, metrics) = registry_with(&engine, 1).await;

        let room = registry.get_or_create(RoomId::from("r1")).await.unwrap();
        assert!(registry.remove(RoomId::from("r1")).await.unwrap());
        assert!(!registry.remove(RoomId::from("r1")).await.unwrap());

        assert!(room.is_closed());
        assert!(registry.get(RoomId::from("r1")).await.unwrap().is_none());
        assert_eq!(metrics.room_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_workers_available() {
        let engine = LocalMediaEngine::new();
        let (registry, pool, _metrics) = registry_with(&engine, 1).await;

        engine.fail_next_spawns(usize::MAX);
        let ids = pool.worker_ids().await;
        assert!(engine.kill_worker(&ids[0]).await);
        for _ in 0..100 {
            if pool.worker_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let result = registry.get_or_create(RoomId::from("r1")).await;
        assert!(matches!(result, Err(RoomError::NoWorkersAvailable)));
        assert_eq!(registry.status().await.unwrap().pending_rooms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_is_evicted_after_grace() {
        let engine = LocalMediaEngine::new();
        let (registry, _pool, _metrics) = registry_with(&engine, 1).await;

        let room = registry.get_or_create(RoomId::from("r1")).await.unwrap();
        join(&room, "a").await;
        room.remove_peer(PeerId::from("a")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(registry.status().await.unwrap().rooms, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        wait_for_rooms(&registry, 0).await;
        assert!(room.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_grace_keeps_room() {
        let engine = LocalMediaEngine::new();
        let (registry, _pool, _metrics) = registry_with(&engine, 1).await;

        let room = registry.get_or_create(RoomId::from("r1")).await.unwrap();
        join(&room, "a").await;
        room.remove_peer(PeerId::from("a")).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        join(&room, "a").await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(registry.status().await.unwrap().rooms, 1);
        assert!(!room.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_on_dead_worker_is_recreated() {
        let engine = LocalMediaEngine::new();
        let (registry, pool, _metrics) = registry_with(&engine, 1).await;

        let old = registry.get_or_create(RoomId::from("r1")).await.unwrap();
        let ids = engine.live_worker_ids().await;
        assert!(engine.kill_worker(&ids[0]).await);

        // Wait for the replacement worker to join the pool.
        for _ in 0..100 {
            if engine.spawned_count() == 2 && pool.worker_count().await == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let fresh = registry.get_or_create(RoomId::from("r1")).await.unwrap();
        assert!(old.is_closed());
        assert!(!fresh.is_closed());
        assert_eq!(registry.status().await.unwrap().rooms, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_rooms() {
        let engine = LocalMediaEngine::new();
        let (registry, _pool, metrics) = registry_with(&engine, 1).await;

        let room = registry.get_or_create(RoomId::from("r1")).await.unwrap();
        registry.shutdown().await.unwrap();

        assert!(room.is_closed());
        assert_eq!(metrics.room_count(), 0);
        assert!(matches!(
            registry.get_or_create(RoomId::from("r2")).await,
            Err(RoomError::Draining)
        ));
    }
}
