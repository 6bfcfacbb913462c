//! `ConnectionActor` - per-connection outbound writer.
//!
//! Each `ConnectionActor`:
//! - Owns the write half of exactly one signaling WebSocket
//! - Writes responses and events in the order they were queued (FIFO)
//! - Sends a WebSocket ping every heartbeat interval
//!
//! Rooms hold a [`ConnectionActorHandle`] per peer and broadcast with
//! [`ConnectionActorHandle::try_send_event`]; when a slow client's buffer is
//! full the event is dropped rather than stalling the room.
//!
//! # Lifecycle
//!
//! 1. Spawned by the WebSocket handler when the upgrade completes
//! 2. Runs until closed, cancelled, or the socket write fails

use super::messages::ConnectionMessage;
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::RoomError;

use axum::extract::ws::{CloseFrame, Message};
use common::PeerId;
use futures::{Sink, SinkExt};
use signaling_protocol::codec::encode_server_frame;
use signaling_protocol::{ServerEvent, ServerFrame};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// WebSocket close code for a normal closure.
const CLOSE_NORMAL: u16 = 1000;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    peer_id: PeerId,
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Queue a frame, waiting for buffer space.
    pub async fn send_frame(&self, frame: ServerFrame) -> Result<(), RoomError> {
        self.mailbox.record_enqueue();
        self.sender
            .send(ConnectionMessage::Send { frame })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))
    }

    /// Queue an event without waiting. Returns false if it was dropped.
    ///
    /// Broadcasts are at-most-once: a full buffer or a closed connection
    /// drops the event.
    pub fn try_send_event(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(ConnectionMessage::event(event)) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Close the connection after flushing queued frames.
    pub async fn close(&self, reason: impl Into<String>) -> Result<(), RoomError> {
        self.sender
            .send(ConnectionMessage::Close {
                reason: reason.into(),
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor<S> {
    peer_id: PeerId,
    sink: S,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    heartbeat_interval: Duration,
    mailbox: Arc<MailboxMonitor>,
    is_closing: bool,
}

impl<S> ConnectionActor<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
{
    /// Spawn a new connection actor writing to `sink`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        peer_id: PeerId,
        sink: S,
        heartbeat_interval: Duration,
        cancel_token: CancellationToken,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Connection, peer_id.as_str()));

        let actor = Self {
            peer_id: peer_id.clone(),
            sink,
            receiver,
            cancel_token: cancel_token.clone(),
            heartbeat_interval,
            mailbox: Arc::clone(&mailbox),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            peer_id,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "room.actor.connection", fields(peer_id = %self.peer_id))]
    async fn run(mut self) {
        debug!(
            target: "room.actor.connection",
            peer_id = %self.peer_id,
            "ConnectionActor started"
        );

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "room.actor.connection",
                        peer_id = %self.peer_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close("cancelled").await;
                    break;
                }

                _ = heartbeat.tick() => {
                    if let Err(e) = self.sink.send(Message::Ping(Vec::new())).await {
                        debug!(
                            target: "room.actor.connection",
                            peer_id = %self.peer_id,
                            error = %e,
                            "Heartbeat ping failed, exiting"
                        );
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "room.actor.connection",
                                peer_id = %self.peer_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            self.graceful_close("handle dropped").await;
                            break;
                        }
                    }
                }
            }
        }

        // Anything still queued can no longer be delivered.
        self.receiver.close();

        info!(
            target: "room.actor.connection",
            peer_id = %self.peer_id,
            messages_processed = self.mailbox.messages_processed(),
            messages_dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { frame } => self.handle_send(&frame).await.is_err(),

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }
        }
    }

    async fn handle_send(&mut self, frame: &ServerFrame) -> Result<(), ()> {
        if self.is_closing {
            warn!(
                target: "room.actor.connection",
                peer_id = %self.peer_id,
                "Attempted to send frame while closing"
            );
            return Ok(());
        }

        let text = match encode_server_frame(frame) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    target: "room.actor.connection",
                    peer_id = %self.peer_id,
                    error = %e,
                    "Failed to encode frame, dropping"
                );
                return Ok(());
            }
        };

        if let Err(e) = self.sink.send(Message::Text(text)).await {
            debug!(
                target: "room.actor.connection",
                peer_id = %self.peer_id,
                error = %e,
                "Socket write failed, exiting"
            );
            return Err(());
        }
        Ok(())
    }

    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }
        self.is_closing = true;

        debug!(
            target: "room.actor.connection",
            peer_id = %self.peer_id,
            reason = %reason,
            "Closing connection"
        );

        let close = Message::Close(Some(CloseFrame {
            code: CLOSE_NORMAL,
            reason: reason.to_string().into(),
        }));
        if self.sink.send(close).await.is_ok() {
            let _ = self.sink.close().await;
        }
    }
}
