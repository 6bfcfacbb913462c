//! Request/response signaling channel over a WebSocket.
//!
//! Every request gets a fresh correlation id and a pending entry holding a
//! oneshot sender. The reader task removes the entry when the matching
//! response arrives, so each request resolves exactly once. When the
//! connection ends, every entry still pending fails with
//! [`ChannelError::Disconnected`].

use crate::errors::ChannelError;

use futures::{SinkExt, StreamExt};
use signaling_protocol::codec::{decode_server_frame, encode_client_frame};
use signaling_protocol::{ClientFrame, Notification, Reply, Request, ServerEvent, ServerFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on the initial connection wait.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Waiter = oneshot::Sender<Result<Reply, ChannelError>>;

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

impl Pending {
    /// Fail every waiter and refuse new ones.
    fn drain(&mut self) -> usize {
        self.closed = true;
        let count = self.waiters.len();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(ChannelError::Disconnected));
        }
        count
    }
}

/// Client end of the signaling channel.
pub struct SignalingClient {
    outgoing: mpsc::UnboundedSender<WsMessage>,
    pending: Arc<Mutex<Pending>>,
    next_id: AtomicU64,
    cancel_token: CancellationToken,
}

impl SignalingClient {
    /// Connect to `url`, waiting at most `timeout` for the handshake.
    ///
    /// Returns the client and the stream of server-pushed events. The event
    /// stream ends when the connection closes.
    ///
    /// # Errors
    ///
    /// `ConnectionTimeout` if the handshake does not finish in time,
    /// `Connect` if it fails.
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), ChannelError> {
        let (ws, _response) =
            match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => {
                    warn!(target: "room.client.channel", error = %e, "Connection failed");
                    return Err(ChannelError::Connect(e.to_string()));
                }
                Err(_) => {
                    warn!(
                        target: "room.client.channel",
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "Connection timed out"
                    );
                    return Err(ChannelError::ConnectionTimeout);
                }
            };
        info!(target: "room.client.channel", "Signaling channel connected");

        let (mut sink, mut stream) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<WsMessage>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(Pending::default()));
        let cancel_token = CancellationToken::new();

        // Writer: forwards frames in order and stops after a close frame.
        tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let is_close = matches!(message, WsMessage::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!(target: "room.client.channel", error = %e, "Write failed");
                    break;
                }
                if is_close {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = Arc::clone(&pending);
        let reader_token = cancel_token.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    () = reader_token.cancelled() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(WsMessage::Text(text))) => match decode_server_frame(text.as_str()) {
                        Ok(ServerFrame::Response { id, body }) => {
                            let waiter = reader_pending.lock().await.waiters.remove(&id);
                            match waiter {
                                Some(waiter) => {
                                    let _ = waiter.send(Ok(body));
                                }
                                None => debug!(
                                    target: "room.client.channel",
                                    request_id = id,
                                    "Response without a pending request"
                                ),
                            }
                        }
                        Ok(ServerFrame::Event { event }) => {
                            let _ = events_tx.send(event);
                        }
                        Err(e) => {
                            warn!(target: "room.client.channel", error = %e, "Undecodable frame");
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(target: "room.client.channel", error = %e, "Read failed");
                        break;
                    }
                }
            }

            reader_token.cancel();
            let failed = reader_pending.lock().await.drain();
            info!(
                target: "room.client.channel",
                failed_requests = failed,
                "Signaling channel closed"
            );
        });

        Ok((
            Self {
                outgoing,
                pending,
                next_id: AtomicU64::new(1),
                cancel_token,
            },
            events_rx,
        ))
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// `Disconnected` if the channel is closed or closes before the
    /// response arrives.
    pub async fn request(&self, request: Request) -> Result<Reply, ChannelError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let text = encode_client_frame(&ClientFrame::Request { id, request })
            .map_err(|e| ChannelError::Encode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(ChannelError::Disconnected);
            }
            pending.waiters.insert(id, tx);
        }

        if self.outgoing.send(WsMessage::Text(text.into())).is_err() {
            self.pending.lock().await.waiters.remove(&id);
            return Err(ChannelError::Disconnected);
        }
        debug!(target: "room.client.channel", request_id = id, method, "Request sent");

        rx.await.map_err(|_| ChannelError::Disconnected)?
    }

    /// Send a fire-and-forget notification.
    ///
    /// # Errors
    ///
    /// `Disconnected` if the channel is closed.
    pub fn notify(&self, message: Notification) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Disconnected);
        }
        let text = encode_client_frame(&ClientFrame::Notify { message })
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.outgoing
            .send(WsMessage::Text(text.into()))
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Close the connection. Pending requests fail with `Disconnected`.
    pub fn close(&self) {
        let _ = self.outgoing.send(WsMessage::Close(None));
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
