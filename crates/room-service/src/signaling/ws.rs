//! WebSocket endpoint.
//!
//! Each upgraded socket is split: the write half goes to a
//! [`ConnectionActor`](crate::actors::ConnectionActor), the read half is
//! driven here and fed to a [`SignalingSession`] one frame at a time.

use super::handler::SignalingSession;
use crate::actors::ConnectionActor;
use crate::routes::AppState;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use common::PeerId;
use futures::StreamExt;
use signaling_protocol::codec::MAX_FRAME_BYTES;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// Handler for `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, name = "room.signaling.connection", fields(peer_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = PeerId::new();
    tracing::Span::current().record("peer_id", peer_id.as_str());

    let (sink, mut stream) = socket.split();
    let (outbound, writer_task) = ConnectionActor::spawn(
        peer_id.clone(),
        sink,
        state.config.heartbeat_interval,
        state.shutdown.child_token(),
    );
    state.metrics.connection_opened();
    info!(target: "room.signaling", peer_id = %peer_id, "Connection opened");

    let mut session =
        SignalingSession::new(peer_id.clone(), outbound.clone(), state.registry.clone());
    let idle_timeout = state.config.idle_timeout();

    let reason = loop {
        let next = tokio::select! {
            () = state.shutdown.cancelled() => break "server shutting down",
            next = timeout(idle_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => break "idle timeout",
            Ok(None) => break "stream ended",
            Ok(Some(Err(e))) => {
                debug!(target: "room.signaling", peer_id = %peer_id, error = %e, "Read failed");
                break "read error";
            }
            Ok(Some(Ok(Message::Text(text)))) => session.handle_text(&text).await,
            Ok(Some(Ok(Message::Close(_)))) => break "client closed",
            // Pongs only matter as proof of life, which the timeout already tracks.
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_)))) => {}
        }

        if outbound.is_closed() {
            break "writer closed";
        }
    };

    session.leave("disconnect").await;
    let _ = outbound.close(reason).await;
    let _ = writer_task.await;

    state.metrics.connection_closed();
    info!(target: "room.signaling", peer_id = %peer_id, reason, "Connection closed");
}
