//! Raw signaling client for frame-level tests.
//!
//! Unlike `room_client::SignalingClient`, `TestSocket` works on untyped JSON
//! so tests can send malformed frames and inspect exact response bodies.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    events: VecDeque<Value>,
}

impl TestSocket {
    pub async fn connect(url: &str) -> Result<Self, anyhow::Error> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to {}: {}", url, e))?;
        Ok(Self {
            stream,
            next_id: 1,
            events: VecDeque::new(),
        })
    }

    /// Send a text frame as-is.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Send a request and return the response `body`. Events received while
    /// waiting are queued for `next_event`.
    pub async fn request(&mut self, method: &str, data: Value) -> Result<Value, anyhow::Error> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({
            "type": "request",
            "id": id,
            "request": { "method": method, "data": data },
        });
        self.send_raw(&frame.to_string()).await?;
        self.response_for(id).await
    }

    /// Wait for the response with `id`.
    pub async fn response_for(&mut self, id: u64) -> Result<Value, anyhow::Error> {
        loop {
            let frame = self.next_frame().await?;
            match frame["type"].as_str() {
                Some("response") if frame["id"].as_u64() == Some(id) => {
                    return Ok(frame["body"].clone());
                }
                Some("event") => self.events.push_back(frame["event"].clone()),
                _ => anyhow::bail!("Unexpected frame: {}", frame),
            }
        }
    }

    /// Send a notification; `None` omits `data`.
    pub async fn notify(&mut self, method: &str, data: Option<Value>) -> Result<(), anyhow::Error> {
        let mut message = json!({ "method": method });
        if let Some(data) = data {
            message["data"] = data;
        }
        let frame = json!({ "type": "notify", "message": message });
        self.send_raw(&frame.to_string()).await
    }

    /// Next server event, `{"event": name, "data": {...}}`.
    pub async fn next_event(&mut self) -> Result<Value, anyhow::Error> {
        if let Some(event) = self.events.pop_front() {
            return Ok(event);
        }
        let frame = self.next_frame().await?;
        anyhow::ensure!(frame["type"] == "event", "Expected an event, got: {}", frame);
        Ok(frame["event"].clone())
    }

    /// Next event with the given name, skipping others.
    pub async fn next_event_named(&mut self, name: &str) -> Result<Value, anyhow::Error> {
        loop {
            let event = self.next_event().await?;
            if event["event"] == name {
                return Ok(event);
            }
        }
    }

    /// True if no frame arrives within `within`.
    pub async fn is_quiet(&mut self, within: Duration) -> bool {
        if !self.events.is_empty() {
            return false;
        }
        tokio::time::timeout(within, self.stream.next()).await.is_err()
    }

    /// Next text frame parsed as JSON. Pings and pongs are skipped.
    pub async fn next_frame(&mut self) -> Result<Value, anyhow::Error> {
        loop {
            let message = tokio::time::timeout(FRAME_TIMEOUT, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for a frame"))?
                .ok_or_else(|| anyhow::anyhow!("Connection closed"))??;
            match message {
                Message::Text(text) => return Ok(serde_json::from_str(text.as_str())?),
                Message::Close(_) => anyhow::bail!("Connection closed"),
                _ => {}
            }
        }
    }

    /// Join `room_id` and return the response body.
    pub async fn join(&mut self, room_id: &str, name: &str) -> Result<Value, anyhow::Error> {
        self.request("joinRoom", json!({ "roomId": room_id, "displayName": name }))
            .await
    }

    /// Create and connect a transport; returns its id.
    pub async fn open_transport(&mut self, direction: &str) -> Result<String, anyhow::Error> {
        let body = self
            .request("createTransport", json!({ "direction": direction }))
            .await?;
        let transport_id = body["transport"]["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("No transport id in {}", body))?
            .to_string();
        let body = self
            .request(
                "connectTransport",
                json!({
                    "transportId": transport_id,
                    "dtlsParameters": crate::fixtures::client_dtls_parameters(),
                }),
            )
            .await?;
        anyhow::ensure!(body["success"] == true, "connectTransport failed: {}", body);
        Ok(transport_id)
    }

    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}
