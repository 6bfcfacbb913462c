//! Signaling integration tests.
//!
//! Drive a real room service over WebSocket with raw JSON frames.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use common::MediaKind;
use room_test_utils::{device_capabilities, produce_data, TestRoomServer, TestSocket};
use serde_json::{json, Value};
use std::time::Duration;

async fn join_with_transports(
    server: &TestRoomServer,
    room: &str,
    name: &str,
) -> Result<(TestSocket, Value, String, String)> {
    let mut socket = TestSocket::connect(&server.ws_url()).await?;
    let body = socket.join(room, name).await?;
    assert_eq!(body["success"], true, "{body}");
    let send = socket.open_transport("send").await?;
    let recv = socket.open_transport("recv").await?;
    Ok((socket, body, send, recv))
}

#[tokio::test]
async fn test_two_peers_produce_and_consume() -> Result<()> {
    let server = TestRoomServer::spawn().await?;

    let (mut ada, joined, ada_send, _) = join_with_transports(&server, "standup", "Ada").await?;
    assert!(joined["peerId"].is_string());
    assert_eq!(joined["existingPeers"], json!([]));
    assert!(!joined["routerCapabilities"]["codecs"]
        .as_array()
        .unwrap()
        .is_empty());

    let produced = ada
        .request("produce", produce_data(&ada_send, MediaKind::Video))
        .await?;
    let producer_id = produced["producerId"].as_str().unwrap().to_string();

    let (mut bo, joined, _, _) = join_with_transports(&server, "standup", "Bo").await?;
    let existing = joined["existingPeers"].as_array().unwrap();
    assert_eq!(existing.len(), 1);
    assert_eq!(existing[0]["displayName"], "Ada");
    assert_eq!(existing[0]["producerIds"], json!([producer_id]));

    let event = ada.next_event_named("peerJoined").await?;
    assert_eq!(event["data"]["displayName"], "Bo");

    let consumed = bo
        .request(
            "consume",
            json!({
                "producerPeerId": existing[0]["id"],
                "producerId": producer_id,
                "rtpCapabilities": device_capabilities(),
            }),
        )
        .await?;
    assert_eq!(consumed["success"], true, "{consumed}");
    assert_eq!(consumed["consumer"]["producerId"], producer_id.as_str());
    assert_eq!(consumed["consumer"]["kind"], "video");

    let resumed = bo
        .request(
            "resumeConsumer",
            json!({ "consumerId": consumed["consumer"]["id"] }),
        )
        .await?;
    assert_eq!(resumed["success"], true);

    let room = server
        .state()
        .registry
        .get(common::RoomId::from("standup"))
        .await?
        .unwrap()
        .snapshot()
        .await?;
    assert_eq!(room.peer_count, 2);
    Ok(())
}

#[tokio::test]
async fn test_new_producer_reaches_other_peers_only() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let (mut ada, _, ada_send, _) = join_with_transports(&server, "r1", "Ada").await?;
    let (mut bo, _, _, _) = join_with_transports(&server, "r1", "Bo").await?;
    ada.next_event_named("peerJoined").await?;

    let produced = ada
        .request("produce", produce_data(&ada_send, MediaKind::Audio))
        .await?;

    let event = bo.next_event_named("newProducer").await?;
    assert_eq!(event["data"]["producerId"], produced["producerId"]);
    assert_eq!(event["data"]["kind"], "audio");

    assert!(ada.is_quiet(Duration::from_millis(200)).await);
    Ok(())
}

#[tokio::test]
async fn test_consume_with_incompatible_capabilities() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let (mut ada, joined, ada_send, _) = join_with_transports(&server, "r1", "Ada").await?;
    let produced = ada
        .request("produce", produce_data(&ada_send, MediaKind::Video))
        .await?;

    let (mut bo, _, _, _) = join_with_transports(&server, "r1", "Bo").await?;
    let reply = bo
        .request(
            "consume",
            json!({
                "producerPeerId": joined["peerId"],
                "producerId": produced["producerId"],
                "rtpCapabilities": room_test_utils::audio_only_capabilities(),
            }),
        )
        .await?;
    assert_eq!(
        reply["error"],
        "Cannot consume: incompatible RTP capabilities"
    );
    assert!(reply.get("success").is_none());
    Ok(())
}

#[tokio::test]
async fn test_consume_without_recv_transport() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let (mut ada, joined, ada_send, _) = join_with_transports(&server, "r1", "Ada").await?;
    let produced = ada
        .request("produce", produce_data(&ada_send, MediaKind::Audio))
        .await?;

    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    bo.join("r1", "Bo").await?;
    let reply = bo
        .request(
            "consume",
            json!({
                "producerPeerId": joined["peerId"],
                "producerId": produced["producerId"],
                "rtpCapabilities": device_capabilities(),
            }),
        )
        .await?;
    assert_eq!(reply["error"], "No recv transport found for consumer");
    Ok(())
}

#[tokio::test]
async fn test_repeated_join_is_idempotent() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let mut bo = TestSocket::connect(&server.ws_url()).await?;

    let first = ada.join("r1", "Ada").await?;
    bo.join("r1", "Bo").await?;
    ada.next_event_named("peerJoined").await?;

    let again = bo.join("r1", "Bo").await?;
    assert_eq!(again["success"], true);
    assert_eq!(again["existingPeers"][0]["id"], first["peerId"]);

    // No second peerJoined for Bo.
    assert!(ada.is_quiet(Duration::from_millis(200)).await);

    let other = bo.join("r2", "Bo").await?;
    assert_eq!(other["error"], "Already joined a room");
    Ok(())
}

#[tokio::test]
async fn test_requests_before_join_are_rejected() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let mut socket = TestSocket::connect(&server.ws_url()).await?;

    let reply = socket
        .request("createTransport", json!({ "direction": "send" }))
        .await?;
    assert_eq!(reply["error"], "Room not found");
    Ok(())
}

#[tokio::test]
async fn test_malformed_frames() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let mut socket = TestSocket::connect(&server.ws_url()).await?;

    socket
        .send_raw(r#"{"type":"request","id":41,"request":{"method":"teleport","data":{}}}"#)
        .await?;
    let reply = socket.response_for(41).await?;
    assert_eq!(reply["error"], "Malformed request");

    // No id to answer; the connection stays usable.
    socket.send_raw("{not json").await?;
    let reply = socket.join("r1", "Ada").await?;
    assert_eq!(reply["success"], true);
    Ok(())
}

#[tokio::test]
async fn test_chat_is_echoed_to_everyone() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    let joined = ada.join("r1", "Ada").await?;
    bo.join("r1", "Bo").await?;
    ada.next_event_named("peerJoined").await?;

    ada.notify("chatMessage", Some(json!({ "message": "  hello  " })))
        .await?;
    ada.notify("chatMessage", Some(json!({ "message": "   " })))
        .await?;

    for socket in [&mut ada, &mut bo] {
        let event = socket.next_event_named("chatMessage").await?;
        assert_eq!(event["data"]["message"], "hello");
        assert_eq!(event["data"]["senderId"], joined["peerId"]);
        assert_eq!(event["data"]["senderName"], "Ada");
        assert!(event["data"]["timestamp"].is_string());
    }
    assert!(bo.is_quiet(Duration::from_millis(200)).await);
    Ok(())
}

#[tokio::test]
async fn test_media_state_is_relayed() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    let joined = ada.join("r1", "Ada").await?;
    bo.join("r1", "Bo").await?;

    ada.notify(
        "mediaStateChanged",
        Some(json!({ "kind": "audio", "enabled": false })),
    )
    .await?;

    let event = bo.next_event_named("peerMediaStateChanged").await?;
    assert_eq!(event["data"]["peerId"], joined["peerId"]);
    assert_eq!(event["data"]["kind"], "audio");
    assert_eq!(event["data"]["enabled"], false);
    Ok(())
}

#[tokio::test]
async fn test_disconnect_announces_peer_left() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let (mut ada, joined, ada_send, _) = join_with_transports(&server, "r1", "Ada").await?;
    let (mut bo, _, _, _) = join_with_transports(&server, "r1", "Bo").await?;
    ada.request("produce", produce_data(&ada_send, MediaKind::Audio))
        .await?;
    bo.next_event_named("newProducer").await?;

    ada.close().await?;

    let left = bo.next_event_named("peerLeft").await?;
    assert_eq!(left["data"]["peerId"], joined["peerId"]);
    assert_eq!(left["data"]["displayName"], "Ada");
    Ok(())
}

#[tokio::test]
async fn test_leave_room_is_terminal() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    ada.join("r1", "Ada").await?;
    bo.join("r1", "Bo").await?;

    bo.notify("leaveRoom", None).await?;
    ada.next_event_named("peerLeft").await?;

    let reply = bo.join("r1", "Bo").await?;
    assert_eq!(reply["error"], "Connection has left");
    Ok(())
}

#[tokio::test]
async fn test_silent_connection_is_dropped_after_heartbeat_timeout() -> Result<()> {
    let server = TestRoomServer::spawn_with(&[
        ("ROOM_SERVICE_HEARTBEAT_INTERVAL_SECONDS", "1"),
        ("ROOM_SERVICE_HEARTBEAT_TIMEOUT_SECONDS", "1"),
    ])
    .await?;
    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    let joined = ada.join("r1", "Ada").await?;
    bo.join("r1", "Bo").await?;

    // Ada stops reading and never answers pings; Bo keeps polling.
    let started = std::time::Instant::now();
    let left = bo.next_event_named("peerLeft").await?;
    assert_eq!(left["data"]["peerId"], joined["peerId"]);
    assert_eq!(left["data"]["displayName"], "Ada");
    assert!(started.elapsed() >= Duration::from_millis(1500));
    drop(ada);
    Ok(())
}
