//! HTTP endpoint integration tests.
//!
//! Rooms are populated over real WebSocket connections, then inspected
//! through the router with `tower::ServiceExt::oneshot`.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::MediaKind;
use http_body_util::BodyExt;
use room_service::observability::detached_metrics_handle;
use room_service::routes::build_routes;
use room_test_utils::{produce_data, TestRoomServer, TestSocket};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn router(server: &TestRoomServer) -> Router {
    build_routes(Arc::clone(server.state()), detached_metrics_handle().unwrap())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health_counts_rooms_and_peers() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let app = router(&server);

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["workers"], 2);
    assert_eq!(body["rooms"], 0);

    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    ada.join("r1", "Ada").await?;
    bo.join("r2", "Bo").await?;

    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["rooms"], 2);
    assert_eq!(body["totalPeers"], 2);
    Ok(())
}

#[tokio::test]
async fn test_ready_when_serving() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let (status, body) = get(&router(&server), "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    server.state().health.set_not_ready();
    let (status, _) = get(&router(&server), "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}

#[tokio::test]
async fn test_room_snapshot_lists_peers_and_producers() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let app = router(&server);

    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    let joined = ada.join("standup", "Ada").await?;
    let send = ada.open_transport("send").await?;
    let produced = ada
        .request("produce", produce_data(&send, MediaKind::Audio))
        .await?;

    let (status, body) = get(&app, "/api/rooms/standup").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "standup");
    assert_eq!(body["peerCount"], 1);
    let peer = &body["peers"][0];
    assert_eq!(peer["id"], joined["peerId"]);
    assert_eq!(peer["displayName"], "Ada");
    assert_eq!(peer["producerIds"][0], produced["producerId"]);
    assert!(body["createdAt"].is_string());
    Ok(())
}

#[tokio::test]
async fn test_unknown_room_is_not_found() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let (status, body) = get(&router(&server), "/api/rooms/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Room not found");

    // Looking a room up never creates it.
    assert_eq!(server.room_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_answers() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let response = router(&server)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
