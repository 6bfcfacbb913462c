//! Room and worker lifecycle integration tests.
//!
//! Empty-room eviction after the grace period, and worker respawn after a
//! crash, observed through the public surfaces of a running service.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use common::RoomId;
use room_test_utils::{assert_eventually, TestRoomServer, TestSocket, EVENTUALLY};
use std::time::Duration;

#[tokio::test]
async fn test_empty_room_evicted_after_grace() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(&[("ROOM_SERVICE_EMPTY_ROOM_GRACE_SECONDS", "1")]).await?;

    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    ada.join("r1", "Ada").await?;
    assert_eq!(server.room_count().await, 1);

    ada.close().await?;

    // Still there inside the grace period.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.room_count().await, 1);

    let server = &server;
    assert_eventually(EVENTUALLY, "room evicted", || async move {
        server.room_count().await == 0
    })
    .await;
    Ok(())
}

#[tokio::test]
async fn test_rejoin_within_grace_keeps_room() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(&[("ROOM_SERVICE_EMPTY_ROOM_GRACE_SECONDS", "1")]).await?;

    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    ada.join("r1", "Ada").await?;
    let created_at = server
        .state()
        .registry
        .get(RoomId::from("r1"))
        .await?
        .unwrap()
        .snapshot()
        .await?
        .created_at;
    ada.close().await?;

    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    bo.join("r1", "Bo").await?;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let room = server
        .state()
        .registry
        .get(RoomId::from("r1"))
        .await?
        .expect("room survives while occupied")
        .snapshot()
        .await?;
    assert_eq!(room.created_at, created_at);
    assert_eq!(room.peer_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_worker_respawns_after_crash() -> Result<()> {
    let server = TestRoomServer::spawn().await?;
    let before = server.state().workers.worker_ids().await;
    assert_eq!(before.len(), 2);

    assert!(server.engine().kill_worker(&before[0]).await);

    let (pool, killed) = (&server.state().workers, &before[0]);
    assert_eventually(EVENTUALLY, "pool back to two workers", || async move {
        let ids = pool.worker_ids().await;
        ids.len() == 2 && !ids.contains(killed)
    })
    .await;

    // New rooms land on live workers.
    for room in ["a", "b", "c"] {
        let mut socket = TestSocket::connect(&server.ws_url()).await?;
        let reply = socket.join(room, "Ada").await?;
        assert_eq!(reply["success"], true, "{reply}");
    }
    Ok(())
}

#[tokio::test]
async fn test_room_on_dead_worker_is_replaced() -> Result<()> {
    let server =
        TestRoomServer::spawn_with(&[("ROOM_SERVICE_NUM_WORKERS", "1")]).await?;
    let mut ada = TestSocket::connect(&server.ws_url()).await?;
    ada.join("r1", "Ada").await?;

    let worker = server.state().workers.worker_ids().await.remove(0);
    assert!(server.engine().kill_worker(&worker).await);
    let (pool, killed) = (&server.state().workers, &worker);
    assert_eventually(EVENTUALLY, "replacement worker", || async move {
        let ids = pool.worker_ids().await;
        ids.len() == 1 && !ids.contains(killed)
    })
    .await;

    let mut bo = TestSocket::connect(&server.ws_url()).await?;
    let reply = bo.join("r1", "Bo").await?;
    assert_eq!(reply["success"], true, "{reply}");
    assert_eq!(reply["existingPeers"], serde_json::json!([]));
    Ok(())
}
