//! Room inspection handler.

use crate::actors::RoomSnapshot;
use crate::errors::{Resource, RoomError};
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::RoomId;
use serde_json::json;
use std::sync::Arc;

/// Handler for `GET /api/rooms/:id`.
///
/// Returns the room snapshot, or 404 `{"error":"Room not found"}` when the
/// room does not exist (or closed while the request was in flight).
#[tracing::instrument(skip_all, name = "room.http.get_room", fields(room_id = %room_id))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Response {
    match snapshot(&state, RoomId::from(room_id)).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn snapshot(state: &AppState, room_id: RoomId) -> Result<RoomSnapshot, RoomError> {
    let room = state
        .registry
        .get(room_id)
        .await?
        .ok_or(RoomError::NotFound(Resource::Room))?;
    room.snapshot()
        .await
        .map_err(|_| RoomError::NotFound(Resource::Room))
}

fn error_response(e: &RoomError) -> Response {
    let status = match e {
        RoomError::NotFound(_) => StatusCode::NOT_FOUND,
        RoomError::Draining => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.client_message() }))).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::routes::tests::test_state;
    use http_body_util::BodyExt;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_room_is_404() {
        let state = test_state(1).await;

        let response = get_room(State(state), Path("nope".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "Room not found"}));
    }

    #[tokio::test]
    async fn test_existing_room_snapshot() {
        let state = test_state(1).await;
        state
            .registry
            .get_or_create(RoomId::from("r1"))
            .await
            .unwrap();

        let response = get_room(State(state), Path("r1".to_string())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["id"], "r1");
        assert_eq!(json["peerCount"], 0);
        assert_eq!(json["peers"], json!([]));
    }

    #[tokio::test]
    async fn test_draining_registry_is_503() {
        let state = test_state(1).await;
        state.registry.shutdown().await.unwrap();

        let response = get_room(State(state), Path("r1".to_string())).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
