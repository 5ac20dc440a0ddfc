use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use bistro_types::api::{CreateRoomRequest, MarkReadRequest};
use bistro_types::events::ChatEvent;

use crate::AppState;

pub async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.is_empty() || req.participant_ids.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let room = state
        .chat
        .create_room(&req.name, &req.participant_ids)
        .await
        .map_err(|e| {
            error!("create_room failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = state
        .chat
        .room(room_id)
        .await
        .map_err(|e| {
            error!("room fetch failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(room))
}

/// Called when a user opens a room: advances their read marker and lets the
/// change feed carry the news to that user's reconcilers.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let participant = state
        .chat
        .mark_read(room_id, req.user_id, Utc::now())
        .await
        .map_err(|e| {
            error!("mark_read failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    if let Some(last_read_at) = participant.last_read_at {
        state.dispatcher.publish(ChatEvent::ReadMarkerUpdated {
            room_id,
            user_id: req.user_id,
            last_read_at,
        });
    }

    Ok(Json(participant))
}
