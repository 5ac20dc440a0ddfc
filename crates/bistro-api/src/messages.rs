use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use bistro_types::api::SendMessageRequest;
use bistro_types::events::ChatEvent;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.body.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Only participants may post
    let participant = state
        .chat
        .participant(room_id, req.sender_id)
        .await
        .map_err(|e| {
            error!("participant check failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if participant.is_none() {
        return Err(StatusCode::FORBIDDEN);
    }

    let message = state
        .chat
        .insert_message(room_id, req.sender_id, &req.body)
        .await
        .map_err(|e| {
            error!("insert_message failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // Fan out to all WebSocket clients and unread reconcilers
    state.dispatcher.publish(ChatEvent::MessageCreated {
        id: message.id,
        room_id: message.room_id,
        sender_id: message.sender_id,
        body: message.body.clone(),
        created_at: message.created_at,
    });

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let limit = query.limit.min(200);

    let messages = state
        .chat
        .messages_in_room(room_id, limit, query.before)
        .await
        .map_err(|e| {
            error!("message fetch failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(messages))
}
