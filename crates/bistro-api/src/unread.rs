use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use bistro_types::api::UnreadCountResponse;
use bistro_unread::total_unread;

use crate::AppState;

/// One-shot unread total: the same full reconciliation the live counters
/// run, served fresh. Read failures degrade to 0 inside `total_unread`, so
/// this endpoint never errors.
pub async fn get_unread(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    let count = total_unread(state.chat.as_ref(), user_id).await;
    Json(UnreadCountResponse { count })
}
