use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::error;

use bistro_types::api::RateRequest;
use bistro_types::models::{Rating, RatingStats};

use crate::AppState;

pub async fn rate_place(
    State(state): State<AppState>,
    Path(place_id): Path<String>,
    Json(req): Json<RateRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let scores = [req.food, req.service, req.value];
    if scores.iter().any(|s| !(1..=5).contains(s)) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let rating = Rating {
        place_id: place_id.clone(),
        user_id: req.user_id,
        food: req.food,
        service: req.service,
        value: req.value,
        created_at: Utc::now(),
    };

    state.ratings.upsert_rating(&rating).await.map_err(|e| {
        error!("rating upsert failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // Cached stats are stale the moment a rating lands
    state.stats_cache.invalidate(&place_id);

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(place_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if let Some(stats) = state.stats_cache.get(&place_id) {
        return Ok(Json(stats));
    }

    let ratings = state
        .ratings
        .ratings_for_place(&place_id)
        .await
        .map_err(|e| {
            error!("ratings fetch failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let stats = RatingStats::from_ratings(&ratings).ok_or(StatusCode::NOT_FOUND)?;
    state.stats_cache.insert(place_id, stats.clone());

    Ok(Json(stats))
}
