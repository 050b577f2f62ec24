use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use trendotalk_types::api::{Claims, CreateVibeRequest, VibeResponse};

use crate::auth::AppStateInner;
use crate::dm::{parse_timestamp, parse_uuid};
use crate::error::ApiError;
use crate::media;

pub async fn create_vibe(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateVibeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // A vibe IS its media; the upload must land before any row is written.
    let file_url = media::maybe_upload(&state.media, Some(req.file_data), Some(req.file_name))
        .await?
        .ok_or(ApiError::BadRequest("file_data is required"))?;

    let db = state.clone();
    let author = claims.sub.to_string();
    let caption = req.caption.clone();
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .create_vibe(&author, &file_url, caption.as_deref(), chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    Ok((
        StatusCode::CREATED,
        Json(VibeResponse {
            id: parse_uuid(&row.id),
            author_id: claims.sub,
            author_username: claims.username,
            file_url: row.file_url,
            caption: row.caption,
            created_at: parse_timestamp(&row.created_at, &row.id),
            expires_at: parse_timestamp(&row.expires_at, &row.id),
        }),
    ))
}

/// Unexpired vibes only; expiry is checked against now, not sweep state.
pub async fn list_vibes(
    State(state): State<Arc<AppStateInner>>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.list_vibes(chrono::Utc::now()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    let vibes: Vec<VibeResponse> = rows
        .into_iter()
        .map(|row| VibeResponse {
            created_at: parse_timestamp(&row.created_at, &row.id),
            expires_at: parse_timestamp(&row.expires_at, &row.id),
            id: parse_uuid(&row.id),
            author_id: parse_uuid(&row.author_id),
            author_username: row.author_username,
            file_url: row.file_url,
            caption: row.caption,
        })
        .collect();
    Ok(Json(vibes))
}
