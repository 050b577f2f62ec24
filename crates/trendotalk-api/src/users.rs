use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use trendotalk_types::api::{Claims, FollowResponse};
use trendotalk_types::models::User;

use crate::auth::AppStateInner;
use crate::dm::{parse_timestamp, parse_uuid};
use crate::error::ApiError;

pub async fn get_profile(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = user_id.to_string();
    let row = tokio::task::spawn_blocking(move || db.db.get_user_by_id(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??
        .ok_or(ApiError::NotFound)?;

    Ok(Json(User {
        created_at: parse_timestamp(&row.created_at, &row.id),
        id: parse_uuid(&row.id),
        username: row.username,
        bio: row.bio,
        followers_count: row.followers_count,
        following_count: row.following_count,
    }))
}

pub async fn follow(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let follower = claims.sub.to_string();
    let followee = user_id.to_string();
    let out = tokio::task::spawn_blocking(move || {
        db.db.follow(&follower, &followee, chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    Ok(Json(FollowResponse {
        following: out.following,
        followers_count: out.followers_count,
        following_count: out.following_count,
        became_mutual: out.became_mutual,
        chat_id: out.chat_id.as_deref().map(parse_uuid),
    }))
}

pub async fn unfollow(
    State(state): State<Arc<AppStateInner>>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let follower = claims.sub.to_string();
    let followee = user_id.to_string();
    let out = tokio::task::spawn_blocking(move || db.db.unfollow(&follower, &followee))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    Ok(Json(FollowResponse {
        following: out.following,
        followers_count: out.followers_count,
        following_count: out.following_count,
        became_mutual: false,
        chat_id: None,
    }))
}
