use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use trendotalk_types::api::{
    Claims, CreatePostRequest, PostResponse, ReactionToggleResponse, ReactionUpdate,
    VoteToggleResponse,
};
use trendotalk_types::events::GatewayEvent;
use trendotalk_types::models::ReactionKind;

use crate::auth::AppStateInner;
use crate::dm::{parse_timestamp, parse_uuid};
use crate::error::ApiError;
use crate::media;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

pub async fn create_post(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.is_empty() && req.file_data.is_none() {
        return Err(ApiError::BadRequest("post content is empty"));
    }

    // Upload first; a failed upload must not leave a post row behind.
    let file_url = media::maybe_upload(&state.media, req.file_data, req.file_name).await?;

    let db = state.clone();
    let author = claims.sub.to_string();
    let content = req.content.clone();
    let furl = file_url.clone();
    let row = tokio::task::spawn_blocking(move || {
        db.db
            .create_post(&author, &content, furl.as_deref(), chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: parse_uuid(&row.id),
            author_id: claims.sub,
            author_username: claims.username,
            content: row.content,
            file_url: row.file_url,
            likes_count: 0,
            dislikes_count: 0,
            votes_count: 0,
            is_liked: false,
            is_disliked: false,
            is_voted: false,
            created_at: parse_timestamp(&row.created_at, &row.id),
        }),
    ))
}

pub async fn feed(
    State(state): State<Arc<AppStateInner>>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let viewer = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || db.db.feed(&viewer, limit, before.as_deref()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    let posts: Vec<PostResponse> = rows
        .into_iter()
        .map(|row| PostResponse {
            created_at: parse_timestamp(&row.post.created_at, &row.post.id),
            id: parse_uuid(&row.post.id),
            author_id: parse_uuid(&row.post.author_id),
            author_username: row.post.author_username,
            content: row.post.content,
            file_url: row.post.file_url,
            likes_count: row.post.likes_count,
            dislikes_count: row.post.dislikes_count,
            votes_count: row.post.votes_count,
            is_liked: row.my_reaction.as_deref() == Some("like"),
            is_disliked: row.my_reaction.as_deref() == Some("dislike"),
            is_voted: row.my_vote,
        })
        .collect();
    Ok(Json(posts))
}

pub async fn like_post(
    state: State<Arc<AppStateInner>>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    toggle_reaction(state, path, claims, ReactionKind::Like).await
}

pub async fn dislike_post(
    state: State<Arc<AppStateInner>>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    toggle_reaction(state, path, claims, ReactionKind::Dislike).await
}

/// Like and dislike toggle through the same path; the db layer clears the
/// opposite reaction and moves both counters in one transaction.
async fn toggle_reaction(
    State(state): State<Arc<AppStateInner>>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    kind: ReactionKind,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let pid = post_id.to_string();
    let uid = claims.sub.to_string();
    let new_state = tokio::task::spawn_blocking(move || {
        db.db
            .toggle_reaction(&pid, &uid, kind.as_str(), chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    let active = match kind {
        ReactionKind::Like => new_state.is_liked,
        ReactionKind::Dislike => new_state.is_disliked,
    };
    state.dispatcher.broadcast(GatewayEvent::PostReaction(ReactionUpdate {
        post_id,
        user_id: claims.sub,
        kind,
        active,
    }));

    Ok(Json(ReactionToggleResponse {
        is_liked: new_state.is_liked,
        is_disliked: new_state.is_disliked,
        likes_count: new_state.likes_count,
        dislikes_count: new_state.dislikes_count,
    }))
}

pub async fn vote_post(
    State(state): State<Arc<AppStateInner>>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let pid = post_id.to_string();
    let uid = claims.sub.to_string();
    let new_state =
        tokio::task::spawn_blocking(move || db.db.toggle_vote(&pid, &uid, chrono::Utc::now()))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(e.into())
            })??;

    Ok(Json(VoteToggleResponse {
        is_voted: new_state.is_voted,
        votes_count: new_state.votes_count,
    }))
}
