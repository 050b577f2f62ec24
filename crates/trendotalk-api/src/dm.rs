use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use trendotalk_db::models::{DmMessageRow, DmRequestRow};
use trendotalk_db::queries::dm::{RequestAction, SendOutcome};
use trendotalk_db::{parse_ts, ts};
use trendotalk_types::api::{
    ChatStatusResponse, Claims, DmChatResponse, DmMessageResponse, DmRequestResponse,
    SendDmRequest, SendDmResponse,
};
use trendotalk_types::events::GatewayEvent;
use trendotalk_types::models::{MessageType, RequestStatus};

use crate::auth::AppStateInner;
use crate::error::ApiError;
use crate::media;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    /// Accepts the RFC 3339 form responses carry, or the storage form.
    pub before: Option<String>,
}

/// Timestamps go out RFC 3339 but are stored (and compared) in the fixed
/// `YYYY-MM-DD HH:MM:SS` form, so the wire cursor must be re-encoded before
/// it reaches a query.
fn normalize_cursor(raw: &str) -> Result<String, ApiError> {
    parse_ts(raw)
        .map(ts)
        .ok_or(ApiError::BadRequest("invalid before cursor"))
}

fn default_limit() -> u32 {
    50
}

/// Send a first-or-subsequent message to a user. The relationship state for
/// the pair is resolved fresh inside the transaction; a first contact opens
/// a pending request instead of storing a message.
pub async fn send_message(
    State(state): State<Arc<AppStateInner>>,
    Path(to_user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendDmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.is_empty() && req.file_data.is_none() {
        return Err(ApiError::BadRequest("message content is empty"));
    }

    // Upload before touching the database so a failed upload never leaves a
    // half-created request or message behind.
    let file_url = media::maybe_upload(&state.media, req.file_data, req.file_name).await?;
    let message_type = if file_url.is_some() {
        MessageType::File
    } else {
        MessageType::Text
    };

    let db = state.clone();
    let sender = claims.sub.to_string();
    let recipient = to_user_id.to_string();
    let content = req.content.clone();
    let furl = file_url.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        db.db.send_dm(
            &sender,
            &recipient,
            &content,
            message_type.as_str(),
            furl.as_deref(),
            chrono::Utc::now(),
        )
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    match outcome {
        SendOutcome::Sent(row) => {
            let message = message_to_dto(row);
            // Best-effort realtime delivery to both chat members, so the
            // sender's other open sessions stay in sync too.
            state
                .dispatcher
                .send_to_pair(
                    claims.sub,
                    to_user_id,
                    GatewayEvent::DmMessage {
                        chat_id: message.chat_id,
                        message_id: message.id,
                        sender_id: claims.sub,
                        sender_username: claims.username.clone(),
                        content: message.content.clone(),
                        timestamp: message.created_at,
                    },
                )
                .await;
            Ok((StatusCode::CREATED, Json(SendDmResponse::Sent { message })))
        }
        SendOutcome::RequestCreated(row) => {
            let request = request_to_dto(row, claims.username.clone());
            state
                .dispatcher
                .send_to_user(
                    to_user_id,
                    GatewayEvent::DmRequestCreated {
                        request_id: request.id,
                        from_user_id: claims.sub,
                        from_username: claims.username.clone(),
                        first_message: request.first_message.clone(),
                    },
                )
                .await;
            Ok((
                StatusCode::CREATED,
                Json(SendDmResponse::RequestCreated { request }),
            ))
        }
    }
}

pub async fn allow_request(
    state: State<Arc<AppStateInner>>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_request(state, path, claims, RequestAction::Allow).await
}

pub async fn dismiss_request(
    state: State<Arc<AppStateInner>>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_request(state, path, claims, RequestAction::Dismiss).await
}

pub async fn block_request(
    state: State<Arc<AppStateInner>>,
    path: Path<Uuid>,
    claims: Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    resolve_request(state, path, claims, RequestAction::Block).await
}

/// Shared allow/dismiss/block path. Exactly one concurrent resolution wins;
/// the loser surfaces 409 state_conflict from the guarded update.
async fn resolve_request(
    State(state): State<Arc<AppStateInner>>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    action: RequestAction,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let rid = request_id.to_string();
    let actor = claims.sub.to_string();
    let resolution = tokio::task::spawn_blocking(move || {
        db.db.resolve_dm_request(&rid, &actor, action, chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    let status = RequestStatus::parse(&resolution.request.status).unwrap_or_else(|| {
        warn!(
            "Corrupt status '{}' on request '{}'",
            resolution.request.status, resolution.request.id
        );
        RequestStatus::Rejected
    });
    let chat_id = resolution.chat_id.as_deref().map(parse_uuid);

    // Tell the requester how it went (best-effort).
    if let Ok(from) = resolution.request.from_user_id.parse::<Uuid>() {
        state
            .dispatcher
            .send_to_user(
                from,
                GatewayEvent::DmRequestResolved {
                    request_id,
                    status,
                    chat_id,
                },
            )
            .await;
    }

    Ok(Json(serde_json::json!({
        "status": status,
        "chat_id": chat_id,
    })))
}

pub async fn list_requests(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.pending_requests_for(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    let requests: Vec<DmRequestResponse> = rows
        .into_iter()
        .map(|(row, from_username)| request_to_dto(row, from_username))
        .collect();
    Ok(Json(requests))
}

pub async fn block_chat(
    State(state): State<Arc<AppStateInner>>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let cid = chat_id.to_string();
    let actor = claims.sub.to_string();
    tokio::task::spawn_blocking(move || db.db.block_from_chat(&cid, &actor, chrono::Utc::now()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    Ok(Json(serde_json::json!({ "blocked": true })))
}

/// Live relationship status for a chat: recomputed from storage on every
/// call because temporary blocks lapse with time, never by a state write.
pub async fn chat_status(
    State(state): State<Arc<AppStateInner>>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let cid = chat_id.to_string();
    let actor = claims.sub.to_string();
    let status = tokio::task::spawn_blocking(move || {
        db.db.chat_status(&cid, &actor, chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    Ok(Json(ChatStatusResponse {
        is_restricted: status.is_restricted,
        is_blocked: status.is_blocked,
        block_type: status.block_type,
        was_dismissed: status.was_dismissed,
        has_pending_request: status.has_pending_request,
    }))
}

pub async fn list_chats(
    State(state): State<Arc<AppStateInner>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let uid = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.db.list_chats(&uid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })??;

    let chats: Vec<DmChatResponse> = rows
        .into_iter()
        .map(|row| DmChatResponse {
            id: parse_uuid(&row.id),
            peer_id: parse_uuid(&row.peer_id),
            peer_username: row.peer_username,
            last_message: row.last_message,
            unread_count: row.unread_count,
            updated_at: parse_timestamp(&row.updated_at, &row.id),
        })
        .collect();
    Ok(Json(chats))
}

pub async fn chat_messages(
    State(state): State<Arc<AppStateInner>>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let cid = chat_id.to_string();
    let actor = claims.sub.to_string();
    let limit = query.limit.min(200);
    let before = query.before.as_deref().map(normalize_cursor).transpose()?;

    let rows = tokio::task::spawn_blocking(move || {
        db.db
            .chat_messages(&cid, &actor, limit, before.as_deref(), chrono::Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })??;

    let messages: Vec<DmMessageResponse> = rows.into_iter().map(message_to_dto).collect();
    Ok(Json(messages))
}

fn message_to_dto(row: DmMessageRow) -> DmMessageResponse {
    let message_type = MessageType::parse(&row.message_type).unwrap_or_else(|| {
        warn!("Corrupt message_type '{}' on message '{}'", row.message_type, row.id);
        MessageType::Text
    });
    DmMessageResponse {
        created_at: parse_timestamp(&row.created_at, &row.id),
        chat_id: parse_uuid(&row.chat_id),
        sender_id: parse_uuid(&row.sender_id),
        id: parse_uuid(&row.id),
        content: row.content,
        message_type,
        file_url: row.file_url,
        is_read: row.is_read,
    }
}

fn request_to_dto(row: DmRequestRow, from_username: String) -> DmRequestResponse {
    DmRequestResponse {
        created_at: parse_timestamp(&row.created_at, &row.id),
        from_user_id: parse_uuid(&row.from_user_id),
        to_user_id: parse_uuid(&row.to_user_id),
        id: parse_uuid(&row.id),
        from_username,
        first_message: row.first_message,
    }
}

pub(crate) fn parse_uuid(s: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}': {}", s, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(s: &str, owner: &str) -> chrono::DateTime<chrono::Utc> {
    parse_ts(s).unwrap_or_else(|| {
        warn!("Corrupt created_at '{}' on '{}'", s, owner);
        chrono::DateTime::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_cursors_are_reencoded_to_the_storage_form() {
        // clients echo back the RFC 3339 created_at a response carried
        assert_eq!(
            normalize_cursor("2026-03-01T12:00:00Z").unwrap(),
            "2026-03-01 12:00:00"
        );
        // non-UTC offsets land on the same instant
        assert_eq!(
            normalize_cursor("2026-03-01T14:30:00+02:30").unwrap(),
            "2026-03-01 12:00:00"
        );
        // already-storage-form cursors pass through unchanged
        assert_eq!(
            normalize_cursor("2026-03-01 12:00:00").unwrap(),
            "2026-03-01 12:00:00"
        );
    }

    #[test]
    fn garbage_cursors_are_rejected() {
        assert!(matches!(
            normalize_cursor("not-a-timestamp").unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }
}
