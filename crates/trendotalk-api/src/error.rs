use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use trendotalk_db::DmError;
use trendotalk_types::models::BlockType;

/// Everything a handler can fail with, mapped onto HTTP status + a JSON
/// reason code the client reacts to (show Allow/Dismiss UI, blocked banner,
/// retry upload, ...).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("request is no longer pending")]
    StateConflict,

    #[error("you can send one message until they respond")]
    RateLimited,

    #[error("sending is blocked")]
    Blocked(BlockType),

    #[error("media upload failed: {0}")]
    UploadFailed(String),

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("internal error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<DmError> for ApiError {
    fn from(err: DmError) -> Self {
        match err {
            DmError::NotFound => Self::NotFound,
            DmError::StateConflict => Self::StateConflict,
            DmError::RateLimited => Self::RateLimited,
            DmError::Blocked(t) => Self::Blocked(t),
            DmError::Forbidden => Self::Forbidden,
            DmError::Poisoned | DmError::Db(_) => Self::Internal(anyhow::Error::new(err)),
        }
    }
}

impl ApiError {
    fn status_and_reason(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::StateConflict => (StatusCode::CONFLICT, "state_conflict"),
            // the asymmetric pending-window rate limit surfaces as 403 with
            // its own reason so the client can show "request pending"
            Self::RateLimited => (StatusCode::FORBIDDEN, "request_pending"),
            Self::Blocked(BlockType::Temporary) => (StatusCode::FORBIDDEN, "blocked_temporary"),
            Self::Blocked(BlockType::Permanent) => (StatusCode::FORBIDDEN, "blocked_permanent"),
            Self::UploadFailed(_) => (StatusCode::BAD_GATEWAY, "upload_failed"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("internal error: {:#}", err);
        }
        let (status, reason) = self.status_and_reason();
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "reason": reason,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_match_the_wire_contract() {
        assert_eq!(
            ApiError::RateLimited.status_and_reason(),
            (StatusCode::FORBIDDEN, "request_pending")
        );
        assert_eq!(
            ApiError::Blocked(BlockType::Temporary).status_and_reason(),
            (StatusCode::FORBIDDEN, "blocked_temporary")
        );
        assert_eq!(
            ApiError::Blocked(BlockType::Permanent).status_and_reason(),
            (StatusCode::FORBIDDEN, "blocked_permanent")
        );
        assert_eq!(
            ApiError::StateConflict.status_and_reason(),
            (StatusCode::CONFLICT, "state_conflict")
        );
    }
}
