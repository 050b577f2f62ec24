use thiserror::Error;
use trendotalk_types::models::BlockType;

/// Domain errors from the messaging and relationship layer. The API crate
/// maps these onto HTTP statuses and JSON reason codes.
#[derive(Debug, Error)]
pub enum DmError {
    #[error("not found")]
    NotFound,

    /// The request was resolved by a concurrent allow/dismiss/block; the
    /// guarded status update affected zero rows.
    #[error("request is no longer pending")]
    StateConflict,

    /// A second send attempt while the recipient has not responded to the
    /// pending request.
    #[error("you can send one message until they respond")]
    RateLimited,

    #[error("sending is blocked ({})", .0.as_str())]
    Blocked(BlockType),

    /// The caller is not a party allowed to perform this action.
    #[error("forbidden")]
    Forbidden,

    #[error("database lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}
