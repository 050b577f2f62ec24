use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BlockType, MessageType, ReactionKind};

// -- JWT Claims --

/// JWT claims shared between trendotalk-api (REST middleware) and
/// trendotalk-gateway (WebSocket authentication). Canonical definition lives
/// here in trendotalk-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- DM messaging --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendDmRequest {
    pub content: String,
    /// Base64 file payload; when present the file is uploaded to the media
    /// store before anything is persisted, and the message becomes type=file.
    pub file_data: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DmMessageResponse {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub file_url: Option<String>,
    pub is_read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct DmRequestResponse {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub from_username: String,
    pub to_user_id: Uuid,
    pub first_message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// What actually happened to a send attempt. A first contact between two
/// users does not produce a stored message; it opens a pending request that
/// holds the text until the recipient responds.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendDmResponse {
    Sent { message: DmMessageResponse },
    RequestCreated { request: DmRequestResponse },
}

#[derive(Debug, Serialize)]
pub struct DmChatResponse {
    pub id: Uuid,
    pub peer_id: Uuid,
    pub peer_username: String,
    pub last_message: Option<String>,
    pub unread_count: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Computed fresh on every call; never cached, because temporary blocks
/// expire purely by the passage of time.
#[derive(Debug, Serialize)]
pub struct ChatStatusResponse {
    pub is_restricted: bool,
    pub is_blocked: bool,
    pub block_type: Option<BlockType>,
    pub was_dismissed: bool,
    pub has_pending_request: bool,
}

// -- Posts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub content: String,
    pub file_data: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub content: String,
    pub file_url: Option<String>,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub votes_count: i64,
    pub is_liked: bool,
    pub is_disliked: bool,
    pub is_voted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Result of a like/dislike toggle: the caller's new reaction state plus
/// refreshed counters, updated in the same transaction.
#[derive(Debug, Serialize)]
pub struct ReactionToggleResponse {
    pub is_liked: bool,
    pub is_disliked: bool,
    pub likes_count: i64,
    pub dislikes_count: i64,
}

#[derive(Debug, Serialize)]
pub struct VoteToggleResponse {
    pub is_voted: bool,
    pub votes_count: i64,
}

// -- Follow graph --

#[derive(Debug, Serialize)]
pub struct FollowResponse {
    pub following: bool,
    pub followers_count: i64,
    pub following_count: i64,
    /// Set when this follow completed a mutual pair and opened a chat.
    pub became_mutual: bool,
    pub chat_id: Option<Uuid>,
}

// -- Vibes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateVibeRequest {
    pub file_data: String,
    pub file_name: String,
    pub caption: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VibeResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub file_url: String,
    pub caption: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

// -- Reactions over the gateway --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionUpdate {
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub kind: ReactionKind,
    pub active: bool,
}
