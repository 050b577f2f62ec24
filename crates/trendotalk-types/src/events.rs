use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ReactionUpdate;
use crate::models::RequestStatus;

/// Events sent over the WebSocket gateway. Delivery is best-effort: a failed
/// or missing subscriber never fails the HTTP request that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A user came online or went offline
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },

    /// A new DM was stored in a chat (targeted to both members)
    DmMessage {
        chat_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        content: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A first-contact request landed in the recipient's inbox
    DmRequestCreated {
        request_id: Uuid,
        from_user_id: Uuid,
        from_username: String,
        first_message: String,
    },

    /// A pending request was allowed, dismissed, or blocked
    DmRequestResolved {
        request_id: Uuid,
        status: RequestStatus,
        chat_id: Option<Uuid>,
    },

    /// A like/dislike toggled on a post
    PostReaction(ReactionUpdate),

    /// A user started typing in a chat
    TypingStart {
        chat_id: Uuid,
        user_id: Uuid,
        username: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Indicate typing in a chat
    StartTyping { chat_id: Uuid },
}
