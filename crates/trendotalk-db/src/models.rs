/// Database row types — these map directly to SQLite rows.
/// Distinct from trendotalk-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub bio: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub created_at: String,
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub content: String,
    pub file_url: Option<String>,
    pub likes_count: i64,
    pub dislikes_count: i64,
    pub votes_count: i64,
    pub created_at: String,
}

#[derive(Debug)]
pub struct DmRequestRow {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    pub first_message: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct DmChatRow {
    pub id: String,
    pub user1_id: String,
    pub user2_id: String,
    pub user1_last_read: Option<String>,
    pub user2_last_read: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug)]
pub struct DmMessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
    pub file_url: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

pub struct VibeRow {
    pub id: String,
    pub author_id: String,
    pub author_username: String,
    pub file_url: String,
    pub caption: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

/// Chat summary joined with peer info and unread count for the list view.
pub struct ChatSummaryRow {
    pub id: String,
    pub peer_id: String,
    pub peer_username: String,
    pub last_message: Option<String>,
    pub unread_count: i64,
    pub updated_at: String,
}
