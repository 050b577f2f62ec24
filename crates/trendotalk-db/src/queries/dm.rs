use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use trendotalk_types::models::BlockType;

use crate::error::DmError;
use crate::models::{ChatSummaryRow, DmChatRow, DmMessageRow, DmRequestRow};
use crate::queries::pair;
use crate::{Database, ts};

/// A dismissed sender sits out this long before they can open a new request.
pub const DISMISS_COOLDOWN_HOURS: i64 = 72;

/// What a send attempt produced. First contact never stores a message; it is
/// held inside the pending request until the recipient responds.
#[derive(Debug)]
pub enum SendOutcome {
    Sent(DmMessageRow),
    RequestCreated(DmRequestRow),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Allow,
    Dismiss,
    Block,
}

#[derive(Debug)]
pub struct RequestResolution {
    pub request: DmRequestRow,
    pub chat_id: Option<String>,
}

pub struct ChatStatus {
    pub is_restricted: bool,
    pub is_blocked: bool,
    pub block_type: Option<BlockType>,
    pub was_dismissed: bool,
    pub has_pending_request: bool,
}

impl Database {
    /// Send a message from `sender` to `recipient`, resolving the pair's
    /// relationship state fresh from storage. State is never cached: a
    /// temporary block expires purely by the passage of `now`.
    pub fn send_dm(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        message_type: &str,
        file_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, DmError> {
        if sender == recipient {
            return Err(DmError::Forbidden);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let recipient_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [recipient],
                |row| row.get(0),
            )?;
            if !recipient_exists {
                return Err(DmError::NotFound);
            }

            if permanent_block_exists(&tx, sender, recipient)? {
                return Err(DmError::Blocked(BlockType::Permanent));
            }
            if temp_block_active(&tx, recipient, sender, now)? {
                return Err(DmError::Blocked(BlockType::Temporary));
            }

            if let Some(chat) = find_chat(&tx, sender, recipient)? {
                let msg =
                    insert_message(&tx, &chat.id, sender, content, message_type, file_url, now)?;
                touch_chat(&tx, &chat.id, now)?;
                tx.commit()?;
                return Ok(SendOutcome::Sent(msg));
            }

            // An open request from this sender means the one allowed message
            // is already in the recipient's inbox.
            if find_pending_request(&tx, sender, recipient)?.is_some() {
                return Err(DmError::RateLimited);
            }

            // Replying to an unanswered inbound request accepts it: the held
            // first message lands in the new chat ahead of this reply.
            if let Some(req) = find_pending_request(&tx, recipient, sender)? {
                if !mark_request(&tx, &req.id, "accepted")? {
                    return Err(DmError::StateConflict);
                }
                let chat = open_chat(&tx, sender, recipient, now)?;
                insert_message(
                    &tx,
                    &chat.id,
                    &req.from_user_id,
                    &req.first_message,
                    "text",
                    None,
                    now,
                )?;
                let msg =
                    insert_message(&tx, &chat.id, sender, content, message_type, file_url, now)?;
                touch_chat(&tx, &chat.id, now)?;
                tx.commit()?;
                return Ok(SendOutcome::Sent(msg));
            }

            // First contact: hold the message in a pending request.
            let req = insert_request(&tx, sender, recipient, content, now)?;
            tx.commit()?;
            Ok(SendOutcome::RequestCreated(req))
        })
    }

    /// Allow, dismiss, or block a pending request. Only the recipient may
    /// resolve it, and the pending->resolved flip is a single guarded UPDATE
    /// so concurrent resolutions race safely: the loser gets StateConflict.
    pub fn resolve_dm_request(
        &self,
        request_id: &str,
        actor: &str,
        action: RequestAction,
        now: DateTime<Utc>,
    ) -> Result<RequestResolution, DmError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let req = get_request(&tx, request_id)?.ok_or(DmError::NotFound)?;
            if req.to_user_id != actor {
                return Err(DmError::Forbidden);
            }

            let new_status = match action {
                RequestAction::Allow => "accepted",
                RequestAction::Dismiss | RequestAction::Block => "rejected",
            };
            if !mark_request(&tx, request_id, new_status)? {
                return Err(DmError::StateConflict);
            }

            let chat_id = match action {
                RequestAction::Allow => {
                    let chat = open_chat(&tx, &req.from_user_id, &req.to_user_id, now)?;
                    insert_message(
                        &tx,
                        &chat.id,
                        &req.from_user_id,
                        &req.first_message,
                        "text",
                        None,
                        now,
                    )?;
                    touch_chat(&tx, &chat.id, now)?;
                    Some(chat.id)
                }
                RequestAction::Dismiss => {
                    let expires = now + Duration::hours(DISMISS_COOLDOWN_HOURS);
                    insert_block(&tx, actor, &req.from_user_id, "temporary", Some(expires), now)?;
                    None
                }
                RequestAction::Block => {
                    insert_block(&tx, actor, &req.from_user_id, "permanent", None, now)?;
                    None
                }
            };

            let request = get_request(&tx, request_id)?.ok_or(DmError::NotFound)?;
            tx.commit()?;
            Ok(RequestResolution { request, chat_id })
        })
    }

    /// Permanent block from inside an open chat. The chat row is kept for
    /// history; further sends from either member fail.
    pub fn block_from_chat(
        &self,
        chat_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DmError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let chat = get_chat(&tx, chat_id)?.ok_or(DmError::NotFound)?;
            let other = chat_peer(&chat, actor).ok_or(DmError::Forbidden)?;

            if !permanent_block_exists(&tx, actor, &other)? {
                insert_block(&tx, actor, &other, "permanent", None, now)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Live relationship status for a chat, recomputed on every call.
    pub fn chat_status(
        &self,
        chat_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatStatus, DmError> {
        self.with_conn(|conn| {
            let chat = get_chat(conn, chat_id)?.ok_or(DmError::NotFound)?;
            if chat_peer(&chat, actor).is_none() {
                return Err(DmError::Forbidden);
            }
            let (a, b) = (chat.user1_id.as_str(), chat.user2_id.as_str());

            let is_blocked = permanent_block_exists(conn, a, b)?;
            let was_dismissed =
                temp_block_active(conn, a, b, now)? || temp_block_active(conn, b, a, now)?;
            let has_pending_request: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM dm_requests
                 WHERE status = 'pending'
                   AND ((from_user_id = ?1 AND to_user_id = ?2)
                     OR (from_user_id = ?2 AND to_user_id = ?1)))",
                params![a, b],
                |row| row.get(0),
            )?;

            let block_type = if is_blocked {
                Some(BlockType::Permanent)
            } else if was_dismissed {
                Some(BlockType::Temporary)
            } else {
                None
            };

            Ok(ChatStatus {
                is_restricted: is_blocked || was_dismissed || has_pending_request,
                is_blocked,
                block_type,
                was_dismissed,
                has_pending_request,
            })
        })
    }

    /// Incoming pending requests, oldest first, with the sender's username.
    pub fn pending_requests_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<(DmRequestRow, String)>, DmError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.from_user_id, r.to_user_id, r.first_message, r.status,
                        r.created_at, u.username
                 FROM dm_requests r
                 JOIN users u ON u.id = r.from_user_id
                 WHERE r.to_user_id = ?1 AND r.status = 'pending'
                 ORDER BY r.created_at ASC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((
                        DmRequestRow {
                            id: row.get(0)?,
                            from_user_id: row.get(1)?,
                            to_user_id: row.get(2)?,
                            first_message: row.get(3)?,
                            status: row.get(4)?,
                            created_at: row.get(5)?,
                        },
                        row.get::<_, String>(6)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The caller's chats, most recently active first.
    pub fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummaryRow>, DmError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id,
                        CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END AS peer_id,
                        u.username,
                        (SELECT m.content FROM dm_messages m
                         WHERE m.chat_id = c.id
                         ORDER BY m.created_at DESC, m.rowid DESC LIMIT 1),
                        (SELECT COUNT(*) FROM dm_messages m
                         WHERE m.chat_id = c.id AND m.sender_id <> ?1 AND m.is_read = 0),
                        c.updated_at
                 FROM dm_chats c
                 JOIN users u
                   ON u.id = CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END
                 WHERE c.user1_id = ?1 OR c.user2_id = ?1
                 ORDER BY c.updated_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ChatSummaryRow {
                        id: row.get(0)?,
                        peer_id: row.get(1)?,
                        peer_username: row.get(2)?,
                        last_message: row.get(3)?,
                        unread_count: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Page of messages for a chat, newest first, cursor on `created_at`.
    /// Fetching marks the peer's messages read and stamps the caller's
    /// last-read watermark.
    pub fn chat_messages(
        &self,
        chat_id: &str,
        actor: &str,
        limit: u32,
        before: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DmMessageRow>, DmError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let chat = get_chat(&tx, chat_id)?.ok_or(DmError::NotFound)?;
            if chat_peer(&chat, actor).is_none() {
                return Err(DmError::Forbidden);
            }

            let mut stmt = tx.prepare(
                "SELECT id, chat_id, sender_id, content, message_type, file_url, is_read, created_at
                 FROM dm_messages
                 WHERE chat_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![chat_id, before, limit], |row| {
                    Ok(DmMessageRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        content: row.get(3)?,
                        message_type: row.get(4)?,
                        file_url: row.get(5)?,
                        is_read: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            tx.execute(
                "UPDATE dm_messages SET is_read = 1
                 WHERE chat_id = ?1 AND sender_id <> ?2 AND is_read = 0",
                params![chat_id, actor],
            )?;
            let read_col = if chat.user1_id == actor {
                "user1_last_read"
            } else {
                "user2_last_read"
            };
            tx.execute(
                &format!("UPDATE dm_chats SET {read_col} = ?1 WHERE id = ?2"),
                params![ts(now), chat_id],
            )?;

            tx.commit()?;
            Ok(rows)
        })
    }

    /// Open (or find) the chat for a pair, bypassing the request flow. Used
    /// by the mutual-follow path; refuses if a permanent block exists.
    pub fn open_chat_for_pair(
        &self,
        a: &str,
        b: &str,
        now: DateTime<Utc>,
    ) -> Result<DmChatRow, DmError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if permanent_block_exists(&tx, a, b)? {
                return Err(DmError::Blocked(BlockType::Permanent));
            }
            let chat = open_chat(&tx, a, b, now)?;
            tx.commit()?;
            Ok(chat)
        })
    }

    /// The other member of a chat, or None when the chat is missing or the
    /// given user is not a member. Used to target typing relays.
    pub fn chat_peer_of(&self, chat_id: &str, user_id: &str) -> Result<Option<String>, DmError> {
        self.with_conn(|conn| {
            let Some(chat) = get_chat(conn, chat_id)? else {
                return Ok(None);
            };
            Ok(chat_peer(&chat, user_id))
        })
    }

    /// Housekeeping: drop temporary blocks that have lapsed. Purely storage
    /// reclamation — every read path already ignores expired rows.
    pub fn purge_expired_blocks(&self, now: DateTime<Utc>) -> Result<usize, DmError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM dm_blocks WHERE block_type = 'temporary' AND expires_at <= ?1",
                [ts(now)],
            )?;
            Ok(n)
        })
    }
}

pub(crate) fn permanent_block_exists(
    conn: &Connection,
    a: &str,
    b: &str,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dm_blocks
         WHERE block_type = 'permanent'
           AND ((blocker_id = ?1 AND blocked_id = ?2)
             OR (blocker_id = ?2 AND blocked_id = ?1)))",
        params![a, b],
        |row| row.get(0),
    )
}

/// Temporary blocks are directional: only the dismissed sender is held out.
fn temp_block_active(
    conn: &Connection,
    blocker: &str,
    blocked: &str,
    now: DateTime<Utc>,
) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dm_blocks
         WHERE block_type = 'temporary'
           AND blocker_id = ?1 AND blocked_id = ?2
           AND expires_at > ?3)",
        params![blocker, blocked, ts(now)],
        |row| row.get(0),
    )
}

fn find_chat(conn: &Connection, a: &str, b: &str) -> Result<Option<DmChatRow>, rusqlite::Error> {
    let (u1, u2) = pair(a, b);
    conn.query_row(
        "SELECT id, user1_id, user2_id, user1_last_read, user2_last_read, created_at, updated_at
         FROM dm_chats WHERE user1_id = ?1 AND user2_id = ?2",
        params![u1, u2],
        chat_from_row,
    )
    .optional()
}

fn get_chat(conn: &Connection, id: &str) -> Result<Option<DmChatRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, user1_id, user2_id, user1_last_read, user2_last_read, created_at, updated_at
         FROM dm_chats WHERE id = ?1",
        [id],
        chat_from_row,
    )
    .optional()
}

fn chat_from_row(row: &rusqlite::Row<'_>) -> Result<DmChatRow, rusqlite::Error> {
    Ok(DmChatRow {
        id: row.get(0)?,
        user1_id: row.get(1)?,
        user2_id: row.get(2)?,
        user1_last_read: row.get(3)?,
        user2_last_read: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn chat_peer(chat: &DmChatRow, member: &str) -> Option<String> {
    if chat.user1_id == member {
        Some(chat.user2_id.clone())
    } else if chat.user2_id == member {
        Some(chat.user1_id.clone())
    } else {
        None
    }
}

pub(crate) fn open_chat(
    conn: &Connection,
    a: &str,
    b: &str,
    now: DateTime<Utc>,
) -> Result<DmChatRow, rusqlite::Error> {
    let (u1, u2) = pair(a, b);
    conn.execute(
        "INSERT OR IGNORE INTO dm_chats (id, user1_id, user2_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![Uuid::new_v4().to_string(), u1, u2, ts(now)],
    )?;
    // Either the fresh row or the one that already existed for the pair.
    conn.query_row(
        "SELECT id, user1_id, user2_id, user1_last_read, user2_last_read, created_at, updated_at
         FROM dm_chats WHERE user1_id = ?1 AND user2_id = ?2",
        params![u1, u2],
        chat_from_row,
    )
}

fn touch_chat(
    conn: &Connection,
    chat_id: &str,
    now: DateTime<Utc>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE dm_chats SET updated_at = ?1 WHERE id = ?2",
        params![ts(now), chat_id],
    )?;
    Ok(())
}

fn get_request(
    conn: &Connection,
    id: &str,
) -> Result<Option<DmRequestRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, from_user_id, to_user_id, first_message, status, created_at
         FROM dm_requests WHERE id = ?1",
        [id],
        request_from_row,
    )
    .optional()
}

pub(crate) fn find_pending_request(
    conn: &Connection,
    from: &str,
    to: &str,
) -> Result<Option<DmRequestRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, from_user_id, to_user_id, first_message, status, created_at
         FROM dm_requests
         WHERE from_user_id = ?1 AND to_user_id = ?2 AND status = 'pending'",
        params![from, to],
        request_from_row,
    )
    .optional()
}

fn request_from_row(row: &rusqlite::Row<'_>) -> Result<DmRequestRow, rusqlite::Error> {
    Ok(DmRequestRow {
        id: row.get(0)?,
        from_user_id: row.get(1)?,
        to_user_id: row.get(2)?,
        first_message: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn insert_request(
    conn: &Connection,
    from: &str,
    to: &str,
    first_message: &str,
    now: DateTime<Utc>,
) -> Result<DmRequestRow, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO dm_requests (id, from_user_id, to_user_id, first_message, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        params![id, from, to, first_message, ts(now)],
    )?;
    Ok(DmRequestRow {
        id,
        from_user_id: from.to_string(),
        to_user_id: to.to_string(),
        first_message: first_message.to_string(),
        status: "pending".to_string(),
        created_at: ts(now),
    })
}

/// The guarded flip out of `pending`. Zero rows affected means a concurrent
/// resolution won; the caller surfaces StateConflict.
pub(crate) fn mark_request(
    conn: &Connection,
    id: &str,
    status: &str,
) -> Result<bool, rusqlite::Error> {
    let n = conn.execute(
        "UPDATE dm_requests SET status = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, status],
    )?;
    Ok(n == 1)
}

pub(crate) fn insert_message(
    conn: &Connection,
    chat_id: &str,
    sender: &str,
    content: &str,
    message_type: &str,
    file_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DmMessageRow, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO dm_messages (id, chat_id, sender_id, content, message_type, file_url, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![id, chat_id, sender, content, message_type, file_url, ts(now)],
    )?;
    Ok(DmMessageRow {
        id,
        chat_id: chat_id.to_string(),
        sender_id: sender.to_string(),
        content: content.to_string(),
        message_type: message_type.to_string(),
        file_url: file_url.map(str::to_string),
        is_read: false,
        created_at: ts(now),
    })
}

fn insert_block(
    conn: &Connection,
    blocker: &str,
    blocked: &str,
    block_type: &str,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO dm_blocks (id, blocker_id, blocked_id, block_type, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            blocker,
            blocked,
            block_type,
            expires_at.map(ts),
            ts(now)
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let a = Uuid::new_v4().to_string();
        let b = Uuid::new_v4().to_string();
        db.create_user(&a, "alice", "hash").unwrap();
        db.create_user(&b, "bob", "hash").unwrap();
        (db, a, b)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn req_id(outcome: SendOutcome) -> String {
        match outcome {
            SendOutcome::RequestCreated(r) => r.id,
            SendOutcome::Sent(_) => panic!("expected a request, got a stored message"),
        }
    }

    #[test]
    fn first_contact_opens_pending_request_without_message_row() {
        let (db, a, b) = setup();

        let outcome = db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap();
        let req = match outcome {
            SendOutcome::RequestCreated(r) => r,
            SendOutcome::Sent(_) => panic!("first contact must not store a message"),
        };
        assert_eq!(req.from_user_id, b);
        assert_eq!(req.to_user_id, a);
        assert_eq!(req.first_message, "hello");
        assert_eq!(req.status, "pending");

        // no chat, no message rows yet
        assert!(db.list_chats(&a).unwrap().is_empty());
        let count: i64 = db
            .with_conn(|c| {
                Ok(c.query_row("SELECT COUNT(*) FROM dm_messages", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn second_send_while_pending_is_rate_limited() {
        let (db, a, b) = setup();
        db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap();

        let err = db
            .send_dm(&b, &a, "hello again", "text", None, t0())
            .unwrap_err();
        assert!(matches!(err, DmError::RateLimited));

        // still exactly one pending request
        assert_eq!(db.pending_requests_for(&a).unwrap().len(), 1);
    }

    #[test]
    fn allow_creates_chat_and_replays_first_message() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());

        let res = db
            .resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap();
        assert_eq!(res.request.status, "accepted");
        let chat_id = res.chat_id.expect("allow opens a chat");

        let msgs = db.chat_messages(&chat_id, &a, 50, None, t0()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[0].sender_id, b);

        // free-form messaging both ways from here on
        assert!(matches!(
            db.send_dm(&b, &a, "second", "text", None, t0()).unwrap(),
            SendOutcome::Sent(_)
        ));
        assert!(matches!(
            db.send_dm(&a, &b, "reply", "text", None, t0()).unwrap(),
            SendOutcome::Sent(_)
        ));
    }

    #[test]
    fn recipient_reply_implicitly_accepts_and_orders_held_message_first() {
        let (db, a, b) = setup();
        db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap();

        let outcome = db.send_dm(&a, &b, "hi yourself", "text", None, t0()).unwrap();
        let msg = match outcome {
            SendOutcome::Sent(m) => m,
            SendOutcome::RequestCreated(_) => panic!("reply must not open a counter-request"),
        };

        let mut msgs = db
            .chat_messages(&msg.chat_id, &a, 50, None, t0())
            .unwrap();
        msgs.reverse(); // newest-first page -> chronological
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[0].sender_id, b);
        assert_eq!(msgs[1].content, "hi yourself");
        assert_eq!(msgs[1].sender_id, a);

        assert!(db.pending_requests_for(&a).unwrap().is_empty());
    }

    #[test]
    fn dismiss_blocks_sender_for_exactly_72_hours() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());

        let res = db
            .resolve_dm_request(&rid, &a, RequestAction::Dismiss, t0())
            .unwrap();
        assert_eq!(res.request.status, "rejected");
        assert!(res.chat_id.is_none());

        let expiry = t0() + Duration::hours(DISMISS_COOLDOWN_HOURS);

        let err = db
            .send_dm(&b, &a, "retry", "text", None, expiry - Duration::seconds(1))
            .unwrap_err();
        assert!(matches!(err, DmError::Blocked(BlockType::Temporary)));

        // lapsed block is ignored without any sweep running
        let outcome = db
            .send_dm(&b, &a, "retry", "text", None, expiry + Duration::seconds(1))
            .unwrap();
        assert!(matches!(outcome, SendOutcome::RequestCreated(_)));
    }

    #[test]
    fn dismissal_does_not_restrict_the_dismisser() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        db.resolve_dm_request(&rid, &a, RequestAction::Dismiss, t0())
            .unwrap();

        // the temporary block is directional: A may still reach out to B
        let outcome = db.send_dm(&a, &b, "actually, hi", "text", None, t0()).unwrap();
        assert!(matches!(outcome, SendOutcome::RequestCreated(_)));
    }

    #[test]
    fn permanent_block_from_request_stops_both_directions() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        db.resolve_dm_request(&rid, &a, RequestAction::Block, t0())
            .unwrap();

        let far_future = t0() + Duration::days(365);
        assert!(matches!(
            db.send_dm(&b, &a, "x", "text", None, far_future).unwrap_err(),
            DmError::Blocked(BlockType::Permanent)
        ));
        assert!(matches!(
            db.send_dm(&a, &b, "x", "text", None, far_future).unwrap_err(),
            DmError::Blocked(BlockType::Permanent)
        ));
    }

    #[test]
    fn resolving_twice_returns_state_conflict() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());

        db.resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap();
        let err = db
            .resolve_dm_request(&rid, &a, RequestAction::Dismiss, t0())
            .unwrap_err();
        assert!(matches!(err, DmError::StateConflict));
    }

    #[test]
    fn only_the_recipient_may_resolve() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());

        let err = db
            .resolve_dm_request(&rid, &b, RequestAction::Allow, t0())
            .unwrap_err();
        assert!(matches!(err, DmError::Forbidden));

        let err = db
            .resolve_dm_request(&Uuid::new_v4().to_string(), &a, RequestAction::Allow, t0())
            .unwrap_err();
        assert!(matches!(err, DmError::NotFound));
    }

    #[test]
    fn block_from_chat_keeps_history_but_halts_sends() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        let chat_id = db
            .resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap()
            .chat_id
            .unwrap();

        db.block_from_chat(&chat_id, &b, t0()).unwrap();

        assert!(matches!(
            db.send_dm(&a, &b, "x", "text", None, t0()).unwrap_err(),
            DmError::Blocked(BlockType::Permanent)
        ));
        // history still readable
        assert_eq!(db.chat_messages(&chat_id, &a, 50, None, t0()).unwrap().len(), 1);

        let err = db
            .block_from_chat(&chat_id, &Uuid::new_v4().to_string(), t0())
            .unwrap_err();
        assert!(matches!(err, DmError::Forbidden));
    }

    #[test]
    fn chat_status_is_computed_live() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        let chat_id = db
            .resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap()
            .chat_id
            .unwrap();

        let status = db.chat_status(&chat_id, &a, t0()).unwrap();
        assert!(!status.is_restricted);
        assert!(status.block_type.is_none());

        db.block_from_chat(&chat_id, &a, t0()).unwrap();
        let status = db.chat_status(&chat_id, &a, t0()).unwrap();
        assert!(status.is_restricted);
        assert!(status.is_blocked);
        assert_eq!(status.block_type, Some(BlockType::Permanent));
    }

    #[test]
    fn at_most_one_governing_record_per_pair() {
        let (db, a, b) = setup();

        // pending request only
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        assert_eq!(db.pending_requests_for(&a).unwrap().len(), 1);
        assert!(db.list_chats(&a).unwrap().is_empty());

        // allow: chat only, no pending request
        db.resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap();
        assert!(db.pending_requests_for(&a).unwrap().is_empty());
        assert_eq!(db.list_chats(&a).unwrap().len(), 1);
    }

    #[test]
    fn purge_drops_only_lapsed_temporary_blocks() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        db.resolve_dm_request(&rid, &a, RequestAction::Dismiss, t0())
            .unwrap();

        assert_eq!(db.purge_expired_blocks(t0()).unwrap(), 0);

        let after = t0() + Duration::hours(DISMISS_COOLDOWN_HOURS) + Duration::seconds(1);
        assert_eq!(db.purge_expired_blocks(after).unwrap(), 1);

        // permanent blocks are never purged
        let rid = req_id(db.send_dm(&b, &a, "again", "text", None, after).unwrap());
        db.resolve_dm_request(&rid, &a, RequestAction::Block, after)
            .unwrap();
        assert_eq!(db.purge_expired_blocks(after + Duration::days(30)).unwrap(), 0);
    }

    #[test]
    fn unread_counts_and_read_marking() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        let chat_id = db
            .resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap()
            .chat_id
            .unwrap();
        db.send_dm(&b, &a, "more", "text", None, t0() + Duration::seconds(5))
            .unwrap();

        let chats = db.list_chats(&a).unwrap();
        assert_eq!(chats[0].unread_count, 2);
        assert_eq!(chats[0].last_message.as_deref(), Some("more"));

        db.chat_messages(&chat_id, &a, 50, None, t0() + Duration::seconds(10))
            .unwrap();
        let chats = db.list_chats(&a).unwrap();
        assert_eq!(chats[0].unread_count, 0);
    }

    #[test]
    fn chat_peer_lookup_is_member_only() {
        let (db, a, b) = setup();
        let rid = req_id(db.send_dm(&b, &a, "hello", "text", None, t0()).unwrap());
        let chat_id = db
            .resolve_dm_request(&rid, &a, RequestAction::Allow, t0())
            .unwrap()
            .chat_id
            .unwrap();

        assert_eq!(db.chat_peer_of(&chat_id, &a).unwrap().as_deref(), Some(b.as_str()));
        assert_eq!(db.chat_peer_of(&chat_id, &b).unwrap().as_deref(), Some(a.as_str()));

        // outsiders and unknown chats resolve to nothing
        let outsider = Uuid::new_v4().to_string();
        assert!(db.chat_peer_of(&chat_id, &outsider).unwrap().is_none());
        assert!(db
            .chat_peer_of(&Uuid::new_v4().to_string(), &a)
            .unwrap()
            .is_none());
    }

    #[test]
    fn sending_to_self_or_unknown_user_fails() {
        let (db, a, _b) = setup();
        assert!(matches!(
            db.send_dm(&a, &a, "hi me", "text", None, t0()).unwrap_err(),
            DmError::Forbidden
        ));
        assert!(matches!(
            db.send_dm(&a, &Uuid::new_v4().to_string(), "hi", "text", None, t0())
                .unwrap_err(),
            DmError::NotFound
        ));
    }
}
