use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::error::DmError;
use crate::models::UserRow;
use crate::queries::dm::{
    find_pending_request, insert_message, mark_request, open_chat, permanent_block_exists,
};
use crate::{Database, ts};

#[derive(Debug)]
pub struct FollowOutcome {
    pub following: bool,
    /// Follower count of the target user.
    pub followers_count: i64,
    /// Following count of the acting user.
    pub following_count: i64,
    pub became_mutual: bool,
    pub chat_id: Option<String>,
}

impl Database {
    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<(), DmError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>, DmError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, username, password, bio, followers_count, following_count, created_at
                     FROM users WHERE username = ?1",
                    [username],
                    user_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>, DmError> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id, username, password, bio, followers_count, following_count, created_at
                     FROM users WHERE id = ?1",
                    [id],
                    user_from_row,
                )
                .optional()?)
        })
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String, DmError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(DmError::NotFound)
        })
    }

    /// Follow a user, updating both counters in the same transaction. When
    /// the follow completes a mutual pair a chat opens directly, bypassing
    /// the request flow (unless a permanent block stands between them).
    /// Following someone you already follow is a no-op.
    pub fn follow(
        &self,
        follower: &str,
        followee: &str,
        now: DateTime<Utc>,
    ) -> Result<FollowOutcome, DmError> {
        if follower == followee {
            return Err(DmError::Forbidden);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let followee_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [followee],
                |row| row.get(0),
            )?;
            if !followee_exists {
                return Err(DmError::NotFound);
            }

            let inserted = tx.execute(
                "INSERT OR IGNORE INTO follows (follower_id, followee_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![follower, followee, ts(now)],
            )? == 1;

            if inserted {
                tx.execute(
                    "UPDATE users SET followers_count = followers_count + 1 WHERE id = ?1",
                    [followee],
                )?;
                tx.execute(
                    "UPDATE users SET following_count = following_count + 1 WHERE id = ?1",
                    [follower],
                )?;
            }

            let mutual: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2)",
                params![followee, follower],
                |row| row.get(0),
            )?;

            let mut chat_id = None;
            let became_mutual = inserted && mutual;
            if became_mutual && !permanent_block_exists(&tx, follower, followee)? {
                let chat = open_chat(&tx, follower, followee, now)?;
                // Fold any open request between the pair into the chat so a
                // single record governs them: accept it and land its held
                // first message.
                for (from, to) in [(follower, followee), (followee, follower)] {
                    if let Some(req) = find_pending_request(&tx, from, to)? {
                        if mark_request(&tx, &req.id, "accepted")? {
                            insert_message(
                                &tx,
                                &chat.id,
                                &req.from_user_id,
                                &req.first_message,
                                "text",
                                None,
                                now,
                            )?;
                        }
                    }
                }
                chat_id = Some(chat.id);
            }

            let followers_count: i64 = tx.query_row(
                "SELECT followers_count FROM users WHERE id = ?1",
                [followee],
                |row| row.get(0),
            )?;
            let following_count: i64 = tx.query_row(
                "SELECT following_count FROM users WHERE id = ?1",
                [follower],
                |row| row.get(0),
            )?;

            tx.commit()?;
            Ok(FollowOutcome {
                following: true,
                followers_count,
                following_count,
                became_mutual,
                chat_id,
            })
        })
    }

    /// Unfollow; counters only move when a follow row was actually removed.
    pub fn unfollow(&self, follower: &str, followee: &str) -> Result<FollowOutcome, DmError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let removed = tx.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower, followee],
            )? == 1;

            if removed {
                tx.execute(
                    "UPDATE users SET followers_count = followers_count - 1 WHERE id = ?1",
                    [followee],
                )?;
                tx.execute(
                    "UPDATE users SET following_count = following_count - 1 WHERE id = ?1",
                    [follower],
                )?;
            }

            let followers_count: i64 = tx
                .query_row(
                    "SELECT followers_count FROM users WHERE id = ?1",
                    [followee],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(DmError::NotFound)?;
            let following_count: i64 = tx.query_row(
                "SELECT following_count FROM users WHERE id = ?1",
                [follower],
                |row| row.get(0),
            )?;

            tx.commit()?;
            Ok(FollowOutcome {
                following: false,
                followers_count,
                following_count,
                became_mutual: false,
                chat_id: None,
            })
        })
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        bio: row.get(3)?,
        followers_count: row.get(4)?,
        following_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

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

    #[test]
    fn follow_moves_both_counters_once() {
        let (db, a, b) = setup();

        let out = db.follow(&a, &b, t0()).unwrap();
        assert!(out.following);
        assert_eq!(out.followers_count, 1);
        assert_eq!(out.following_count, 1);
        assert!(!out.became_mutual);

        // idempotent
        let out = db.follow(&a, &b, t0()).unwrap();
        assert_eq!(out.followers_count, 1);
        assert_eq!(out.following_count, 1);

        let out = db.unfollow(&a, &b).unwrap();
        assert!(!out.following);
        assert_eq!(out.followers_count, 0);
        assert_eq!(out.following_count, 0);

        // unfollowing again moves nothing
        let out = db.unfollow(&a, &b).unwrap();
        assert_eq!(out.followers_count, 0);
    }

    #[test]
    fn mutual_follow_opens_a_chat() {
        let (db, a, b) = setup();

        assert!(db.follow(&a, &b, t0()).unwrap().chat_id.is_none());
        let out = db.follow(&b, &a, t0()).unwrap();
        assert!(out.became_mutual);
        let chat_id = out.chat_id.expect("mutual follow opens a chat");

        assert_eq!(db.list_chats(&a).unwrap()[0].id, chat_id);
    }

    #[test]
    fn mutual_follow_respects_permanent_blocks() {
        let (db, a, b) = setup();

        // B blocked A out of a request earlier
        use crate::queries::dm::{RequestAction, SendOutcome};
        let rid = match db.send_dm(&a, &b, "hi", "text", None, t0()).unwrap() {
            SendOutcome::RequestCreated(r) => r.id,
            SendOutcome::Sent(_) => unreachable!(),
        };
        db.resolve_dm_request(&rid, &b, RequestAction::Block, t0())
            .unwrap();

        db.follow(&a, &b, t0()).unwrap();
        let out = db.follow(&b, &a, t0()).unwrap();
        assert!(out.became_mutual);
        assert!(out.chat_id.is_none());
    }

    #[test]
    fn mutual_follow_folds_a_pending_request_into_the_chat() {
        let (db, a, b) = setup();

        use crate::queries::dm::SendOutcome;
        assert!(matches!(
            db.send_dm(&b, &a, "hey", "text", None, t0()).unwrap(),
            SendOutcome::RequestCreated(_)
        ));

        db.follow(&a, &b, t0()).unwrap();
        let chat_id = db.follow(&b, &a, t0()).unwrap().chat_id.unwrap();

        // the held first message landed in the chat and no request lingers
        let msgs = db.chat_messages(&chat_id, &a, 50, None, t0()).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "hey");
        assert!(db.pending_requests_for(&a).unwrap().is_empty());
    }

    #[test]
    fn follow_targets_must_exist() {
        let (db, a, _b) = setup();
        assert!(matches!(
            db.follow(&a, &Uuid::new_v4().to_string(), t0()).unwrap_err(),
            DmError::NotFound
        ));
        assert!(matches!(db.follow(&a, &a, t0()).unwrap_err(), DmError::Forbidden));
    }
}
