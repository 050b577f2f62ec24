use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::DmError;
use crate::models::PostRow;
use crate::{Database, ts};

#[derive(Debug)]
pub struct ReactionState {
    pub is_liked: bool,
    pub is_disliked: bool,
    pub likes_count: i64,
    pub dislikes_count: i64,
}

#[derive(Debug)]
pub struct VoteState {
    pub is_voted: bool,
    pub votes_count: i64,
}

/// A feed row carries the viewer's own reaction state alongside the post.
pub struct FeedPostRow {
    pub post: PostRow,
    pub my_reaction: Option<String>,
    pub my_vote: bool,
}

impl Database {
    pub fn create_post(
        &self,
        author_id: &str,
        content: &str,
        file_url: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PostRow, DmError> {
        self.with_conn(|conn| {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO posts (id, author_id, content, file_url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, author_id, content, file_url, ts(now)],
            )?;
            let author_username = conn.query_row(
                "SELECT username FROM users WHERE id = ?1",
                [author_id],
                |row| row.get(0),
            )?;
            Ok(PostRow {
                id,
                author_id: author_id.to_string(),
                author_username,
                content: content.to_string(),
                file_url: file_url.map(str::to_string),
                likes_count: 0,
                dislikes_count: 0,
                votes_count: 0,
                created_at: ts(now),
            })
        })
    }

    /// Feed page, newest first, cursor on `created_at`. The viewer's own
    /// reaction and vote ride along so the client never needs a second
    /// round trip.
    pub fn feed(
        &self,
        viewer: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<FeedPostRow>, DmError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.author_id, u.username, p.content, p.file_url,
                        p.likes_count, p.dislikes_count, p.votes_count, p.created_at,
                        (SELECT kind FROM post_reactions r
                         WHERE r.post_id = p.id AND r.user_id = ?1),
                        EXISTS(SELECT 1 FROM post_votes v
                               WHERE v.post_id = p.id AND v.user_id = ?1)
                 FROM posts p
                 JOIN users u ON u.id = p.author_id
                 WHERE (?2 IS NULL OR p.created_at < ?2)
                 ORDER BY p.created_at DESC, p.rowid DESC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![viewer, before, limit], |row| {
                    Ok(FeedPostRow {
                        post: PostRow {
                            id: row.get(0)?,
                            author_id: row.get(1)?,
                            author_username: row.get(2)?,
                            content: row.get(3)?,
                            file_url: row.get(4)?,
                            likes_count: row.get(5)?,
                            dislikes_count: row.get(6)?,
                            votes_count: row.get(7)?,
                            created_at: row.get(8)?,
                        },
                        my_reaction: row.get(9)?,
                        my_vote: row.get(10)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Toggle a like or dislike. The two are mutually exclusive per
    /// (post, user): setting one clears the other, and both denormalized
    /// counters move in the same transaction. Toggling twice restores the
    /// original state.
    pub fn toggle_reaction(
        &self,
        post_id: &str,
        user_id: &str,
        kind: &str,
        now: DateTime<Utc>,
    ) -> Result<ReactionState, DmError> {
        debug_assert!(kind == "like" || kind == "dislike");

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            ensure_post(&tx, post_id)?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT kind FROM post_reactions WHERE post_id = ?1 AND user_id = ?2",
                    params![post_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing.as_deref() {
                Some(current) if current == kind => {
                    // toggle off
                    tx.execute(
                        "DELETE FROM post_reactions WHERE post_id = ?1 AND user_id = ?2",
                        params![post_id, user_id],
                    )?;
                    bump(&tx, post_id, kind, -1)?;
                }
                Some(current) => {
                    // flip like <-> dislike atomically
                    tx.execute(
                        "UPDATE post_reactions SET kind = ?3, created_at = ?4
                         WHERE post_id = ?1 AND user_id = ?2",
                        params![post_id, user_id, kind, ts(now)],
                    )?;
                    bump(&tx, post_id, current, -1)?;
                    bump(&tx, post_id, kind, 1)?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO post_reactions (id, post_id, user_id, kind, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![Uuid::new_v4().to_string(), post_id, user_id, kind, ts(now)],
                    )?;
                    bump(&tx, post_id, kind, 1)?;
                }
            }

            let state = reaction_state(&tx, post_id, user_id)?;
            tx.commit()?;
            Ok(state)
        })
    }

    /// Votes are independent of like/dislike: no mutual exclusion.
    pub fn toggle_vote(
        &self,
        post_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<VoteState, DmError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            ensure_post(&tx, post_id)?;

            let removed = tx.execute(
                "DELETE FROM post_votes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, user_id],
            )? == 1;

            if removed {
                tx.execute(
                    "UPDATE posts SET votes_count = votes_count - 1 WHERE id = ?1",
                    [post_id],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO post_votes (id, post_id, user_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![Uuid::new_v4().to_string(), post_id, user_id, ts(now)],
                )?;
                tx.execute(
                    "UPDATE posts SET votes_count = votes_count + 1 WHERE id = ?1",
                    [post_id],
                )?;
            }

            let votes_count: i64 = tx.query_row(
                "SELECT votes_count FROM posts WHERE id = ?1",
                [post_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(VoteState {
                is_voted: !removed,
                votes_count,
            })
        })
    }
}

fn ensure_post(conn: &Connection, post_id: &str) -> Result<(), DmError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM posts WHERE id = ?1)",
        [post_id],
        |row| row.get(0),
    )?;
    if exists { Ok(()) } else { Err(DmError::NotFound) }
}

fn bump(conn: &Connection, post_id: &str, kind: &str, delta: i64) -> Result<(), rusqlite::Error> {
    let sql = if kind == "like" {
        "UPDATE posts SET likes_count = likes_count + ?2 WHERE id = ?1"
    } else {
        "UPDATE posts SET dislikes_count = dislikes_count + ?2 WHERE id = ?1"
    };
    conn.execute(sql, params![post_id, delta])?;
    Ok(())
}

fn reaction_state(
    conn: &Connection,
    post_id: &str,
    user_id: &str,
) -> Result<ReactionState, rusqlite::Error> {
    let (likes_count, dislikes_count) = conn.query_row(
        "SELECT likes_count, dislikes_count FROM posts WHERE id = ?1",
        [post_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let mine: Option<String> = conn
        .query_row(
            "SELECT kind FROM post_reactions WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(ReactionState {
        is_liked: mine.as_deref() == Some("like"),
        is_disliked: mine.as_deref() == Some("dislike"),
        likes_count,
        dislikes_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup() -> (Database, String, String) {
        let db = Database::open_in_memory().unwrap();
        let u = Uuid::new_v4().to_string();
        db.create_user(&u, "alice", "hash").unwrap();
        let post = db.create_post(&u, "first!", None, t0()).unwrap();
        (db, u, post.id)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn like_then_dislike_swaps_atomically() {
        let (db, u, p) = setup();

        let s = db.toggle_reaction(&p, &u, "like", t0()).unwrap();
        assert!(s.is_liked && !s.is_disliked);
        assert_eq!((s.likes_count, s.dislikes_count), (1, 0));

        let s = db.toggle_reaction(&p, &u, "dislike", t0()).unwrap();
        assert!(!s.is_liked && s.is_disliked);
        assert_eq!((s.likes_count, s.dislikes_count), (0, 1));
    }

    #[test]
    fn toggling_twice_restores_original_state() {
        let (db, u, p) = setup();

        db.toggle_reaction(&p, &u, "like", t0()).unwrap();
        let s = db.toggle_reaction(&p, &u, "like", t0()).unwrap();
        assert!(!s.is_liked && !s.is_disliked);
        assert_eq!((s.likes_count, s.dislikes_count), (0, 0));
    }

    #[test]
    fn votes_are_independent_of_reactions() {
        let (db, u, p) = setup();

        db.toggle_reaction(&p, &u, "like", t0()).unwrap();
        let v = db.toggle_vote(&p, &u, t0()).unwrap();
        assert!(v.is_voted);
        assert_eq!(v.votes_count, 1);

        // vote off; the like is untouched
        let v = db.toggle_vote(&p, &u, t0()).unwrap();
        assert!(!v.is_voted);
        assert_eq!(v.votes_count, 0);
        let s = db.toggle_reaction(&p, &u, "like", t0()).unwrap();
        assert_eq!(s.likes_count, 0); // this call toggled the like off
    }

    #[test]
    fn feed_carries_the_viewers_state() {
        let (db, u, p) = setup();
        db.toggle_reaction(&p, &u, "dislike", t0()).unwrap();
        db.toggle_vote(&p, &u, t0()).unwrap();

        let feed = db.feed(&u, 50, None).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].post.id, p);
        assert_eq!(feed[0].my_reaction.as_deref(), Some("dislike"));
        assert!(feed[0].my_vote);
        assert_eq!(feed[0].post.dislikes_count, 1);
    }

    #[test]
    fn reacting_to_a_missing_post_fails() {
        let (db, u, _p) = setup();
        let err = db
            .toggle_reaction(&Uuid::new_v4().to_string(), &u, "like", t0())
            .unwrap_err();
        assert!(matches!(err, DmError::NotFound));
    }
}
