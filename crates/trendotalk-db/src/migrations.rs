use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            bio             TEXT,
            followers_count INTEGER NOT NULL DEFAULT 0,
            following_count INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS follows (
            follower_id TEXT NOT NULL REFERENCES users(id),
            followee_id TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (follower_id, followee_id)
        );

        CREATE TABLE IF NOT EXISTS posts (
            id              TEXT PRIMARY KEY,
            author_id       TEXT NOT NULL REFERENCES users(id),
            content         TEXT NOT NULL,
            file_url        TEXT,
            likes_count     INTEGER NOT NULL DEFAULT 0,
            dislikes_count  INTEGER NOT NULL DEFAULT 0,
            votes_count     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        -- like/dislike mutual exclusion is the UNIQUE(post_id, user_id):
        -- a user holds at most one reaction row per post, whose kind flips.
        CREATE TABLE IF NOT EXISTS post_reactions (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL CHECK (kind IN ('like', 'dislike')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS post_votes (
            id          TEXT PRIMARY KEY,
            post_id     TEXT NOT NULL REFERENCES posts(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(post_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS dm_requests (
            id            TEXT PRIMARY KEY,
            from_user_id  TEXT NOT NULL REFERENCES users(id),
            to_user_id    TEXT NOT NULL REFERENCES users(id),
            first_message TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending'
                          CHECK (status IN ('pending', 'accepted', 'rejected')),
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- at most one open request per direction
        CREATE UNIQUE INDEX IF NOT EXISTS idx_dm_requests_pending
            ON dm_requests(from_user_id, to_user_id) WHERE status = 'pending';

        -- pair is canonicalized: user1_id < user2_id
        CREATE TABLE IF NOT EXISTS dm_chats (
            id              TEXT PRIMARY KEY,
            user1_id        TEXT NOT NULL REFERENCES users(id),
            user2_id        TEXT NOT NULL REFERENCES users(id),
            user1_last_read TEXT,
            user2_last_read TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user1_id, user2_id)
        );

        CREATE TABLE IF NOT EXISTS dm_messages (
            id           TEXT PRIMARY KEY,
            chat_id      TEXT NOT NULL REFERENCES dm_chats(id),
            sender_id    TEXT NOT NULL REFERENCES users(id),
            content      TEXT NOT NULL,
            message_type TEXT NOT NULL DEFAULT 'text'
                         CHECK (message_type IN ('text', 'file')),
            file_url     TEXT,
            is_read      INTEGER NOT NULL DEFAULT 0,
            created_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_dm_messages_chat
            ON dm_messages(chat_id, created_at);

        -- expiry of temporary blocks is evaluated lazily at read time;
        -- rows persist until the housekeeping sweep removes them.
        CREATE TABLE IF NOT EXISTS dm_blocks (
            id          TEXT PRIMARY KEY,
            blocker_id  TEXT NOT NULL REFERENCES users(id),
            blocked_id  TEXT NOT NULL REFERENCES users(id),
            block_type  TEXT NOT NULL CHECK (block_type IN ('temporary', 'permanent')),
            expires_at  TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_dm_blocks_pair
            ON dm_blocks(blocker_id, blocked_id);

        CREATE TABLE IF NOT EXISTS vibes (
            id          TEXT PRIMARY KEY,
            author_id   TEXT NOT NULL REFERENCES users(id),
            file_url    TEXT NOT NULL,
            caption     TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            expires_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_vibes_expires
            ON vibes(expires_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
