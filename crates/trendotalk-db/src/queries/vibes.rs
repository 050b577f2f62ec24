use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::error::DmError;
use crate::models::VibeRow;
use crate::{Database, ts};

/// Vibes are ephemeral: gone from every read 24 hours after posting.
pub const VIBE_TTL_HOURS: i64 = 24;

impl Database {
    pub fn create_vibe(
        &self,
        author_id: &str,
        file_url: &str,
        caption: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VibeRow, DmError> {
        self.with_conn(|conn| {
            let id = Uuid::new_v4().to_string();
            let expires_at = ts(now + Duration::hours(VIBE_TTL_HOURS));
            conn.execute(
                "INSERT INTO vibes (id, author_id, file_url, caption, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, author_id, file_url, caption, ts(now), expires_at],
            )?;
            let author_username = conn.query_row(
                "SELECT username FROM users WHERE id = ?1",
                [author_id],
                |row| row.get(0),
            )?;
            Ok(VibeRow {
                id,
                author_id: author_id.to_string(),
                author_username,
                file_url: file_url.to_string(),
                caption: caption.map(str::to_string),
                created_at: ts(now),
                expires_at,
            })
        })
    }

    /// Unexpired vibes, newest first. Expiry is filtered live against `now`;
    /// the sweep only reclaims storage.
    pub fn list_vibes(&self, now: DateTime<Utc>) -> Result<Vec<VibeRow>, DmError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, v.author_id, u.username, v.file_url, v.caption,
                        v.created_at, v.expires_at
                 FROM vibes v
                 JOIN users u ON u.id = v.author_id
                 WHERE v.expires_at > ?1
                 ORDER BY v.created_at DESC, v.rowid DESC",
            )?;
            let rows = stmt
                .query_map([ts(now)], |row| {
                    Ok(VibeRow {
                        id: row.get(0)?,
                        author_id: row.get(1)?,
                        author_username: row.get(2)?,
                        file_url: row.get(3)?,
                        caption: row.get(4)?,
                        created_at: row.get(5)?,
                        expires_at: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn purge_expired_vibes(&self, now: DateTime<Utc>) -> Result<usize, DmError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM vibes WHERE expires_at <= ?1", [ts(now)])?;
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn vibes_disappear_after_24_hours_without_a_sweep() {
        let db = Database::open_in_memory().unwrap();
        let u = Uuid::new_v4().to_string();
        db.create_user(&u, "alice", "hash").unwrap();

        db.create_vibe(&u, "https://cdn/x.mp4", Some("hi"), t0()).unwrap();

        assert_eq!(db.list_vibes(t0()).unwrap().len(), 1);
        let just_before = t0() + Duration::hours(VIBE_TTL_HOURS) - Duration::seconds(1);
        assert_eq!(db.list_vibes(just_before).unwrap().len(), 1);
        let after = t0() + Duration::hours(VIBE_TTL_HOURS) + Duration::seconds(1);
        assert_eq!(db.list_vibes(after).unwrap().len(), 0);

        // the sweep reclaims the row but changes nothing observable
        assert_eq!(db.purge_expired_vibes(after).unwrap(), 1);
        assert_eq!(db.list_vibes(after).unwrap().len(), 0);
    }
}
