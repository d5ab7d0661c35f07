//! Per (user, group) last-read markers; the source of unread counts.
//!
//! A user with no cursor has never read the group, so everything counts as
//! unread. After a cursor exists, only later messages from other senders
//! count; a user's own messages never inflate their own unread total.
//! System entries count like any other message.

use chrono::Utc;
use tracing::debug;

use crate::error::Result;
use crate::models::ReadCursor;
use crate::store::{decode_ts, encode_ts, Database};

#[derive(Clone)]
pub struct ReadCursorTracker {
    db: Database,
}

impl ReadCursorTracker {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the cursor to now. The stored instant only moves forward.
    pub async fn mark_read(&self, group_id: &str, user: &str) -> Result<ReadCursor> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO read_cursors (user_id, group_id, last_read_at) VALUES (?, ?, ?) \
             ON CONFLICT (user_id, group_id) DO UPDATE SET last_read_at = excluded.last_read_at \
             WHERE excluded.last_read_at > read_cursors.last_read_at",
        )
        .bind(user)
        .bind(group_id)
        .bind(encode_ts(now))
        .execute(self.db.pool())
        .await?;

        // The guard may have kept an already-later instant; report the
        // stored cursor, not the local clock. The row exists after the
        // upsert either way.
        let (last_read_at,): (String,) = sqlx::query_as(
            "SELECT last_read_at FROM read_cursors WHERE user_id = ? AND group_id = ?",
        )
        .bind(user)
        .bind(group_id)
        .fetch_one(self.db.pool())
        .await?;

        debug!("Marked group {} as read for user {}", group_id, user);
        Ok(ReadCursor {
            user_id: user.to_string(),
            group_id: group_id.to_string(),
            last_read_at: decode_ts(&last_read_at),
        })
    }

    pub async fn cursor_for(&self, group_id: &str, user: &str) -> Result<Option<ReadCursor>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT last_read_at FROM read_cursors WHERE user_id = ? AND group_id = ?",
        )
        .bind(user)
        .bind(group_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|(last_read_at,)| ReadCursor {
            user_id: user.to_string(),
            group_id: group_id.to_string(),
            last_read_at: decode_ts(&last_read_at),
        }))
    }

    /// Unread message count for `user` in `group_id`.
    pub async fn unread_count(&self, group_id: &str, user: &str) -> Result<i64> {
        let cursor: Option<(String,)> = sqlx::query_as(
            "SELECT last_read_at FROM read_cursors WHERE user_id = ? AND group_id = ?",
        )
        .bind(user)
        .bind(group_id)
        .fetch_optional(self.db.pool())
        .await?;

        let count = match cursor {
            None => {
                // Never read: everything is unread.
                let (count,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM group_messages WHERE group_id = ?")
                        .bind(group_id)
                        .fetch_one(self.db.pool())
                        .await?;
                count
            }
            Some((last_read_at,)) => {
                let (count,): (i64,) = sqlx::query_as(
                    "SELECT COUNT(*) FROM group_messages \
                     WHERE group_id = ? AND created_at > ? AND sender_id != ?",
                )
                .bind(group_id)
                .bind(&last_read_at)
                .bind(user)
                .fetch_one(self.db.pool())
                .await?;
                count
            }
        };

        Ok(count)
    }
}
