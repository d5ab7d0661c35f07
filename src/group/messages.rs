//! Durable record of group messages, including system/audit entries.

use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::models::{GroupMessage, GroupMessageKind, SYSTEM_SENDER};
use crate::store::{decode_ts, encode_ts, Database};

#[derive(Clone)]
pub struct GroupMessageLedger {
    db: Database,
}

type GroupMessageRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn row_to_message(row: GroupMessageRow) -> GroupMessage {
    let (id, group_id, sender_id, sender_name, content, media_url, media_public_id, kind, created_at) =
        row;
    GroupMessage {
        id,
        group_id,
        sender_id,
        sender_name,
        content,
        media_url,
        media_public_id,
        kind: GroupMessageKind::from_db(&kind),
        created_at: decode_ts(&created_at),
    }
}

const COLUMNS: &str =
    "id, group_id, sender_id, sender_name, content, media_url, media_public_id, kind, created_at";

impl GroupMessageLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a group message. The group must exist; the sender must be a
    /// member unless the entry is a system one (SYSTEM kind or the system
    /// sender sentinel). A missing sender name is filled from the directory.
    pub async fn save(&self, mut msg: GroupMessage) -> Result<GroupMessage> {
        let group_exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM groups WHERE id = ?")
                .bind(&msg.group_id)
                .fetch_optional(self.db.pool())
                .await?;
        if group_exists.is_none() {
            return Err(ChatError::NotFound(format!(
                "group {} not found",
                msg.group_id
            )));
        }

        let is_system = msg.kind == GroupMessageKind::System || msg.sender_id == SYSTEM_SENDER;
        if !is_system {
            let member: Option<(String,)> = sqlx::query_as(
                "SELECT user_id FROM group_members WHERE group_id = ? AND user_id = ?",
            )
            .bind(&msg.group_id)
            .bind(&msg.sender_id)
            .fetch_optional(self.db.pool())
            .await?;
            if member.is_none() {
                return Err(ChatError::PermissionDenied(
                    "sender is not a member of this group".into(),
                ));
            }

            if msg.sender_name.is_empty() {
                let full_name: Option<(String,)> =
                    sqlx::query_as("SELECT full_name FROM users WHERE username = ?")
                        .bind(&msg.sender_id)
                        .fetch_optional(self.db.pool())
                        .await?;
                if let Some((name,)) = full_name {
                    msg.sender_name = name;
                }
            }
        }

        sqlx::query(
            "INSERT INTO group_messages \
             (id, group_id, sender_id, sender_name, content, media_url, media_public_id, kind, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.group_id)
        .bind(&msg.sender_id)
        .bind(&msg.sender_name)
        .bind(&msg.content)
        .bind(&msg.media_url)
        .bind(&msg.media_public_id)
        .bind(msg.kind.as_str())
        .bind(encode_ts(msg.created_at))
        .execute(self.db.pool())
        .await?;

        info!("Group message {} saved to group {}", msg.id, msg.group_id);
        Ok(msg)
    }

    /// Full history ascending by time. The requester must be a member.
    pub async fn list(&self, group_id: &str, requester: &str) -> Result<Vec<GroupMessage>> {
        let group_exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM groups WHERE id = ?")
                .bind(group_id)
                .fetch_optional(self.db.pool())
                .await?;
        if group_exists.is_none() {
            return Err(ChatError::NotFound(format!("group {} not found", group_id)));
        }

        let member: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM group_members WHERE group_id = ? AND user_id = ?",
        )
        .bind(group_id)
        .bind(requester)
        .fetch_optional(self.db.pool())
        .await?;
        if member.is_none() {
            return Err(ChatError::PermissionDenied(
                "requester is not a member of this group".into(),
            ));
        }

        let rows: Vec<GroupMessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM group_messages \
             WHERE group_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await?;

        debug!("Found {} messages in group {}", rows.len(), group_id);
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    pub async fn last_message(&self, group_id: &str) -> Result<Option<GroupMessage>> {
        let row: Option<GroupMessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM group_messages \
             WHERE group_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(group_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(row_to_message))
    }

    pub async fn count(&self, group_id: &str) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM group_messages WHERE group_id = ?")
                .bind(group_id)
                .fetch_one(self.db.pool())
                .await?;
        Ok(count)
    }
}
