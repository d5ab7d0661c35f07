//! Direct-message ledger: the append-mostly record of 1:1 messages and the
//! SENT -> DELIVERED -> READ state machine.
//!
//! The initial status of a message is a one-time snapshot of the recipient's
//! presence at send time and is never re-evaluated. `fetch_undelivered` and
//! `mark_read` are read-then-write without locks: concurrent invocations may
//! lose an update, but the target states are idempotent.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::ConversationResolver;
use crate::error::{ChatError, Result};
use crate::models::{ChatContact, DirectMessage, MessageStatus, PresenceStatus};
use crate::presence::PresenceRegistry;
use crate::store::{decode_ts, decode_ts_opt, encode_ts, Database};

#[derive(Clone)]
pub struct MessageLedger {
    db: Database,
    conversations: ConversationResolver,
    presence: PresenceRegistry,
}

type MessageRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
);

fn row_to_message(row: MessageRow) -> DirectMessage {
    let (id, conversation_id, sender_id, recipient_id, content, media_url, created_at, read_at, status) =
        row;
    DirectMessage {
        id,
        conversation_id,
        sender_id,
        recipient_id,
        content,
        media_url,
        created_at: decode_ts(&created_at),
        read_at: decode_ts_opt(read_at.as_deref()),
        status: MessageStatus::from_db(&status),
    }
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, recipient_id, content, media_url, created_at, read_at, status";

impl MessageLedger {
    pub fn new(db: Database, conversations: ConversationResolver, presence: PresenceRegistry) -> Self {
        Self {
            db,
            conversations,
            presence,
        }
    }

    /// Persist a direct message. The conversation is resolved (created on
    /// first use) before the message row exists; initial status is
    /// DELIVERED iff the recipient is online right now.
    pub async fn send(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        media_url: Option<String>,
    ) -> Result<DirectMessage> {
        if content.trim().is_empty() && media_url.is_none() {
            return Err(ChatError::ValidationFailed(
                "message content cannot be blank".into(),
            ));
        }

        let conversation_id = self
            .conversations
            .resolve(sender, recipient, true)
            .await?
            .ok_or(ChatError::Conflict)?;

        let status = if self.presence.is_online(recipient).await? {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        };

        let msg = DirectMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            sender_id: sender.to_string(),
            recipient_id: recipient.to_string(),
            content: content.to_string(),
            media_url,
            created_at: Utc::now(),
            read_at: None,
            status,
        };

        sqlx::query(
            "INSERT INTO direct_messages \
             (id, conversation_id, sender_id, recipient_id, content, media_url, created_at, read_at, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(&msg.sender_id)
        .bind(&msg.recipient_id)
        .bind(&msg.content)
        .bind(&msg.media_url)
        .bind(encode_ts(msg.created_at))
        .bind(msg.status.as_str())
        .execute(self.db.pool())
        .await?;

        info!(
            "Message {} saved ({} -> {}, status {})",
            msg.id,
            msg.sender_id,
            msg.recipient_id,
            msg.status.as_str()
        );
        Ok(msg)
    }

    /// Full history between two identities in arrival order. An unknown
    /// conversation is not an error and yields an empty list.
    pub async fn find_messages(&self, a: &str, b: &str) -> Result<Vec<DirectMessage>> {
        let Some(conversation_id) = self.conversations.resolve(a, b, false).await? else {
            debug!("No conversation between {} and {}", a, b);
            return Ok(Vec::new());
        };

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM direct_messages \
             WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&conversation_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    /// Messages addressed to `user` that were sent while they were offline.
    /// Each is transitioned to DELIVERED; the returned snapshot keeps the
    /// pre-mutation SENT status so callers can tell which rows were pending.
    pub async fn fetch_undelivered(&self, user: &str) -> Result<Vec<DirectMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM direct_messages \
             WHERE recipient_id = ? AND status = 'SENT' ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(user)
        .fetch_all(self.db.pool())
        .await?;

        let pending: Vec<DirectMessage> = rows.into_iter().map(row_to_message).collect();

        for msg in &pending {
            sqlx::query("UPDATE direct_messages SET status = 'DELIVERED' WHERE id = ? AND status = 'SENT'")
                .bind(&msg.id)
                .execute(self.db.pool())
                .await?;
        }

        if !pending.is_empty() {
            info!("Marked {} messages DELIVERED for {}", pending.len(), user);
        }
        Ok(pending)
    }

    /// Transition every message in the pair's conversation addressed to
    /// `recipient` that is not yet READ. Returns exactly the transitioned
    /// set; invoking again immediately yields an empty list.
    pub async fn mark_read(&self, sender: &str, recipient: &str) -> Result<Vec<DirectMessage>> {
        let Some(conversation_id) = self.conversations.resolve(sender, recipient, false).await?
        else {
            return Ok(Vec::new());
        };

        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM direct_messages \
             WHERE conversation_id = ? AND recipient_id = ? AND status != 'READ' \
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&conversation_id)
        .bind(recipient)
        .fetch_all(self.db.pool())
        .await?;

        let read_at = Utc::now();
        let mut transitioned = Vec::with_capacity(rows.len());
        for row in rows {
            let mut msg = row_to_message(row);
            sqlx::query("UPDATE direct_messages SET status = 'READ', read_at = ? WHERE id = ?")
                .bind(encode_ts(read_at))
                .bind(&msg.id)
                .execute(self.db.pool())
                .await?;
            msg.status = MessageStatus::Read;
            msg.read_at = Some(read_at);
            transitioned.push(msg);
        }

        info!(
            "Marked {} messages READ ({} -> {})",
            transitioned.len(),
            sender,
            recipient
        );
        Ok(transitioned)
    }

    /// Unread count for messages from `sender` addressed to `recipient`.
    pub async fn count_unread(&self, recipient: &str, sender: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM direct_messages \
             WHERE recipient_id = ? AND sender_id = ? AND status != 'READ'",
        )
        .bind(recipient)
        .bind(sender)
        .fetch_one(self.db.pool())
        .await?;

        Ok(count)
    }

    /// Chat partners of `user` with last-message and unread summaries,
    /// most recent activity first.
    pub async fn chat_contacts(&self, user: &str) -> Result<Vec<ChatContact>> {
        let conversations = self.conversations.for_user(user).await?;
        let mut contacts = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let partner = if conversation.member_a == user {
                conversation.member_b.clone()
            } else {
                conversation.member_a.clone()
            };

            let last: Option<(String, String, String)> = sqlx::query_as(
                "SELECT content, sender_id, created_at FROM direct_messages \
                 WHERE conversation_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
            )
            .bind(&conversation.id)
            .fetch_optional(self.db.pool())
            .await?;

            let unread_count = self.count_unread(user, &partner).await?;
            let partner_user = self.presence.find(&partner).await?;

            let (last_message, last_message_sender, last_message_at) = match last {
                Some((content, sender_id, created_at)) => {
                    (Some(content), Some(sender_id), Some(decode_ts(&created_at)))
                }
                None => (None, None, None),
            };

            contacts.push(ChatContact {
                username: partner,
                full_name: partner_user.as_ref().map(|u| u.full_name.clone()),
                status: partner_user
                    .map(|u| u.status)
                    .unwrap_or(PresenceStatus::Offline),
                last_message,
                last_message_sender,
                last_message_at,
                unread_count,
            });
        }

        contacts.sort_by(|a, b| match (&b.last_message_at, &a.last_message_at) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (None, None) => std::cmp::Ordering::Equal,
        });

        Ok(contacts)
    }
}
