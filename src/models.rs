use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Sentinel author for automated ledger entries. Messages carrying this
/// sender bypass group membership checks.
pub const SYSTEM_SENDER: &str = "SYSTEM";
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Binary online/offline state driving fanout decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "ONLINE",
            PresenceStatus::Offline => "OFFLINE",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "ONLINE" => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        }
    }
}

/// A registered identity with its presence record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub full_name: String,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

/// Canonical 1:1 channel keyed by an unordered identity pair.
/// `member_a < member_b` lexicographically; the id is derived from the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub member_a: String,
    pub member_b: String,
}

/// Delivery lifecycle of a direct message. Transitions are monotonic:
/// Sent -> Delivered -> Read, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "DELIVERED" => MessageStatus::Delivered,
            "READ" => MessageStatus::Read,
            _ => MessageStatus::Sent,
        }
    }
}

/// A 1:1 message. Immutable once created except `status`/`read_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupMessageKind {
    Text,
    Image,
    Video,
    Audio,
    System,
}

impl GroupMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupMessageKind::Text => "TEXT",
            GroupMessageKind::Image => "IMAGE",
            GroupMessageKind::Video => "VIDEO",
            GroupMessageKind::Audio => "AUDIO",
            GroupMessageKind::System => "SYSTEM",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "IMAGE" => GroupMessageKind::Image,
            "VIDEO" => GroupMessageKind::Video,
            "AUDIO" => GroupMessageKind::Audio,
            "SYSTEM" => GroupMessageKind::System,
            _ => GroupMessageKind::Text,
        }
    }
}

/// A group chat. Membership is never empty while the group exists; the
/// creator is always a member and admin at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: String,
    pub members: BTreeSet<String>,
    pub admins: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// A message in a group, ordered by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub media_url: Option<String>,
    pub media_public_id: Option<String>,
    pub kind: GroupMessageKind,
    pub created_at: DateTime<Utc>,
}

impl GroupMessage {
    pub fn new(
        group_id: impl Into<String>,
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        content: impl Into<String>,
        kind: GroupMessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            group_id: group_id.into(),
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            content: content.into(),
            media_url: None,
            media_public_id: None,
            kind,
            created_at: Utc::now(),
        }
    }

    /// Automated audit entry recording a structural event.
    pub fn system(group_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            group_id,
            SYSTEM_SENDER,
            SYSTEM_SENDER_NAME,
            content,
            GroupMessageKind::System,
        )
    }

    pub fn with_media(mut self, url: impl Into<String>, public_id: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self.media_public_id = Some(public_id.into());
        self
    }
}

/// Last instant a user is known to have viewed a group's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCursor {
    pub user_id: String,
    pub group_id: String,
    pub last_read_at: DateTime<Utc>,
}

/// Payload pushed over a recipient's private channel for direct messages
/// and status receipts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatNotification {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl ChatNotification {
    /// Full message pushed to the recipient.
    pub fn incoming(msg: &DirectMessage) -> Self {
        Self {
            id: msg.id.clone(),
            sender_id: msg.sender_id.clone(),
            recipient_id: msg.recipient_id.clone(),
            content: Some(msg.content.clone()),
            media_url: msg.media_url.clone(),
            status: MessageStatus::Delivered,
            created_at: msg.created_at,
            read_at: None,
        }
    }

    /// Content-free receipt pushed back to the original sender.
    pub fn receipt(msg: &DirectMessage, status: MessageStatus) -> Self {
        Self {
            id: msg.id.clone(),
            sender_id: msg.sender_id.clone(),
            recipient_id: msg.recipient_id.clone(),
            content: None,
            media_url: None,
            status,
            created_at: msg.created_at,
            read_at: msg.read_at,
        }
    }
}

/// Payload pushed to each online member when a group message is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMessageNotification {
    pub id: String,
    pub group_id: String,
    pub group_name: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub kind: GroupMessageKind,
    pub created_at: DateTime<Utc>,
}

impl GroupMessageNotification {
    pub fn new(group: &Group, msg: &GroupMessage) -> Self {
        Self {
            id: msg.id.clone(),
            group_id: msg.group_id.clone(),
            group_name: group.name.clone(),
            sender_id: msg.sender_id.clone(),
            sender_name: msg.sender_name.clone(),
            content: msg.content.clone(),
            media_url: msg.media_url.clone(),
            kind: msg.kind,
            created_at: msg.created_at,
        }
    }
}

/// Structural notification emitted on the group-updates channel, separate
/// from the message broadcast, carrying the updated group snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupUpdate {
    GroupCreated { group: Group },
    MembersAdded { group: Group },
    MemberRemoved { group: Group },
    RemovedFromGroup { group_id: String },
    MemberLeft { group: Group },
    GroupUpdated { group: Group },
    GroupDeleted { group_id: String },
}

/// Member listing entry with role flags resolved.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMemberInfo {
    pub username: String,
    pub full_name: Option<String>,
    pub status: PresenceStatus,
    pub is_admin: bool,
    pub is_creator: bool,
}

/// Sidebar entry for a 1:1 chat partner.
#[derive(Debug, Clone, Serialize)]
pub struct ChatContact {
    pub username: String,
    pub full_name: Option<String>,
    pub status: PresenceStatus,
    pub last_message: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

/// Sidebar entry for a group the user belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct GroupOverview {
    #[serde(flatten)]
    pub group: Group,
    pub member_count: usize,
    pub last_message: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}
