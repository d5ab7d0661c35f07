//! Group entity lifecycle: creation, membership, admin roles, update,
//! deletion, and the emptying-leave cascade.

pub mod cursor;
pub mod messages;

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::media::MediaStore;
use crate::models::{Group, GroupMemberInfo, GroupMessageKind, PresenceStatus};
use crate::store::{decode_ts, encode_ts, Database};

#[derive(Clone)]
pub struct GroupRegistry {
    db: Database,
    media: Arc<dyn MediaStore>,
}

type GroupRow = (String, String, Option<String>, String, String, String);

impl GroupRegistry {
    pub fn new(db: Database, media: Arc<dyn MediaStore>) -> Self {
        Self { db, media }
    }

    /// Create a group. The creator is forced into the member and admin sets
    /// regardless of the initial member list; duplicates collapse by set
    /// semantics.
    pub async fn create(
        &self,
        creator: &str,
        name: &str,
        description: Option<&str>,
        initial_members: &[String],
    ) -> Result<Group> {
        if name.trim().is_empty() {
            return Err(ChatError::ValidationFailed(
                "group name cannot be blank".into(),
            ));
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let description = description
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        sqlx::query(
            "INSERT INTO groups (id, name, description, creator_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name.trim())
        .bind(&description)
        .bind(creator)
        .bind(encode_ts(now))
        .bind(encode_ts(now))
        .execute(self.db.pool())
        .await?;

        let mut members: BTreeSet<String> = initial_members.iter().cloned().collect();
        members.insert(creator.to_string());

        for member in &members {
            let is_admin = member == creator;
            sqlx::query(
                "INSERT INTO group_members (group_id, user_id, is_admin) VALUES (?, ?, ?) \
                 ON CONFLICT (group_id, user_id) DO NOTHING",
            )
            .bind(&id)
            .bind(member)
            .bind(is_admin as i32)
            .execute(self.db.pool())
            .await?;
        }

        info!("Group {} created by {} with {} members", id, creator, members.len());
        self.require(&id).await
    }

    pub async fn find(&self, group_id: &str) -> Result<Option<Group>> {
        let row: Option<GroupRow> = sqlx::query_as(
            "SELECT id, name, description, creator_id, created_at, updated_at \
             FROM groups WHERE id = ?",
        )
        .bind(group_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((id, name, description, creator_id, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let member_rows: Vec<(String, i32)> =
            sqlx::query_as("SELECT user_id, is_admin FROM group_members WHERE group_id = ?")
                .bind(&id)
                .fetch_all(self.db.pool())
                .await?;

        let mut members = BTreeSet::new();
        let mut admins = BTreeSet::new();
        for (user_id, is_admin) in member_rows {
            if is_admin != 0 {
                admins.insert(user_id.clone());
            }
            members.insert(user_id);
        }

        Ok(Some(Group {
            id,
            name,
            description,
            creator_id,
            members,
            admins,
            created_at: decode_ts(&created_at),
            updated_at: decode_ts(&updated_at),
        }))
    }

    pub async fn require(&self, group_id: &str) -> Result<Group> {
        self.find(group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("group {} not found", group_id)))
    }

    /// Any current member may invite new members.
    pub async fn add_members(
        &self,
        group_id: &str,
        requester: &str,
        member_ids: &[String],
    ) -> Result<Group> {
        let group = self.require(group_id).await?;
        if !group.is_member(requester) {
            return Err(ChatError::PermissionDenied(
                "only members can add others to a group".into(),
            ));
        }

        for member in member_ids {
            sqlx::query(
                "INSERT INTO group_members (group_id, user_id, is_admin) VALUES (?, ?, 0) \
                 ON CONFLICT (group_id, user_id) DO NOTHING",
            )
            .bind(group_id)
            .bind(member)
            .execute(self.db.pool())
            .await?;
        }
        self.touch(group_id).await?;

        info!("Added {} members to group {}", member_ids.len(), group_id);
        self.require(group_id).await
    }

    /// Admins may remove anyone; non-admins may only remove themselves.
    pub async fn remove_member(
        &self,
        group_id: &str,
        requester: &str,
        member_id: &str,
    ) -> Result<Group> {
        let group = self.require(group_id).await?;
        if !group.is_admin(requester) && requester != member_id {
            return Err(ChatError::PermissionDenied(
                "only admins can remove other members".into(),
            ));
        }

        sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(member_id)
            .execute(self.db.pool())
            .await?;
        self.touch(group_id).await?;

        info!("Removed member {} from group {}", member_id, group_id);
        self.require(group_id).await
    }

    /// Remove `user` from the group. When the membership empties, the group
    /// and everything hanging off it (messages, media, read cursors) is
    /// deleted. Returns the surviving group, or `None` when it was deleted.
    pub async fn leave(&self, group_id: &str, user: &str) -> Result<Option<Group>> {
        self.require(group_id).await?;

        sqlx::query("DELETE FROM group_members WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user)
            .execute(self.db.pool())
            .await?;

        let (remaining,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM group_members WHERE group_id = ?")
                .bind(group_id)
                .fetch_one(self.db.pool())
                .await?;

        if remaining == 0 {
            self.cascade_delete(group_id).await;
            info!("Group {} deleted as last member left", group_id);
            return Ok(None);
        }

        self.touch(group_id).await?;
        info!("User {} left group {}", user, group_id);
        Ok(Some(self.require(group_id).await?))
    }

    /// Admins only. A blank name is rejected; a blank description clears it.
    pub async fn update(
        &self,
        group_id: &str,
        requester: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Group> {
        let group = self.require(group_id).await?;
        if !group.is_admin(requester) {
            return Err(ChatError::PermissionDenied(
                "only admins can update group details".into(),
            ));
        }

        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                return Err(ChatError::ValidationFailed(
                    "group name cannot be blank".into(),
                ));
            }
            sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
                .bind(name)
                .bind(group_id)
                .execute(self.db.pool())
                .await?;
        }
        if let Some(description) = description {
            let trimmed = description.trim();
            let value = (!trimmed.is_empty()).then_some(trimmed);
            sqlx::query("UPDATE groups SET description = ? WHERE id = ?")
                .bind(value)
                .bind(group_id)
                .execute(self.db.pool())
                .await?;
        }
        self.touch(group_id).await?;

        self.require(group_id).await
    }

    /// Only the creator may delete a group outright.
    pub async fn delete(&self, group_id: &str, requester: &str) -> Result<()> {
        let group = self.require(group_id).await?;
        if group.creator_id != requester {
            return Err(ChatError::PermissionDenied(
                "only the group creator can delete the group".into(),
            ));
        }

        if let Err(e) = sqlx::query("DELETE FROM group_members WHERE group_id = ?")
            .bind(group_id)
            .execute(self.db.pool())
            .await
        {
            warn!("Failed to clear membership of group {}: {}", group_id, e);
        }
        self.cascade_delete(group_id).await;

        info!("Group {} deleted by creator {}", group_id, requester);
        Ok(())
    }

    /// Best-effort cascade over the group's subsidiary aggregates. Partial
    /// failures are logged, never surfaced: the membership change that
    /// triggered the cascade has already committed. The final delete is
    /// guarded so a concurrent add_members that repopulated the group aborts
    /// the cascade instead of orphaning the new member.
    async fn cascade_delete(&self, group_id: &str) {
        let media_refs: std::result::Result<Vec<(String, String)>, sqlx::Error> = sqlx::query_as(
            "SELECT media_public_id, kind FROM group_messages \
             WHERE group_id = ? AND media_public_id IS NOT NULL",
        )
        .bind(group_id)
        .fetch_all(self.db.pool())
        .await;

        match media_refs {
            Ok(refs) => {
                for (public_id, kind) in refs {
                    let kind = GroupMessageKind::from_db(&kind);
                    if let Err(e) = self.media.delete(&public_id, kind).await {
                        warn!("Failed to delete media {}: {}", public_id, e);
                    }
                }
            }
            Err(e) => warn!("Failed to enumerate media for group {}: {}", group_id, e),
        }

        if let Err(e) = sqlx::query("DELETE FROM group_messages WHERE group_id = ?")
            .bind(group_id)
            .execute(self.db.pool())
            .await
        {
            warn!("Failed to delete messages of group {}: {}", group_id, e);
        }

        if let Err(e) = sqlx::query("DELETE FROM read_cursors WHERE group_id = ?")
            .bind(group_id)
            .execute(self.db.pool())
            .await
        {
            warn!("Failed to delete read cursors of group {}: {}", group_id, e);
        }

        match sqlx::query(
            "DELETE FROM groups WHERE id = ? \
             AND NOT EXISTS (SELECT 1 FROM group_members WHERE group_id = ?)",
        )
        .bind(group_id)
        .bind(group_id)
        .execute(self.db.pool())
        .await
        {
            Ok(done) if done.rows_affected() == 0 => {
                warn!(
                    "Cascade delete of group {} aborted: membership repopulated concurrently",
                    group_id
                );
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to delete group {}: {}", group_id, e),
        }
    }

    /// Groups the user belongs to.
    pub async fn list_for_user(&self, user: &str) -> Result<Vec<Group>> {
        let ids: Vec<(String,)> =
            sqlx::query_as("SELECT group_id FROM group_members WHERE user_id = ?")
                .bind(user)
                .fetch_all(self.db.pool())
                .await?;

        let mut groups = Vec::with_capacity(ids.len());
        for (id,) in ids {
            if let Some(group) = self.find(&id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Member listing with role flags and directory details resolved.
    pub async fn members_of(&self, group_id: &str) -> Result<Vec<GroupMemberInfo>> {
        let group = self.require(group_id).await?;

        let mut members = Vec::with_capacity(group.members.len());
        for username in &group.members {
            let directory: Option<(String, String)> =
                sqlx::query_as("SELECT full_name, status FROM users WHERE username = ?")
                    .bind(username)
                    .fetch_optional(self.db.pool())
                    .await?;

            let (full_name, status) = match directory {
                Some((full_name, status)) => {
                    (Some(full_name), PresenceStatus::from_db(&status))
                }
                None => (None, PresenceStatus::Offline),
            };

            members.push(GroupMemberInfo {
                username: username.clone(),
                full_name,
                status,
                is_admin: group.is_admin(username),
                is_creator: group.creator_id == *username,
            });
        }
        Ok(members)
    }

    async fn touch(&self, group_id: &str) -> Result<()> {
        sqlx::query("UPDATE groups SET updated_at = ? WHERE id = ?")
            .bind(encode_ts(Utc::now()))
            .bind(group_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
