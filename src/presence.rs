//! Per-identity online/offline tracking plus the user directory.
//!
//! Presence reads always hit the committed row; there is no cache. Connect
//! and disconnect are idempotent and never auto-create accounts.

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{ChatError, Result};
use crate::models::{PresenceStatus, User};
use crate::store::{decode_ts, encode_ts, Database};

#[derive(Clone)]
pub struct PresenceRegistry {
    db: Database,
}

type UserRow = (String, String, String, String);

fn row_to_user((username, full_name, status, last_seen): UserRow) -> User {
    User {
        username,
        full_name,
        status: PresenceStatus::from_db(&status),
        last_seen: decode_ts(&last_seen),
    }
}

impl PresenceRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register an identity. Presence operations are no-ops for identities
    /// that were never registered.
    pub async fn register(&self, username: &str, full_name: &str) -> Result<User> {
        if username.trim().is_empty() {
            return Err(ChatError::ValidationFailed(
                "username cannot be blank".into(),
            ));
        }
        if self.find(username).await?.is_some() {
            return Err(ChatError::ValidationFailed(format!(
                "username {} is already taken",
                username
            )));
        }

        let user = User {
            username: username.trim().to_string(),
            full_name: full_name.trim().to_string(),
            status: PresenceStatus::Offline,
            last_seen: Utc::now(),
        };

        sqlx::query("INSERT INTO users (username, full_name, status, last_seen) VALUES (?, ?, ?, ?)")
            .bind(&user.username)
            .bind(&user.full_name)
            .bind(user.status.as_str())
            .bind(encode_ts(user.last_seen))
            .execute(self.db.pool())
            .await?;

        info!("Registered user {}", user.username);
        Ok(user)
    }

    pub async fn find(&self, username: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT username, full_name, status, last_seen FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(row_to_user))
    }

    pub async fn set_online(&self, username: &str) -> Result<()> {
        self.set_status(username, PresenceStatus::Online).await
    }

    pub async fn set_offline(&self, username: &str) -> Result<()> {
        self.set_status(username, PresenceStatus::Offline).await
    }

    async fn set_status(&self, username: &str, status: PresenceStatus) -> Result<()> {
        let updated = sqlx::query("UPDATE users SET status = ?, last_seen = ? WHERE username = ?")
            .bind(status.as_str())
            .bind(encode_ts(Utc::now()))
            .bind(username)
            .execute(self.db.pool())
            .await?
            .rows_affected();

        if updated == 0 {
            debug!("Presence update for unknown identity {} ignored", username);
        } else {
            info!("User {} is now {}", username, status.as_str());
        }
        Ok(())
    }

    /// Unknown identities are reported offline.
    pub async fn is_online(&self, username: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row
            .map(|(status,)| PresenceStatus::from_db(&status) == PresenceStatus::Online)
            .unwrap_or(false))
    }

    pub async fn connected_users(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT username, full_name, status, last_seen FROM users \
             WHERE status = 'ONLINE' ORDER BY username",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(row_to_user).collect())
    }

    pub async fn all_users(&self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT username, full_name, status, last_seen FROM users ORDER BY username",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(row_to_user).collect())
    }

    pub async fn search(&self, query: &str) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT username, full_name, status, last_seen FROM users \
             WHERE username LIKE ? COLLATE NOCASE ORDER BY username",
        )
        .bind(format!("%{}%", query))
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(row_to_user).collect())
    }
}
