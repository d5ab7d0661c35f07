//! Maps an unordered identity pair to one canonical conversation id.
//!
//! The id is a deterministic function of the sorted pair, so
//! `resolve(a, b)` and `resolve(b, a)` always agree. Creation is an
//! idempotent find-or-create guarded by the primary-key constraint on the
//! canonical id; two simultaneous first-sends converge on a single row.

use tracing::info;

use crate::error::{ChatError, Result};
use crate::models::Conversation;
use crate::store::Database;

/// Order the pair canonically. Both orderings of the same two identities
/// produce the same result.
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

pub fn conversation_id(a: &str, b: &str) -> String {
    let (first, second) = canonical_pair(a, b);
    format!("{}_{}", first, second)
}

#[derive(Clone)]
pub struct ConversationResolver {
    db: Database,
}

impl ConversationResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve the conversation for an identity pair. Returns `None` when the
    /// conversation does not exist and `create_if_absent` is false.
    pub async fn resolve(
        &self,
        a: &str,
        b: &str,
        create_if_absent: bool,
    ) -> Result<Option<String>> {
        if a.trim().is_empty() || b.trim().is_empty() {
            return Err(ChatError::ValidationFailed(
                "conversation members cannot be blank".into(),
            ));
        }

        let (member_a, member_b) = canonical_pair(a, b);
        let id = format!("{}_{}", member_a, member_b);

        // Two passes: a concurrent first-send may win the insert race, in
        // which case the second select finds its row.
        for _ in 0..2 {
            let existing: Option<(String,)> =
                sqlx::query_as("SELECT id FROM conversations WHERE id = ?")
                    .bind(&id)
                    .fetch_optional(self.db.pool())
                    .await?;

            if let Some((found,)) = existing {
                return Ok(Some(found));
            }
            if !create_if_absent {
                return Ok(None);
            }

            let inserted = sqlx::query(
                "INSERT INTO conversations (id, member_a, member_b) VALUES (?, ?, ?) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&id)
            .bind(&member_a)
            .bind(&member_b)
            .execute(self.db.pool())
            .await?
            .rows_affected();

            if inserted > 0 {
                info!("Created conversation {} for {} and {}", id, member_a, member_b);
                return Ok(Some(id));
            }
            // Lost the race; loop back and re-select. Falling out of the
            // loop means the row vanished between checks, surfaced as a
            // retryable conflict.
        }

        Err(ChatError::Conflict)
    }

    pub async fn find(&self, id: &str) -> Result<Option<Conversation>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, member_a, member_b FROM conversations WHERE id = ?")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(row.map(|(id, member_a, member_b)| Conversation {
            id,
            member_a,
            member_b,
        }))
    }

    /// All conversations an identity participates in.
    pub async fn for_user(&self, user: &str) -> Result<Vec<Conversation>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT id, member_a, member_b FROM conversations \
             WHERE member_a = ? OR member_b = ?",
        )
        .bind(user)
        .bind(user)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, member_a, member_b)| Conversation {
                id,
                member_a,
                member_b,
            })
            .collect())
    }
}
