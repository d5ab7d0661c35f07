//! Media storage collaborator.
//!
//! Blob storage itself is external; the core only needs a delete hook for
//! the cascade that runs when a group is torn down.

use async_trait::async_trait;
use tracing::debug;

use crate::models::GroupMessageKind;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Remove a stored media object. Failures are logged by the caller and
    /// never abort the surrounding cascade.
    async fn delete(&self, public_id: &str, kind: GroupMessageKind) -> anyhow::Result<()>;
}

/// Resource class hint for backends that shelve images and av streams
/// separately.
pub fn resource_type(kind: GroupMessageKind) -> &'static str {
    match kind {
        GroupMessageKind::Image => "image",
        GroupMessageKind::Video | GroupMessageKind::Audio => "video",
        _ => "auto",
    }
}

/// Used when no media backend is configured.
pub struct NullMediaStore;

#[async_trait]
impl MediaStore for NullMediaStore {
    async fn delete(&self, public_id: &str, kind: GroupMessageKind) -> anyhow::Result<()> {
        debug!(
            "No media backend configured; skipping delete of {} ({})",
            public_id,
            resource_type(kind)
        );
        Ok(())
    }
}
