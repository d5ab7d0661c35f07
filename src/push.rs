//! Push transport seam.
//!
//! The core addresses recipients explicitly: a private `send` per identity
//! plus one public broadcast channel. `ChannelTransport` is the in-process
//! implementation feeding the WebSocket layer; tests substitute their own.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Private channel names multiplexed over a single identity connection.
pub const CHANNEL_MESSAGES: &str = "messages";
pub const CHANNEL_STATUS: &str = "status";
pub const CHANNEL_GROUP_MESSAGES: &str = "group-messages";
pub const CHANNEL_GROUP_UPDATES: &str = "group-updates";
pub const CHANNEL_PUBLIC: &str = "public";

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Deliver a payload on one identity's private channel. Best-effort:
    /// callers log failures and never roll back on them.
    async fn send(&self, identity: &str, channel: &str, payload: Value) -> anyhow::Result<()>;

    /// Deliver a payload to every connected identity.
    async fn broadcast_public(&self, payload: Value) -> anyhow::Result<()>;
}

/// One frame on the wire: which logical channel it belongs to, plus payload.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub payload: Value,
}

/// In-process transport over per-identity tokio broadcast channels.
pub struct ChannelTransport {
    capacity: usize,
    private: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    public: broadcast::Sender<Envelope>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        let (public, _) = broadcast::channel(capacity);
        Self {
            capacity,
            private: RwLock::new(HashMap::new()),
            public,
        }
    }

    /// Subscribe to an identity's private stream, creating the channel on
    /// first use. A broadcast receiver only sees frames sent after it
    /// subscribes, so there is no point materializing a channel on send.
    pub async fn subscribe(&self, identity: &str) -> broadcast::Receiver<Envelope> {
        {
            let private = self.private.read().await;
            if let Some(tx) = private.get(identity) {
                return tx.subscribe();
            }
        }

        let mut private = self.private.write().await;
        private
            .entry(identity.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscribe_public(&self) -> broadcast::Receiver<Envelope> {
        self.public.subscribe()
    }

    /// Drop the identity's channel entry unless a receiver reappeared since
    /// the failed send. Keeps the map bounded by live connections instead of
    /// every identity ever addressed.
    async fn evict_if_idle(&self, identity: &str) {
        let mut private = self.private.write().await;
        if let Some(tx) = private.get(identity) {
            if tx.receiver_count() == 0 {
                private.remove(identity);
            }
        }
    }
}

#[async_trait]
impl PushTransport for ChannelTransport {
    async fn send(&self, identity: &str, channel: &str, payload: Value) -> anyhow::Result<()> {
        let tx = {
            let private = self.private.read().await;
            private.get(identity).cloned()
        };

        // A send with no live receivers is not a failure; the recipient
        // simply has no open connection.
        if let Some(tx) = tx {
            let sent = tx.send(Envelope {
                channel: channel.to_string(),
                payload,
            });
            if sent.is_err() {
                self.evict_if_idle(identity).await;
            }
        }
        Ok(())
    }

    async fn broadcast_public(&self, payload: Value) -> anyhow::Result<()> {
        let _ = self.public.send(Envelope {
            channel: CHANNEL_PUBLIC.to_string(),
            payload,
        });
        Ok(())
    }
}
