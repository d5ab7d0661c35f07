//! Fanout orchestration.
//!
//! Given an already-persisted message, the dispatcher consults the presence
//! registry and pushes to whoever is connected. Every push is best-effort:
//! the persisted state is the source of truth and a failed notification is
//! logged, never surfaced.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Result;
use crate::group::messages::GroupMessageLedger;
use crate::models::{
    ChatNotification, DirectMessage, Group, GroupMessage, GroupMessageNotification, GroupUpdate,
    MessageStatus,
};
use crate::presence::PresenceRegistry;
use crate::push::{
    PushTransport, CHANNEL_GROUP_MESSAGES, CHANNEL_GROUP_UPDATES, CHANNEL_MESSAGES, CHANNEL_STATUS,
};

#[derive(Clone)]
pub struct DeliveryDispatcher {
    presence: PresenceRegistry,
    transport: Arc<dyn PushTransport>,
}

impl DeliveryDispatcher {
    pub fn new(presence: PresenceRegistry, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            presence,
            transport,
        }
    }

    /// Presence read on the fanout path: errors degrade to "offline" so the
    /// pending status keeps its meaning.
    async fn online(&self, identity: &str) -> bool {
        match self.presence.is_online(identity).await {
            Ok(online) => online,
            Err(e) => {
                warn!("Presence check for {} failed, assuming offline: {}", identity, e);
                false
            }
        }
    }

    async fn push(&self, identity: &str, channel: &str, payload: &impl Serialize) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode push payload for {}: {}", identity, e);
                return;
            }
        };
        if let Err(e) = self.transport.send(identity, channel, payload).await {
            warn!("Push to {} on {} failed: {}", identity, channel, e);
        }
    }

    pub async fn broadcast_public(&self, payload: Value) {
        if let Err(e) = self.transport.broadcast_public(payload).await {
            warn!("Public broadcast failed: {}", e);
        }
    }

    /// Fanout for a freshly persisted direct message. An online recipient
    /// gets the message on their private channel and the sender gets a
    /// delivery receipt; an offline recipient relies on the stored SENT
    /// status and a later `fetch_undelivered`.
    pub async fn dispatch_direct(&self, msg: &DirectMessage) {
        if !self.online(&msg.recipient_id).await {
            info!(
                "Recipient {} offline, message {} held for later delivery",
                msg.recipient_id, msg.id
            );
            return;
        }

        self.push(&msg.recipient_id, CHANNEL_MESSAGES, &ChatNotification::incoming(msg))
            .await;
        self.push(
            &msg.sender_id,
            CHANNEL_STATUS,
            &ChatNotification::receipt(msg, MessageStatus::Delivered),
        )
        .await;
        info!("Message {} delivered to {}", msg.id, msg.recipient_id);
    }

    /// Delivery receipts for messages just drained by `fetch_undelivered`;
    /// only senders who are online right now hear about it.
    pub async fn confirm_delivery(&self, msgs: &[DirectMessage]) {
        for msg in msgs {
            if self.online(&msg.sender_id).await {
                self.push(
                    &msg.sender_id,
                    CHANNEL_STATUS,
                    &ChatNotification::receipt(msg, MessageStatus::Delivered),
                )
                .await;
            }
        }
    }

    /// Read receipts for the transitioned set returned by `mark_read`.
    pub async fn confirm_read(&self, msgs: &[DirectMessage]) {
        for msg in msgs {
            if self.online(&msg.sender_id).await {
                self.push(
                    &msg.sender_id,
                    CHANNEL_STATUS,
                    &ChatNotification::receipt(msg, MessageStatus::Read),
                )
                .await;
            }
        }
    }

    /// Push a persisted group message to every currently online member,
    /// including the sender (echo semantics). Offline members rely on pull
    /// on reconnect; there is no per-member pending queue for groups.
    pub async fn broadcast_group(&self, group: &Group, msg: &GroupMessage) {
        let notification = GroupMessageNotification::new(group, msg);
        let mut reached = 0usize;
        for member in &group.members {
            if self.online(member).await {
                self.push(member, CHANNEL_GROUP_MESSAGES, &notification).await;
                reached += 1;
            }
        }
        info!(
            "Group message {} broadcast to {}/{} members of {}",
            msg.id,
            reached,
            group.member_count(),
            group.id
        );
    }

    /// Structural notification on the distinct group-updates channel,
    /// carrying the updated group snapshot.
    pub async fn notify_group_change(&self, group: &Group, update: &GroupUpdate) {
        for member in &group.members {
            if self.online(member).await {
                self.push(member, CHANNEL_GROUP_UPDATES, update).await;
            }
        }
    }

    /// Targeted structural notification, e.g. telling a removed member they
    /// no longer belong to the group.
    pub async fn notify_user(&self, identity: &str, update: &GroupUpdate) {
        if self.online(identity).await {
            self.push(identity, CHANNEL_GROUP_UPDATES, update).await;
        }
    }

    /// Record a membership-change event: append a system entry to the
    /// ledger for the audit trail, then broadcast it like a normal message.
    /// The structural notification is emitted separately by the caller.
    pub async fn announce_group_event(
        &self,
        ledger: &GroupMessageLedger,
        group: &Group,
        content: String,
    ) -> Result<GroupMessage> {
        let entry = ledger.save(GroupMessage::system(&group.id, content)).await?;
        self.broadcast_group(group, &entry).await;
        Ok(entry)
    }
}
