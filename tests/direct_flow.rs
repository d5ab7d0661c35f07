//! Direct-message lifecycle: conversation identity, presence-dependent
//! initial status, delivery on reconnect, and read receipts.

mod common;

use nexus_server::models::MessageStatus;
use nexus_server::push::{CHANNEL_MESSAGES, CHANNEL_STATUS};

#[tokio::test]
async fn resolve_is_order_insensitive_and_idempotent() {
    let s = common::setup().await;

    let ab = s
        .conversations
        .resolve("alice", "bob", true)
        .await
        .unwrap()
        .unwrap();
    let ba = s
        .conversations
        .resolve("bob", "alice", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ab, ba);

    // Repeated resolution never mints a second id.
    let again = s
        .conversations
        .resolve("alice", "bob", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ab, again);

    let found = s
        .conversations
        .resolve("bob", "alice", false)
        .await
        .unwrap();
    assert_eq!(found, Some(ab));
}

#[tokio::test]
async fn resolve_without_create_returns_none() {
    let s = common::setup().await;
    let missing = s
        .conversations
        .resolve("nobody", "noone", false)
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn unknown_conversation_history_is_empty() {
    let s = common::setup().await;
    let history = s.messages.find_messages("alice", "bob").await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn presence_ignores_unknown_identities() {
    let s = common::setup().await;

    assert!(!s.presence.is_online("ghost").await.unwrap());
    // No-op, never auto-creates an account.
    s.presence.set_online("ghost").await.unwrap();
    assert!(!s.presence.is_online("ghost").await.unwrap());
    assert!(s.presence.find("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn send_to_offline_recipient_stays_pending() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    let msg = s
        .messages
        .send("alice", "bob", "hello there", None)
        .await
        .unwrap();
    assert_eq!(msg.status, MessageStatus::Sent);

    s.dispatcher.dispatch_direct(&msg).await;
    assert!(s.transport.sent_to("bob", CHANNEL_MESSAGES).is_empty());
    assert!(s.transport.sent_to("alice", CHANNEL_STATUS).is_empty());
}

#[tokio::test]
async fn send_to_online_recipient_is_delivered_and_pushed() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;
    s.presence.set_online("bob").await.unwrap();

    let msg = s.messages.send("alice", "bob", "hi bob", None).await.unwrap();
    assert_eq!(msg.status, MessageStatus::Delivered);

    s.dispatcher.dispatch_direct(&msg).await;

    let to_bob = s.transport.sent_to("bob", CHANNEL_MESSAGES);
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0]["content"], "hi bob");

    let receipts = s.transport.sent_to("alice", CHANNEL_STATUS);
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["status"], "DELIVERED");
}

#[tokio::test]
async fn fetch_undelivered_transitions_and_drains() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    s.messages.send("alice", "bob", "one", None).await.unwrap();
    s.messages.send("alice", "bob", "two", None).await.unwrap();

    let pending = s.messages.fetch_undelivered("bob").await.unwrap();
    assert_eq!(pending.len(), 2);
    // Snapshot keeps the pre-mutation status.
    assert!(pending.iter().all(|m| m.status == MessageStatus::Sent));

    // Persisted state moved on.
    let history = s.messages.find_messages("alice", "bob").await.unwrap();
    assert!(history.iter().all(|m| m.status == MessageStatus::Delivered));

    // Drained: a second fetch sees nothing.
    let empty = s.messages.fetch_undelivered("bob").await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    s.messages.send("alice", "bob", "one", None).await.unwrap();
    s.messages.send("alice", "bob", "two", None).await.unwrap();

    let transitioned = s.messages.mark_read("alice", "bob").await.unwrap();
    assert_eq!(transitioned.len(), 2);
    assert!(transitioned
        .iter()
        .all(|m| m.status == MessageStatus::Read && m.read_at.is_some()));

    let second = s.messages.mark_read("alice", "bob").await.unwrap();
    assert!(second.is_empty());

    let history = s.messages.find_messages("alice", "bob").await.unwrap();
    assert!(history.iter().all(|m| m.status == MessageStatus::Read));
}

#[tokio::test]
async fn count_unread_excludes_read_messages() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    s.messages.send("alice", "bob", "one", None).await.unwrap();
    s.messages.send("alice", "bob", "two", None).await.unwrap();
    assert_eq!(s.messages.count_unread("bob", "alice").await.unwrap(), 2);

    s.messages.mark_read("alice", "bob").await.unwrap();
    assert_eq!(s.messages.count_unread("bob", "alice").await.unwrap(), 0);
}

#[tokio::test]
async fn blank_message_is_rejected() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    let err = s.messages.send("alice", "bob", "   ", None).await;
    assert!(matches!(
        err,
        Err(nexus_server::error::ChatError::ValidationFailed(_))
    ));
}

/// The full offline-to-read scenario: alice messages offline bob, bob
/// reconnects and drains the backlog, then reads; alice hears about each
/// transition while she is online.
#[tokio::test]
async fn offline_delivery_and_read_receipt_flow() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;
    s.presence.set_online("alice").await.unwrap();

    let msg = s.messages.send("alice", "bob", "hi", None).await.unwrap();
    assert_eq!(msg.status, MessageStatus::Sent);
    s.dispatcher.dispatch_direct(&msg).await;
    assert!(s.transport.sent_to("bob", CHANNEL_MESSAGES).is_empty());

    // Bob connects and pulls what accumulated.
    s.presence.set_online("bob").await.unwrap();
    let pending = s.messages.fetch_undelivered("bob").await.unwrap();
    s.dispatcher.confirm_delivery(&pending).await;

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].content, "hi");

    let receipts = s.transport.sent_to("alice", CHANNEL_STATUS);
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0]["status"], "DELIVERED");

    // Bob reads the conversation.
    let read = s.messages.mark_read("alice", "bob").await.unwrap();
    s.dispatcher.confirm_read(&read).await;

    assert_eq!(read.len(), 1);
    assert!(read[0].read_at.is_some());

    let receipts = s.transport.sent_to("alice", CHANNEL_STATUS);
    assert_eq!(receipts.len(), 2);
    assert_eq!(receipts[1]["status"], "READ");
}

#[tokio::test]
async fn chat_contacts_summarize_conversations() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob", "carol"]).await;

    s.messages.send("bob", "alice", "from bob", None).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    s.messages.send("carol", "alice", "from carol", None).await.unwrap();

    let contacts = s.messages.chat_contacts("alice").await.unwrap();
    assert_eq!(contacts.len(), 2);
    // Most recent activity first.
    assert_eq!(contacts[0].username, "carol");
    assert_eq!(contacts[0].unread_count, 1);
    assert_eq!(contacts[1].username, "bob");
    assert_eq!(contacts[1].last_message.as_deref(), Some("from bob"));
}
