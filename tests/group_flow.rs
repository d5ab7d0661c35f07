//! Group lifecycle: membership rules, the emptying-leave cascade, system
//! audit entries, read cursors, and broadcast fanout.

mod common;

use std::time::Duration;
use tokio::time::sleep;

use nexus_server::error::ChatError;
use nexus_server::models::{GroupMessage, GroupMessageKind, SYSTEM_SENDER};
use nexus_server::push::CHANNEL_GROUP_MESSAGES;

#[tokio::test]
async fn create_forces_creator_into_members_and_admins() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    // Creator listed twice in the initial members; sets collapse it.
    let group = s
        .groups
        .create(
            "alice",
            "Book Club",
            Some("weekly reads"),
            &["bob".into(), "alice".into(), "alice".into()],
        )
        .await
        .unwrap();

    assert_eq!(group.member_count(), 2);
    assert!(group.is_member("alice"));
    assert!(group.is_member("bob"));
    assert!(group.is_admin("alice"));
    assert!(!group.is_admin("bob"));
    assert_eq!(group.creator_id, "alice");
    assert_eq!(group.description.as_deref(), Some("weekly reads"));
}

#[tokio::test]
async fn blank_group_name_is_rejected() {
    let s = common::setup().await;
    let err = s.groups.create("alice", "  ", None, &[]).await;
    assert!(matches!(err, Err(ChatError::ValidationFailed(_))));
}

#[tokio::test]
async fn membership_permission_rules() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob", "carol", "mallory"]).await;

    let group = s
        .groups
        .create("alice", "Team", None, &["bob".into()])
        .await
        .unwrap();

    // Non-member cannot invite.
    let err = s
        .groups
        .add_members(&group.id, "mallory", &["carol".into()])
        .await;
    assert!(matches!(err, Err(ChatError::PermissionDenied(_))));

    // Any member can invite; the invite is idempotent on duplicates.
    let group = s
        .groups
        .add_members(&group.id, "bob", &["carol".into(), "carol".into()])
        .await
        .unwrap();
    assert_eq!(group.member_count(), 3);

    // Non-admin cannot update details.
    let err = s
        .groups
        .update(&group.id, "bob", Some("New Name"), None)
        .await;
    assert!(matches!(err, Err(ChatError::PermissionDenied(_))));

    // Admin can; a blank description clears it.
    let group = s
        .groups
        .update(&group.id, "alice", Some("Renamed"), Some("  "))
        .await
        .unwrap();
    assert_eq!(group.name, "Renamed");
    assert!(group.description.is_none());

    // Non-admin cannot remove someone else, but may remove themselves.
    let err = s.groups.remove_member(&group.id, "bob", "carol").await;
    assert!(matches!(err, Err(ChatError::PermissionDenied(_))));
    let group = s.groups.remove_member(&group.id, "carol", "carol").await.unwrap();
    assert!(!group.is_member("carol"));

    // Only the creator can delete outright.
    let err = s.groups.delete(&group.id, "bob").await;
    assert!(matches!(err, Err(ChatError::PermissionDenied(_))));
    s.groups.delete(&group.id, "alice").await.unwrap();
    assert!(s.groups.find(&group.id).await.unwrap().is_none());
}

#[tokio::test]
async fn leave_keeps_group_while_members_remain() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    let group = s
        .groups
        .create("alice", "Pair", None, &["bob".into()])
        .await
        .unwrap();

    let survivor = s.groups.leave(&group.id, "alice").await.unwrap();
    let survivor = survivor.expect("group should survive with one member");
    assert_eq!(survivor.member_count(), 1);
    assert!(survivor.is_member("bob"));
}

#[tokio::test]
async fn last_leave_cascades_messages_cursors_and_media() {
    let s = common::setup().await;
    common::register_users(&s, &["alice"]).await;

    let group = s.groups.create("alice", "Solo", None, &[]).await.unwrap();

    s.group_messages
        .save(
            GroupMessage::new(&group.id, "alice", "Alice Test", "a photo", GroupMessageKind::Image)
                .with_media("https://cdn.example/p.jpg", "folder/p"),
        )
        .await
        .unwrap();
    s.cursors.mark_read(&group.id, "alice").await.unwrap();

    let gone = s.groups.leave(&group.id, "alice").await.unwrap();
    assert!(gone.is_none());

    assert!(s.groups.find(&group.id).await.unwrap().is_none());
    assert_eq!(s.group_messages.count(&group.id).await.unwrap(), 0);
    assert!(s.cursors.cursor_for(&group.id, "alice").await.unwrap().is_none());
    assert_eq!(
        s.media.deleted.lock().unwrap().as_slice(),
        ["folder/p".to_string()]
    );
}

#[tokio::test]
async fn group_message_requires_membership_except_system() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "mallory"]).await;

    let group = s.groups.create("alice", "Team", None, &[]).await.unwrap();

    let err = s
        .group_messages
        .save(GroupMessage::new(
            &group.id,
            "mallory",
            "Mallory",
            "let me in",
            GroupMessageKind::Text,
        ))
        .await;
    assert!(matches!(err, Err(ChatError::PermissionDenied(_))));

    // System entries bypass the membership check.
    let entry = s
        .group_messages
        .save(GroupMessage::system(&group.id, "alice created the group"))
        .await
        .unwrap();
    assert_eq!(entry.sender_id, SYSTEM_SENDER);
    assert_eq!(entry.kind, GroupMessageKind::System);

    // Unknown group is a 404, not an empty success.
    let err = s
        .group_messages
        .save(GroupMessage::system("no-such-group", "hello"))
        .await;
    assert!(matches!(err, Err(ChatError::NotFound(_))));
}

#[tokio::test]
async fn group_history_fills_sender_name_and_orders_ascending() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    let group = s
        .groups
        .create("alice", "Team", None, &["bob".into()])
        .await
        .unwrap();

    // Blank sender name is resolved from the directory.
    s.group_messages
        .save(GroupMessage::new(&group.id, "alice", "", "first", GroupMessageKind::Text))
        .await
        .unwrap();
    sleep(Duration::from_millis(5)).await;
    s.group_messages
        .save(GroupMessage::new(&group.id, "bob", "Bob Test", "second", GroupMessageKind::Text))
        .await
        .unwrap();

    let history = s.group_messages.list(&group.id, "alice").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "first");
    assert_eq!(history[0].sender_name, "alice Test");
    assert_eq!(history[1].content, "second");

    let err = s.group_messages.list(&group.id, "mallory").await;
    assert!(matches!(err, Err(ChatError::PermissionDenied(_))));

    let last = s.group_messages.last_message(&group.id).await.unwrap();
    assert_eq!(last.map(|m| m.content), Some("second".into()));
}

#[tokio::test]
async fn unread_counts_follow_the_cursor() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;

    let group = s
        .groups
        .create("alice", "Team", None, &["bob".into()])
        .await
        .unwrap();

    // No cursor yet: everything counts, system entries included.
    s.group_messages
        .save(GroupMessage::system(&group.id, "alice created the group"))
        .await
        .unwrap();
    sleep(Duration::from_millis(5)).await;
    s.group_messages
        .save(GroupMessage::new(&group.id, "alice", "Alice Test", "hi", GroupMessageKind::Text))
        .await
        .unwrap();

    assert_eq!(s.cursors.unread_count(&group.id, "bob").await.unwrap(), 2);

    sleep(Duration::from_millis(5)).await;
    s.cursors.mark_read(&group.id, "bob").await.unwrap();
    assert_eq!(s.cursors.unread_count(&group.id, "bob").await.unwrap(), 0);

    // Later traffic from others counts; bob's own messages never do.
    sleep(Duration::from_millis(5)).await;
    s.group_messages
        .save(GroupMessage::new(&group.id, "alice", "Alice Test", "again", GroupMessageKind::Text))
        .await
        .unwrap();
    s.group_messages
        .save(GroupMessage::new(&group.id, "bob", "Bob Test", "mine", GroupMessageKind::Text))
        .await
        .unwrap();

    assert_eq!(s.cursors.unread_count(&group.id, "bob").await.unwrap(), 1);
}

#[tokio::test]
async fn cursor_only_moves_forward() {
    let s = common::setup().await;
    common::register_users(&s, &["alice"]).await;

    let group = s.groups.create("alice", "Solo", None, &[]).await.unwrap();

    let first = s.cursors.mark_read(&group.id, "alice").await.unwrap();
    sleep(Duration::from_millis(5)).await;
    let second = s.cursors.mark_read(&group.id, "alice").await.unwrap();
    assert!(second.last_read_at > first.last_read_at);

    let stored = s
        .cursors
        .cursor_for(&group.id, "alice")
        .await
        .unwrap()
        .expect("cursor exists");
    assert_eq!(stored.last_read_at, second.last_read_at);
}

#[tokio::test]
async fn mark_read_reports_the_stored_cursor_when_guard_rejects() {
    let s = common::setup().await;
    common::register_users(&s, &["alice"]).await;

    let group = s.groups.create("alice", "Solo", None, &[]).await.unwrap();

    // A cursor already ahead of the wall clock, as left by a clock skew
    // between two nodes sharing the database.
    let ahead = chrono::Utc::now() + chrono::Duration::hours(1);
    sqlx::query("INSERT INTO read_cursors (user_id, group_id, last_read_at) VALUES (?, ?, ?)")
        .bind("alice")
        .bind(&group.id)
        .bind(ahead.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        .execute(s.db.pool())
        .await
        .unwrap();

    // The forward-only guard keeps the later instant and the returned
    // cursor reflects it.
    let cursor = s.cursors.mark_read(&group.id, "alice").await.unwrap();
    assert!(cursor.last_read_at > chrono::Utc::now() + chrono::Duration::minutes(59));

    let stored = s
        .cursors
        .cursor_for(&group.id, "alice")
        .await
        .unwrap()
        .expect("cursor exists");
    assert_eq!(stored.last_read_at, cursor.last_read_at);
}

#[tokio::test]
async fn broadcast_reaches_online_members_including_sender() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob", "carol"]).await;
    s.presence.set_online("alice").await.unwrap();
    s.presence.set_online("bob").await.unwrap();
    // carol stays offline.

    let group = s
        .groups
        .create("alice", "Team", None, &["bob".into(), "carol".into()])
        .await
        .unwrap();

    let msg = s
        .group_messages
        .save(GroupMessage::new(&group.id, "alice", "Alice Test", "hello all", GroupMessageKind::Text))
        .await
        .unwrap();
    s.dispatcher.broadcast_group(&group, &msg).await;

    // Sender echo plus online members; offline members get nothing.
    let to_alice = s.transport.sent_to("alice", CHANNEL_GROUP_MESSAGES);
    assert_eq!(to_alice.len(), 1);
    assert_eq!(to_alice[0]["content"], "hello all");
    assert_eq!(to_alice[0]["group_name"], "Team");
    assert_eq!(s.transport.sent_to("bob", CHANNEL_GROUP_MESSAGES).len(), 1);
    assert!(s.transport.sent_to("carol", CHANNEL_GROUP_MESSAGES).is_empty());
}

#[tokio::test]
async fn announce_group_event_saves_and_broadcasts_audit_entry() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;
    s.presence.set_online("bob").await.unwrap();

    let group = s
        .groups
        .create("alice", "Team", None, &["bob".into()])
        .await
        .unwrap();

    let entry = s
        .dispatcher
        .announce_group_event(&s.group_messages, &group, "bob joined the group".into())
        .await
        .unwrap();
    assert_eq!(entry.sender_id, SYSTEM_SENDER);

    let history = s.group_messages.list(&group.id, "bob").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, GroupMessageKind::System);

    let to_bob = s.transport.sent_to("bob", CHANNEL_GROUP_MESSAGES);
    assert_eq!(to_bob.len(), 1);
    assert_eq!(to_bob[0]["content"], "bob joined the group");
}

#[tokio::test]
async fn list_for_user_and_members_of() {
    let s = common::setup().await;
    common::register_users(&s, &["alice", "bob"]).await;
    s.presence.set_online("bob").await.unwrap();

    let g1 = s
        .groups
        .create("alice", "One", None, &["bob".into()])
        .await
        .unwrap();
    let _g2 = s.groups.create("alice", "Two", None, &[]).await.unwrap();

    let bobs = s.groups.list_for_user("bob").await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].id, g1.id);

    let alices = s.groups.list_for_user("alice").await.unwrap();
    assert_eq!(alices.len(), 2);

    let members = s.groups.members_of(&g1.id).await.unwrap();
    assert_eq!(members.len(), 2);
    let alice = members.iter().find(|m| m.username == "alice").unwrap();
    assert!(alice.is_admin && alice.is_creator);
    let bob = members.iter().find(|m| m.username == "bob").unwrap();
    assert!(!bob.is_admin && !bob.is_creator);
    assert_eq!(bob.full_name.as_deref(), Some("bob Test"));
}
