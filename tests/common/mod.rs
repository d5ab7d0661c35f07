#![allow(dead_code)]

//! Shared test harness: a tempfile-backed database, the full manager set,
//! and recording fakes for the push transport and media store.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use nexus_server::conversation::ConversationResolver;
use nexus_server::direct::MessageLedger;
use nexus_server::dispatch::DeliveryDispatcher;
use nexus_server::group::cursor::ReadCursorTracker;
use nexus_server::group::messages::GroupMessageLedger;
use nexus_server::group::GroupRegistry;
use nexus_server::media::MediaStore;
use nexus_server::models::GroupMessageKind;
use nexus_server::presence::PresenceRegistry;
use nexus_server::push::PushTransport;
use nexus_server::store::Database;

/// Captures every push instead of delivering it.
#[derive(Default)]
pub struct RecordingTransport {
    pub private: Mutex<Vec<(String, String, Value)>>,
    pub public: Mutex<Vec<Value>>,
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, identity: &str, channel: &str, payload: Value) -> anyhow::Result<()> {
        self.private
            .lock()
            .unwrap()
            .push((identity.to_string(), channel.to_string(), payload));
        Ok(())
    }

    async fn broadcast_public(&self, payload: Value) -> anyhow::Result<()> {
        self.public.lock().unwrap().push(payload);
        Ok(())
    }
}

impl RecordingTransport {
    /// Payloads pushed to one identity on one channel, in order.
    pub fn sent_to(&self, identity: &str, channel: &str) -> Vec<Value> {
        self.private
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, ch, _)| to == identity && ch == channel)
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.private.lock().unwrap().clear();
        self.public.lock().unwrap().clear();
    }
}

/// Records media deletions requested by the cascade.
#[derive(Default)]
pub struct RecordingMediaStore {
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaStore for RecordingMediaStore {
    async fn delete(&self, public_id: &str, _kind: GroupMessageKind) -> anyhow::Result<()> {
        self.deleted.lock().unwrap().push(public_id.to_string());
        Ok(())
    }
}

pub struct TestServer {
    _dir: TempDir,
    pub db: Database,
    pub presence: PresenceRegistry,
    pub conversations: ConversationResolver,
    pub messages: MessageLedger,
    pub groups: GroupRegistry,
    pub group_messages: GroupMessageLedger,
    pub cursors: ReadCursorTracker,
    pub dispatcher: DeliveryDispatcher,
    pub transport: Arc<RecordingTransport>,
    pub media: Arc<RecordingMediaStore>,
}

pub async fn setup() -> TestServer {
    let dir = TempDir::new().unwrap();
    let db = Database::connect(&dir.path().join("chat.sqlite"))
        .await
        .unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let media = Arc::new(RecordingMediaStore::default());

    let presence = PresenceRegistry::new(db.clone());
    let conversations = ConversationResolver::new(db.clone());
    let messages = MessageLedger::new(db.clone(), conversations.clone(), presence.clone());
    let groups = GroupRegistry::new(db.clone(), media.clone());
    let group_messages = GroupMessageLedger::new(db.clone());
    let cursors = ReadCursorTracker::new(db.clone());
    let dispatcher = DeliveryDispatcher::new(presence.clone(), transport.clone());

    TestServer {
        _dir: dir,
        db,
        presence,
        conversations,
        messages,
        groups,
        group_messages,
        cursors,
        dispatcher,
        transport,
        media,
    }
}

/// Register identities as offline directory entries.
pub async fn register_users(server: &TestServer, usernames: &[&str]) {
    for username in usernames {
        server
            .presence
            .register(username, &format!("{} Test", username))
            .await
            .unwrap();
    }
}
