//! Server configuration and shared handler state.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::conversation::ConversationResolver;
use crate::direct::MessageLedger;
use crate::dispatch::DeliveryDispatcher;
use crate::group::cursor::ReadCursorTracker;
use crate::group::messages::GroupMessageLedger;
use crate::group::GroupRegistry;
use crate::presence::PresenceRegistry;
use crate::push::ChannelTransport;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// Buffered frames per identity channel before slow consumers lag.
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = std::env::var("NEXUS_DATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("nexus_data"));
        Self {
            data_dir,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            channel_capacity: 128,
        }
    }
}

impl ServerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chat.sqlite")
    }

    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

/// App state shared across all handlers. Every manager is an explicit
/// instance here; there are no process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    pub presence: PresenceRegistry,
    pub conversations: ConversationResolver,
    pub messages: MessageLedger,
    pub groups: GroupRegistry,
    pub group_messages: GroupMessageLedger,
    pub cursors: ReadCursorTracker,
    pub dispatcher: DeliveryDispatcher,
    pub transport: Arc<ChannelTransport>,
}
