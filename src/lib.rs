//! Nexus Chat Server
//!
//! Real-time message delivery and presence core: direct messages with a
//! SENT -> DELIVERED -> READ lifecycle, presence-driven fanout, and group
//! messaging with per-user read cursors.

pub mod config;
pub mod conversation;
pub mod direct;
pub mod dispatch;
pub mod error;
pub mod group;
pub mod handlers;
pub mod media;
pub mod models;
pub mod presence;
pub mod push;
pub mod store;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{AppState, ServerConfig};
use conversation::ConversationResolver;
use direct::MessageLedger;
use dispatch::DeliveryDispatcher;
use group::cursor::ReadCursorTracker;
use group::messages::GroupMessageLedger;
use group::GroupRegistry;
use media::NullMediaStore;
use presence::PresenceRegistry;
use push::ChannelTransport;
use store::Database;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("=== Nexus Chat Server ===");

    let config = ServerConfig::default();
    config.ensure_dirs().await?;
    info!("Data directory: {:?}", config.data_dir);

    let db = Database::connect(&config.db_path()).await?;

    let transport = Arc::new(ChannelTransport::new(config.channel_capacity));
    let presence = PresenceRegistry::new(db.clone());
    let conversations = ConversationResolver::new(db.clone());
    let messages = MessageLedger::new(db.clone(), conversations.clone(), presence.clone());
    let groups = GroupRegistry::new(db.clone(), Arc::new(NullMediaStore));
    let group_messages = GroupMessageLedger::new(db.clone());
    let cursors = ReadCursorTracker::new(db.clone());
    let dispatcher = DeliveryDispatcher::new(presence.clone(), transport.clone());

    let state = AppState {
        presence,
        conversations,
        messages,
        groups,
        group_messages,
        cursors,
        dispatcher,
        transport,
    };

    let app = handlers::router(state);

    info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
