//! Thin HTTP/WebSocket surface over the core managers.
//!
//! Handlers validate nothing themselves beyond deserialization; permission
//! and existence checks live in the managers so every caller gets them.

pub mod chat;
pub mod group;
pub mod presence;
pub mod ws;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::config::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // User directory + presence
        .route("/users", get(presence::list_users).post(presence::register))
        .route("/users/online", get(presence::list_online))
        .route("/users/search", get(presence::search_users))
        .route("/users/{user_id}/groups", get(group::list_groups_for_user))
        .route("/presence/connect/{user_id}", post(presence::connect))
        .route("/presence/disconnect/{user_id}", post(presence::disconnect))
        // Live connection: open/close drives connect/disconnect
        .route("/ws/{user_id}", get(ws::ws_connect))
        // Direct messages
        .route("/messages", post(chat::send_message))
        .route(
            "/messages/{sender_id}/{recipient_id}",
            get(chat::find_chat_messages),
        )
        .route(
            "/messages/undelivered/{user_id}",
            get(chat::undelivered_messages),
        )
        .route(
            "/messages/read/{sender_id}/{recipient_id}",
            post(chat::mark_messages_read),
        )
        .route("/contacts/{user_id}", get(chat::chat_contacts))
        // Groups
        .route("/groups", post(group::create_group))
        .route(
            "/groups/{group_id}",
            get(group::get_group)
                .put(group::update_group)
                .delete(group::delete_group),
        )
        .route(
            "/groups/{group_id}/members",
            get(group::group_members).post(group::add_members),
        )
        .route(
            "/groups/{group_id}/members/{member_id}",
            delete(group::remove_member),
        )
        .route("/groups/{group_id}/leave", post(group::leave_group))
        .route(
            "/groups/{group_id}/messages",
            get(group::list_group_messages).post(group::send_group_message),
        )
        .route("/groups/{group_id}/read", post(group::mark_group_read))
        .route("/groups/{group_id}/unread", get(group::unread_count))
        // Health check
        .route("/health", get(health_check))
        .with_state(state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK - Nexus Chat Server"
}
