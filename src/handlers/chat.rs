//! Direct-message endpoints: persist via the ledger, then hand the result
//! to the dispatcher for presence-aware fanout.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::config::AppState;
use crate::error::Result;
use crate::models::{ChatContact, DirectMessage};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
    #[serde(default)]
    pub content: String,
    pub media_url: Option<String>,
}

/// POST /messages
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<DirectMessage>> {
    info!("POST /messages - {} -> {}", req.sender_id, req.recipient_id);

    let msg = state
        .messages
        .send(&req.sender_id, &req.recipient_id, &req.content, req.media_url)
        .await?;
    state.dispatcher.dispatch_direct(&msg).await;

    Ok(Json(msg))
}

/// GET /messages/:sender_id/:recipient_id
pub async fn find_chat_messages(
    Path((sender_id, recipient_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DirectMessage>>> {
    let messages = state.messages.find_messages(&sender_id, &recipient_id).await?;
    Ok(Json(messages))
}

/// GET /messages/undelivered/:user_id
///
/// Returns the pending snapshot; persisted state is already DELIVERED and
/// each online original sender has received a delivery receipt.
pub async fn undelivered_messages(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DirectMessage>>> {
    info!("GET /messages/undelivered/{}", user_id);

    let pending = state.messages.fetch_undelivered(&user_id).await?;
    state.dispatcher.confirm_delivery(&pending).await;

    Ok(Json(pending))
}

/// POST /messages/read/:sender_id/:recipient_id
pub async fn mark_messages_read(
    Path((sender_id, recipient_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DirectMessage>>> {
    info!("POST /messages/read/{}/{}", sender_id, recipient_id);

    let transitioned = state.messages.mark_read(&sender_id, &recipient_id).await?;
    state.dispatcher.confirm_read(&transitioned).await;

    Ok(Json(transitioned))
}

/// GET /contacts/:user_id
pub async fn chat_contacts(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatContact>>> {
    let contacts = state.messages.chat_contacts(&user_id).await?;
    Ok(Json(contacts))
}
