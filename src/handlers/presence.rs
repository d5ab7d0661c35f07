use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::config::AppState;
use crate::error::Result;
use crate::models::User;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub full_name: String,
}

/// POST /users
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<User>> {
    info!("POST /users - registering {}", req.username);
    let user = state.presence.register(&req.username, &req.full_name).await?;
    Ok(Json(user))
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.presence.all_users().await?))
}

/// GET /users/online
pub async fn list_online(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.presence.connected_users().await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

/// GET /users/search?q=
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<User>>> {
    Ok(Json(state.presence.search(&query.q).await?))
}

/// POST /presence/connect/:user_id
pub async fn connect(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    info!("POST /presence/connect/{}", user_id);
    state.presence.set_online(&user_id).await?;
    announce(&state, &user_id, "USER_ONLINE").await;
    Ok(Json(json!({ "message": "connected" })))
}

/// POST /presence/disconnect/:user_id
pub async fn disconnect(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    info!("POST /presence/disconnect/{}", user_id);
    state.presence.set_offline(&user_id).await?;
    announce(&state, &user_id, "USER_OFFLINE").await;
    Ok(Json(json!({ "message": "disconnected" })))
}

/// Public presence broadcast; skipped entirely for unknown identities since
/// their presence never changed.
pub(crate) async fn announce(state: &AppState, user_id: &str, event: &str) {
    if let Ok(Some(user)) = state.presence.find(user_id).await {
        state
            .dispatcher
            .broadcast_public(json!({ "type": event, "user": user }))
            .await;
    }
}
