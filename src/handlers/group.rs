//! Group endpoints. Membership changes follow a fixed sequence: mutate the
//! registry, append a system entry broadcast like a normal message, then
//! emit the structural notification on its own channel.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppState;
use crate::error::Result;
use crate::models::{
    Group, GroupMemberInfo, GroupMessage, GroupMessageKind, GroupOverview, GroupUpdate,
};

/// Full name from the directory, falling back to the raw identity.
async fn display_name(state: &AppState, user_id: &str) -> String {
    match state.presence.find(user_id).await {
        Ok(Some(user)) if !user.full_name.is_empty() => user.full_name,
        _ => user_id.to_string(),
    }
}

/// System entries are audit records: persisting one must not undo the
/// membership change that already committed, so failures only log.
async fn announce(state: &AppState, group: &Group, content: String) {
    if let Err(e) = state
        .dispatcher
        .announce_group_event(&state.group_messages, group, content)
        .await
    {
        warn!("Failed to record system entry for group {}: {}", group.id, e);
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatorQuery {
    pub creator_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// POST /groups?creator_id=
pub async fn create_group(
    State(state): State<AppState>,
    Query(creator): Query<CreatorQuery>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Group>> {
    info!("POST /groups - '{}' by {}", req.name, creator.creator_id);

    let group = state
        .groups
        .create(
            &creator.creator_id,
            &req.name,
            req.description.as_deref(),
            &req.member_ids,
        )
        .await?;

    let creator_name = display_name(&state, &creator.creator_id).await;
    announce(
        &state,
        &group,
        format!("{} created the group \"{}\"", creator_name, group.name),
    )
    .await;
    state
        .dispatcher
        .notify_group_change(&group, &GroupUpdate::GroupCreated { group: group.clone() })
        .await;

    Ok(Json(group))
}

/// GET /groups/:group_id
pub async fn get_group(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Group>> {
    Ok(Json(state.groups.require(&group_id).await?))
}

/// GET /users/:user_id/groups
pub async fn list_groups_for_user(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupOverview>>> {
    let groups = state.groups.list_for_user(&user_id).await?;

    let mut overviews = Vec::with_capacity(groups.len());
    for group in groups {
        let last = state.group_messages.last_message(&group.id).await?;
        let unread_count = state.cursors.unread_count(&group.id, &user_id).await?;
        overviews.push(GroupOverview {
            member_count: group.member_count(),
            last_message: last.as_ref().map(|m| m.content.clone()),
            last_message_sender: last.as_ref().map(|m| m.sender_name.clone()),
            last_message_at: last.map(|m| m.created_at),
            unread_count,
            group,
        });
    }

    overviews.sort_by(|a, b| match (&b.last_message_at, &a.last_message_at) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    });

    Ok(Json(overviews))
}

#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub requester_id: String,
    pub member_ids: Vec<String>,
}

/// POST /groups/:group_id/members
pub async fn add_members(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<AddMembersRequest>,
) -> Result<Json<Group>> {
    info!(
        "POST /groups/{}/members - {} adds {:?}",
        group_id, req.requester_id, req.member_ids
    );

    let group = state
        .groups
        .add_members(&group_id, &req.requester_id, &req.member_ids)
        .await?;

    let requester_name = display_name(&state, &req.requester_id).await;
    announce(
        &state,
        &group,
        format!(
            "{} added {} to the group",
            requester_name,
            req.member_ids.join(", ")
        ),
    )
    .await;
    state
        .dispatcher
        .notify_group_change(&group, &GroupUpdate::MembersAdded { group: group.clone() })
        .await;

    Ok(Json(group))
}

#[derive(Debug, Deserialize)]
pub struct RequesterQuery {
    pub requester_id: String,
}

/// DELETE /groups/:group_id/members/:member_id?requester_id=
pub async fn remove_member(
    Path((group_id, member_id)): Path<(String, String)>,
    Query(requester): Query<RequesterQuery>,
    State(state): State<AppState>,
) -> Result<Json<Group>> {
    info!(
        "DELETE /groups/{}/members/{} by {}",
        group_id, member_id, requester.requester_id
    );

    let group = state
        .groups
        .remove_member(&group_id, &requester.requester_id, &member_id)
        .await?;

    let member_name = display_name(&state, &member_id).await;
    announce(
        &state,
        &group,
        format!("{} was removed from the group", member_name),
    )
    .await;
    state
        .dispatcher
        .notify_group_change(&group, &GroupUpdate::MemberRemoved { group: group.clone() })
        .await;
    state
        .dispatcher
        .notify_user(
            &member_id,
            &GroupUpdate::RemovedFromGroup {
                group_id: group_id.clone(),
            },
        )
        .await;

    Ok(Json(group))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

/// POST /groups/:group_id/leave?user_id=
pub async fn leave_group(
    Path(group_id): Path<String>,
    Query(user): Query<UserQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    info!("POST /groups/{}/leave by {}", group_id, user.user_id);

    let user_name = display_name(&state, &user.user_id).await;
    match state.groups.leave(&group_id, &user.user_id).await? {
        Some(group) => {
            announce(&state, &group, format!("{} left the group", user_name)).await;
            state
                .dispatcher
                .notify_group_change(&group, &GroupUpdate::MemberLeft { group: group.clone() })
                .await;
            Ok(Json(json!({ "message": "Successfully left the group" })))
        }
        None => Ok(Json(json!({
            "message": "Successfully left the group",
            "deleted": true
        }))),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub requester_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// PUT /groups/:group_id
pub async fn update_group(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<Group>> {
    info!("PUT /groups/{} by {}", group_id, req.requester_id);

    let group = state
        .groups
        .update(
            &group_id,
            &req.requester_id,
            req.name.as_deref(),
            req.description.as_deref(),
        )
        .await?;

    state
        .dispatcher
        .notify_group_change(&group, &GroupUpdate::GroupUpdated { group: group.clone() })
        .await;

    Ok(Json(group))
}

/// DELETE /groups/:group_id?requester_id=
pub async fn delete_group(
    Path(group_id): Path<String>,
    Query(requester): Query<RequesterQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    info!("DELETE /groups/{} by {}", group_id, requester.requester_id);

    // Snapshot the membership before the rows disappear so everyone can
    // still be told.
    let snapshot = state.groups.require(&group_id).await?;
    state
        .groups
        .delete(&group_id, &requester.requester_id)
        .await?;

    state
        .dispatcher
        .notify_group_change(
            &snapshot,
            &GroupUpdate::GroupDeleted {
                group_id: group_id.clone(),
            },
        )
        .await;

    Ok(Json(json!({ "message": "Group deleted successfully" })))
}

/// GET /groups/:group_id/members
pub async fn group_members(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupMemberInfo>>> {
    Ok(Json(state.groups.members_of(&group_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SendGroupMessageRequest {
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    pub kind: Option<GroupMessageKind>,
    pub media_url: Option<String>,
    pub media_public_id: Option<String>,
}

/// POST /groups/:group_id/messages
pub async fn send_group_message(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<SendGroupMessageRequest>,
) -> Result<Json<GroupMessage>> {
    info!("POST /groups/{}/messages from {}", group_id, req.sender_id);

    let mut msg = GroupMessage::new(
        &group_id,
        &req.sender_id,
        &req.sender_name,
        &req.content,
        req.kind.unwrap_or(GroupMessageKind::Text),
    );
    msg.media_url = req.media_url;
    msg.media_public_id = req.media_public_id;

    let saved = state.group_messages.save(msg).await?;
    let group = state.groups.require(&group_id).await?;
    state.dispatcher.broadcast_group(&group, &saved).await;

    Ok(Json(saved))
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub requester_id: String,
}

/// GET /groups/:group_id/messages?requester_id=
pub async fn list_group_messages(
    Path(group_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<GroupMessage>>> {
    let messages = state
        .group_messages
        .list(&group_id, &query.requester_id)
        .await?;
    Ok(Json(messages))
}

/// POST /groups/:group_id/read?user_id=
pub async fn mark_group_read(
    Path(group_id): Path<String>,
    Query(user): Query<UserQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    state.cursors.mark_read(&group_id, &user.user_id).await?;
    Ok(Json(json!({ "message": "marked as read" })))
}

/// GET /groups/:group_id/unread?user_id=
pub async fn unread_count(
    Path(group_id): Path<String>,
    Query(user): Query<UserQuery>,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>> {
    let count = state.cursors.unread_count(&group_id, &user.user_id).await?;
    Ok(Json(json!({ "unread_count": count })))
}
