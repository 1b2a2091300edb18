use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::engine::channel::ChannelId;
use crate::engine::events::{DeletedMessage, MessageRecord, NotificationRecord, ServerEvent};
use crate::error::HubError;

use super::app_state::AppState;
use super::auth_middleware::AuthUser;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub pending_calls: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.hub.registry.connection_count(),
        pending_calls: state.hub.calls.len(),
    })
}

// ── Notifications ─────────────────────────────────────────

#[derive(Serialize)]
pub struct CountResponse {
    pub count: u64,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<Vec<NotificationRecord>>, HubError> {
    Ok(Json(state.hub.list_notifications(&auth.user_id).await?))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(notification_id): Path<String>,
) -> Result<Json<NotificationRecord>, HubError> {
    Ok(Json(
        state
            .hub
            .mark_read_as(&auth.user_id, &notification_id)
            .await?,
    ))
}

pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CountResponse>, HubError> {
    let count = state
        .hub
        .mark_all_read(&auth.user_id, &auth.user_id)
        .await?;
    Ok(Json(CountResponse { count }))
}

pub async fn clear_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<CountResponse>, HubError> {
    let count = state.hub.clear_all(&auth.user_id, &user_id).await?;
    Ok(Json(CountResponse { count }))
}

// ── Messages ──────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

pub async fn add_reaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(message_id): Path<String>,
    Json(body): Json<ReactionBody>,
) -> Result<Json<MessageRecord>, HubError> {
    let record = state
        .hub
        .add_reaction(&message_id, &auth.user_id, &body.emoji)
        .await?;
    publish_update(&state, &record);
    Ok(Json(record))
}

pub async fn remove_reaction(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(message_id): Path<String>,
    Json(body): Json<ReactionBody>,
) -> Result<Json<MessageRecord>, HubError> {
    let record = state
        .hub
        .remove_reaction(&message_id, &auth.user_id, &body.emoji)
        .await?;
    publish_update(&state, &record);
    Ok(Json(record))
}

/// Hard delete. Unlike the socket form, a missing message is a 404 here.
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let channel_ref = state
        .hub
        .delete_message(&message_id)
        .await?
        .ok_or_else(|| HubError::NotFound("Message not found".into()))?;
    state.hub.publish_to_message_channel(
        None,
        ChannelId::parse(&channel_ref).as_ref(),
        ServerEvent::MessageDeleted(DeletedMessage { message_id }),
    );
    Ok(StatusCode::NO_CONTENT)
}

fn publish_update(state: &AppState, record: &MessageRecord) {
    let channel = ChannelId::parse(&record.channel_ref);
    state.hub.publish_to_message_channel(
        None,
        channel.as_ref(),
        ServerEvent::MessageUpdated(record.clone()),
    );
}
