use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::{created, page, JsonBody};
use crate::app::notifications::SendNotificationInput;
use crate::auth::Caller;
use crate::domain::Notification;
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

pub async fn list_notifications(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Notification>> {
    page(&state, state.notifications().list(&caller), &params)
}

pub async fn get_notification(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>> {
    Ok(Json(state.notifications().get(&caller, id)?))
}

pub async fn mark_read(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Notification>> {
    Ok(Json(state.notifications().mark_read(&caller, id)?))
}

pub async fn mark_all_read(State(state): State<AppState>, caller: Caller) -> Result<Json<serde_json::Value>> {
    let marked = state.notifications().mark_all_read(&caller)?;
    Ok(Json(serde_json::json!({
        "detail": format!("{marked} notifications marked as read"),
        "marked": marked,
    })))
}

pub async fn unread(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Notification>> {
    page(&state, state.notifications().unread(&caller), &params)
}

pub async fn unread_count(State(state): State<AppState>, caller: Caller) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "unread_count": state.notifications().unread_count(&caller) }))
}

pub async fn send_notification(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<SendNotificationInput>,
) -> Result<Response> {
    Ok(created(state.notifications().send(&caller, input).await?))
}
