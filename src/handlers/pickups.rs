use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::{created, no_content, page, JsonBody, OptionalJsonBody, ReasonBody, StatusBody};
use crate::app::pickups::{AssignInput, PickupFilter, PickupInput, PickupPatch};
use crate::auth::Caller;
use crate::domain::PickupRequest;
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

pub async fn list_pickups(
    State(state): State<AppState>,
    caller: Caller,
    Query(filter): Query<PickupFilter>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<PickupRequest>>> {
    let pickups = state.pickups().list(&caller, &filter)?;
    Ok(page(&state, pickups, &params))
}

pub async fn create_pickup(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<PickupInput>,
) -> Result<Response> {
    Ok(created(state.pickups().submit(&caller, input)?))
}

pub async fn get_pickup(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<PickupRequest>> {
    Ok(Json(state.pickups().get(&caller, id)?))
}

pub async fn update_pickup(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<PickupPatch>,
) -> Result<Json<PickupRequest>> {
    Ok(Json(state.pickups().update(&caller, id, patch)?))
}

pub async fn delete_pickup(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.pickups().delete(&caller, id)?;
    Ok(no_content())
}

pub async fn change_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<StatusBody>,
) -> Result<Json<PickupRequest>> {
    let pickup = state
        .pickups()
        .change_status(&caller, id, &body.status, body.reason)
        .await?;
    Ok(Json(pickup))
}

pub async fn assign(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(input): JsonBody<AssignInput>,
) -> Result<Json<PickupRequest>> {
    Ok(Json(state.pickups().assign(&caller, id, input)?))
}

/// The body is optional; an empty POST cancels without a reason.
pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    OptionalJsonBody(body): OptionalJsonBody<ReasonBody>,
) -> Result<Json<PickupRequest>> {
    let reason = body.and_then(|b| b.reason);
    Ok(Json(state.pickups().cancel(&caller, id, reason).await?))
}
