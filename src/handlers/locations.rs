use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{created, no_content, page, JsonBody};
use crate::app::locations::{AddressInput, AddressPatch, ZoneInput, ZonePatch};
use crate::auth::Caller;
use crate::domain::{Address, Zone};
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ZoneQuery {
    pub zone_id: Option<Uuid>,
}

pub async fn list_addresses(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Address>> {
    page(&state, state.locations().list_addresses(&caller), &params)
}

pub async fn create_address(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<AddressInput>,
) -> Result<Response> {
    Ok(created(state.locations().create_address(&caller, input)?))
}

pub async fn get_address(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Address>> {
    Ok(Json(state.locations().get_address(&caller, id)?))
}

pub async fn update_address(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<AddressPatch>,
) -> Result<Json<Address>> {
    Ok(Json(state.locations().update_address(&caller, id, patch)?))
}

pub async fn delete_address(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.locations().delete_address(&caller, id)?;
    Ok(no_content())
}

pub async fn addresses_by_zone(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ZoneQuery>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Address>>> {
    let addresses = state.locations().addresses_by_zone(&caller, query.zone_id)?;
    Ok(page(&state, addresses, &params))
}

pub async fn list_zones(
    State(state): State<AppState>,
    _caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Zone>> {
    page(&state, state.locations().list_zones(), &params)
}

pub async fn create_zone(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<ZoneInput>,
) -> Result<Response> {
    Ok(created(state.locations().create_zone(&caller, input)?))
}

pub async fn get_zone(State(state): State<AppState>, _caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Zone>> {
    Ok(Json(state.locations().get_zone(id)?))
}

pub async fn update_zone(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<ZonePatch>,
) -> Result<Json<Zone>> {
    Ok(Json(state.locations().update_zone(&caller, id, patch)?))
}

pub async fn delete_zone(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.locations().delete_zone(&caller, id)?;
    Ok(no_content())
}

pub async fn zone_addresses(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Address>>> {
    let addresses = state.locations().zone_addresses(&caller, id)?;
    Ok(page(&state, addresses, &params))
}
