use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{created, no_content, page, JsonBody, StatusBody};
use crate::app::fleet::{DriverInput, DriverPatch, VehicleInput, VehiclePatch};
use crate::auth::Caller;
use crate::domain::{Driver, Vehicle};
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AssignVehicleBody {
    pub vehicle_id: Option<Uuid>,
}

pub async fn list_vehicles(
    State(state): State<AppState>,
    _caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Vehicle>> {
    page(&state, state.fleet().list_vehicles(), &params)
}

pub async fn available_vehicles(
    State(state): State<AppState>,
    _caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Vehicle>> {
    page(&state, state.fleet().available_vehicles(), &params)
}

pub async fn create_vehicle(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<VehicleInput>,
) -> Result<Response> {
    Ok(created(state.fleet().create_vehicle(&caller, input)?))
}

pub async fn get_vehicle(State(state): State<AppState>, _caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Vehicle>> {
    Ok(Json(state.fleet().get_vehicle(id)?))
}

pub async fn update_vehicle(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<VehiclePatch>,
) -> Result<Json<Vehicle>> {
    Ok(Json(state.fleet().update_vehicle(&caller, id, patch)?))
}

pub async fn delete_vehicle(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.fleet().delete_vehicle(&caller, id)?;
    Ok(no_content())
}

pub async fn change_vehicle_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<StatusBody>,
) -> Result<Json<Vehicle>> {
    Ok(Json(state.fleet().change_vehicle_status(&caller, id, &body.status)?))
}

pub async fn list_drivers(
    State(state): State<AppState>,
    _caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Driver>> {
    page(&state, state.fleet().list_drivers(), &params)
}

pub async fn active_drivers(
    State(state): State<AppState>,
    _caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Driver>> {
    page(&state, state.fleet().active_drivers(), &params)
}

pub async fn create_driver(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<DriverInput>,
) -> Result<Response> {
    Ok(created(state.fleet().create_driver(&caller, input)?))
}

pub async fn get_driver(State(state): State<AppState>, _caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Driver>> {
    Ok(Json(state.fleet().get_driver(id)?))
}

pub async fn update_driver(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<DriverPatch>,
) -> Result<Json<Driver>> {
    Ok(Json(state.fleet().update_driver(&caller, id, patch)?))
}

pub async fn delete_driver(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.fleet().delete_driver(&caller, id)?;
    Ok(no_content())
}

pub async fn assign_vehicle(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<AssignVehicleBody>,
) -> Result<Json<Driver>> {
    Ok(Json(state.fleet().assign_vehicle(&caller, id, body.vehicle_id)?))
}
