use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::{created, JsonBody};
use crate::app::routing::RouteDetail;
use crate::app::tracking::{DriverDashboard, LocationUpdate, PickupStatusSummary, VehiclePosition};
use crate::auth::Caller;
use crate::domain::GpsLog;
use crate::error::Result;
use crate::state::AppState;

pub async fn active_routes(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<RouteDetail>>> {
    Ok(Json(state.tracking().active_routes(&caller)?))
}

pub async fn vehicle_status(State(state): State<AppState>, caller: Caller) -> Result<Json<Vec<VehiclePosition>>> {
    Ok(Json(state.tracking().vehicle_status(&caller)?))
}

pub async fn pickup_status(State(state): State<AppState>, caller: Caller) -> Json<PickupStatusSummary> {
    Json(state.tracking().pickup_status(&caller))
}

pub async fn update_location(
    State(state): State<AppState>,
    caller: Caller,
    Path(vehicle_id): Path<Uuid>,
    JsonBody(update): JsonBody<LocationUpdate>,
) -> Result<Response> {
    Ok(created(state.tracking().update_location(&caller, vehicle_id, update)?))
}

pub async fn route_gps_logs(
    State(state): State<AppState>,
    caller: Caller,
    Path(route_id): Path<Uuid>,
) -> Result<Json<Vec<GpsLog>>> {
    Ok(Json(state.tracking().route_gps_logs(&caller, route_id)?))
}

pub async fn driver_dashboard(State(state): State<AppState>, caller: Caller) -> Result<Json<DriverDashboard>> {
    Ok(Json(state.tracking().driver_dashboard(&caller)?))
}
