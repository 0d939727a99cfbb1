use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::{created, no_content, page, JsonBody, StatusBody};
use crate::app::routing::{FromRequestsInput, RouteDetail, RouteInput, RoutePatch};
use crate::auth::Caller;
use crate::domain::{Route, RouteStop};
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

pub async fn list_routes(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<Route>>> {
    let routes = state.routing().list_routes(&caller)?;
    Ok(page(&state, routes, &params))
}

pub async fn create_route(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<RouteInput>,
) -> Result<Response> {
    Ok(created(state.routing().create_route(&caller, input)?))
}

pub async fn get_route(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<RouteDetail>> {
    Ok(Json(state.routing().get_route(&caller, id)?))
}

pub async fn update_route(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<RoutePatch>,
) -> Result<Json<Route>> {
    Ok(Json(state.routing().update_route(&caller, id, patch)?))
}

pub async fn delete_route(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.routing().delete_route(&caller, id)?;
    Ok(no_content())
}

pub async fn route_stops(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RouteStop>>> {
    Ok(Json(state.routing().route_stops(&caller, id)?))
}

pub async fn create_from_requests(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<FromRequestsInput>,
) -> Result<Response> {
    Ok(created(state.routing().create_from_requests(&caller, input)?))
}

pub async fn optimize(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let route = state.routing().optimize(&caller, id)?;
    Ok(Json(serde_json::json!({
        "detail": "Route optimization completed",
        "route": route,
    })))
}

pub async fn change_route_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<StatusBody>,
) -> Result<Json<Route>> {
    Ok(Json(state.routing().change_route_status(&caller, id, &body.status)?))
}

pub async fn list_stops(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<RouteStop>>> {
    let stops = state.routing().list_stops(&caller)?;
    Ok(page(&state, stops, &params))
}

pub async fn get_stop(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<RouteStop>> {
    Ok(Json(state.routing().get_stop(&caller, id)?))
}

pub async fn mark_stop_completed(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteStop>> {
    Ok(Json(state.routing().mark_stop_completed(&caller, id).await?))
}

pub async fn mark_stop_skipped(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<RouteStop>> {
    Ok(Json(state.routing().mark_stop_skipped(&caller, id)?))
}
