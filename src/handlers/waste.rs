use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::{created, no_content, page, JsonBody, StatusBody};
use crate::app::waste::{
    IssueInput, IssuePatch, ScheduleInput, SchedulePatch, WasteTypeInput, WasteTypePatch,
};
use crate::auth::Caller;
use crate::domain::{IssueReport, PickupRequest, RecurrenceSchedule, WasteType};
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub date: NaiveDate,
}

pub async fn list_waste_types(
    State(state): State<AppState>,
    _caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<WasteType>> {
    page(&state, state.waste().list_waste_types(), &params)
}

pub async fn create_waste_type(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<WasteTypeInput>,
) -> Result<Response> {
    Ok(created(state.waste().create_waste_type(&caller, input)?))
}

pub async fn get_waste_type(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<WasteType>> {
    Ok(Json(state.waste().get_waste_type(id)?))
}

pub async fn update_waste_type(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<WasteTypePatch>,
) -> Result<Json<WasteType>> {
    Ok(Json(state.waste().update_waste_type(&caller, id, patch)?))
}

pub async fn delete_waste_type(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.waste().delete_waste_type(&caller, id)?;
    Ok(no_content())
}

pub async fn list_schedules(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<RecurrenceSchedule>> {
    page(&state, state.waste().list_schedules(&caller), &params)
}

pub async fn create_schedule(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<ScheduleInput>,
) -> Result<Response> {
    Ok(created(state.waste().create_schedule(&caller, input)?))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<RecurrenceSchedule>> {
    Ok(Json(state.waste().get_schedule(&caller, id)?))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<SchedulePatch>,
) -> Result<Json<RecurrenceSchedule>> {
    Ok(Json(state.waste().update_schedule(&caller, id, patch)?))
}

pub async fn delete_schedule(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.waste().delete_schedule(&caller, id)?;
    Ok(no_content())
}

pub async fn generate_from_schedules(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(body): JsonBody<GenerateBody>,
) -> Result<Response> {
    let generated: Vec<PickupRequest> = state.waste().generate_for_date(&caller, body.date)?;
    Ok(created(serde_json::json!({
        "count": generated.len(),
        "results": generated,
    })))
}

pub async fn list_issues(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<IssueReport>> {
    page(&state, state.waste().list_issues(&caller), &params)
}

pub async fn create_issue(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<IssueInput>,
) -> Result<Response> {
    Ok(created(state.waste().create_issue(&caller, input)?))
}

pub async fn get_issue(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<IssueReport>> {
    Ok(Json(state.waste().get_issue(&caller, id)?))
}

pub async fn update_issue(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(patch): JsonBody<IssuePatch>,
) -> Result<Json<IssueReport>> {
    Ok(Json(state.waste().update_issue(&caller, id, patch)?))
}

pub async fn delete_issue(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Response> {
    state.waste().delete_issue(&caller, id)?;
    Ok(no_content())
}

pub async fn change_issue_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<StatusBody>,
) -> Result<Json<IssueReport>> {
    Ok(Json(state.waste().change_issue_status(&caller, id, &body.status)?))
}
