use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{created, page, JsonBody};
use crate::app::accounts::RegisterInput;
use crate::auth::{Caller, TokenPair};
use crate::domain::UserView;
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub refresh: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleBody {
    pub role: String,
}

pub async fn register(State(state): State<AppState>, JsonBody(input): JsonBody<RegisterInput>) -> Result<Response> {
    let user = state.accounts().register(input)?;
    Ok(created(user))
}

pub async fn token(State(state): State<AppState>, JsonBody(body): JsonBody<LoginBody>) -> Result<Json<TokenPair>> {
    Ok(Json(state.accounts().login(&body.username, &body.password)?))
}

pub async fn refresh(State(state): State<AppState>, JsonBody(body): JsonBody<RefreshBody>) -> Result<Json<TokenPair>> {
    Ok(Json(state.accounts().refresh(&body.refresh)?))
}

pub async fn me(caller: Caller) -> Json<UserView> {
    Json(UserView::from(&caller.user))
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<UserView>>> {
    let users = state.accounts().list_users(&caller)?;
    Ok(page(&state, users, &params))
}

pub async fn set_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(body): JsonBody<RoleBody>,
) -> Result<Json<UserView>> {
    Ok(Json(state.accounts().set_role(&caller, id, &body.role)?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<UserView>> {
    Ok(Json(state.accounts().set_active(&caller, id, false)?))
}
