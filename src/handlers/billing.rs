use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::{created, page, JsonBody, OptionalJsonBody};
use crate::app::billing::{GenerateInput, InvoiceInput, MarkPaidInput};
use crate::auth::Caller;
use crate::domain::{Invoice, Payment};
use crate::error::Result;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

pub async fn list_invoices(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Invoice>> {
    page(&state, state.billing().list_invoices(&caller), &params)
}

pub async fn create_invoice(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<InvoiceInput>,
) -> Result<Response> {
    Ok(created(state.billing().create_invoice(&caller, input)?))
}

pub async fn get_invoice(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Invoice>> {
    Ok(Json(state.billing().get_invoice(&caller, id)?))
}

/// The body is optional and defaults to a cash payment without reference.
pub async fn mark_paid(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    OptionalJsonBody(body): OptionalJsonBody<MarkPaidInput>,
) -> Result<Json<serde_json::Value>> {
    let input = body.unwrap_or_default();
    let (invoice, payment) = state.billing().mark_paid(&caller, id, input)?;
    Ok(Json(serde_json::json!({
        "detail": "Invoice marked as paid",
        "invoice": invoice,
        "payment": payment,
    })))
}

pub async fn generate_from_pickups(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(input): JsonBody<GenerateInput>,
) -> Result<Response> {
    Ok(created(state.billing().generate_from_pickups(&caller, input)?))
}

pub async fn list_payments(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<PageParams>,
) -> Json<Paginated<Payment>> {
    page(&state, state.billing().list_payments(&caller), &params)
}

pub async fn get_payment(State(state): State<AppState>, caller: Caller, Path(id): Path<Uuid>) -> Result<Json<Payment>> {
    Ok(Json(state.billing().get_payment(&caller, id)?))
}
