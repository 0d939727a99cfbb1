//! HTTP handlers, one module per resource. Handlers translate between HTTP
//! and the services in [`crate::app`]; they hold no business rules.

pub mod accounts;
pub mod billing;
pub mod fleet;
pub mod locations;
pub mod notifications;
pub mod pickups;
pub mod routing;
pub mod tracking;
pub mod waste;

use async_trait::async_trait;
use axum::body::{Bytes, HttpBody};
use axum::extract::FromRequest;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{BoxError, Json};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::pagination::{PageParams, Paginated};
use crate::state::AppState;

/// JSON request body whose rejections render as `{"detail": ...}` 400s
/// instead of axum's plain-text responses.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for JsonBody<T>
where
    T: DeserializeOwned,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Body that may be left out. Only an empty (or all-whitespace) body counts
/// as absent; anything else must parse, and failures are 400s like
/// [`JsonBody`].
pub struct OptionalJsonBody<T>(pub Option<T>);

#[async_trait]
impl<S, B, T> FromRequest<S, B> for OptionalJsonBody<T>
where
    T: DeserializeOwned,
    B: HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }
        serde_json::from_slice(&bytes)
            .map(|value| Self(Some(value)))
            .map_err(|e| ApiError::BadRequest(format!("Failed to parse the request body as JSON: {e}")))
    }
}

/// `{"status": "..."}` body shared by every change-status endpoint.
#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    pub reason: Option<String>,
}

/// Optional `{"reason": "..."}` body.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

pub(crate) fn page<T: Serialize>(state: &AppState, items: Vec<T>, params: &PageParams) -> Json<Paginated<T>> {
    Json(Paginated::from_items(items, params, &state.config.pagination))
}

pub(crate) fn created<T: Serialize>(value: T) -> Response {
    (StatusCode::CREATED, Json(value)).into_response()
}

pub(crate) fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}
