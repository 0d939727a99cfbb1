use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;
use uuid::Uuid;

use super::{AuthError, TokenType};
use crate::domain::{Role, User};
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

/// The authenticated account behind a request, resolved from an
/// `Authorization: Bearer <access token>` header. The role is read from the
/// stored account, so role changes apply to tokens already issued.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: User,
}

impl Caller {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn is_elevated(&self) -> bool {
        self.user.role.is_elevated()
    }

    pub fn is_admin(&self) -> bool {
        self.user.role == Role::Admin
    }

    /// Fails with 403 unless the caller is a dispatcher or admin.
    pub fn require_elevated(&self) -> Result<(), ApiError> {
        if self.is_elevated() {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    pub fn require_role(&self, role: Role) -> Result<(), ApiError> {
        if self.user.role == role {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }
}

fn authenticate(parts: &Parts, state: &AppState) -> Result<Caller, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;
    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidToken)?;

    let claims = state.tokens.decode(token, TokenType::Access)?;
    let user = state
        .storage
        .read(|t| t.users.get(&claims.sub).cloned())
        .ok_or(AuthError::InvalidToken)?;
    if !user.is_active {
        return Err(AuthError::Inactive);
    }
    Ok(Caller { user })
}

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).map_err(|err| {
            debug!("Rejected request to {}: {}", parts.uri.path(), err);
            metrics::auth_failure(match err {
                AuthError::MissingCredentials => "missing",
                AuthError::Expired => "expired",
                AuthError::Inactive => "inactive",
                _ => "invalid",
            });
            ApiError::from(err)
        })
    }
}
