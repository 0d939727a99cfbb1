use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use validator::Validate;

use super::not_blank;
use crate::auth::{hash_password, verify_password, AuthError, Caller, TokenPair, TokenService, TokenType};
use crate::config::{AuthConfig, BootstrapAdmin};
use crate::domain::account::{validate_password, validate_username};
use crate::domain::{Role, User, UserView};
use crate::error::{ApiError, Result};
use crate::metrics;
use crate::storage::InMemoryStorage;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterInput {
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    #[validate(email(message = "enter a valid email address"))]
    pub email: String,
    #[validate(custom(function = "validate_password"))]
    pub password: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub first_name: String,
    #[serde(default)]
    #[validate(length(max = 150))]
    pub last_name: String,
}

pub struct AccountService<'a> {
    storage: &'a InMemoryStorage,
    tokens: &'a TokenService,
    config: &'a AuthConfig,
}

impl<'a> AccountService<'a> {
    pub fn new(storage: &'a InMemoryStorage, tokens: &'a TokenService, config: &'a AuthConfig) -> Self {
        Self { storage, tokens, config }
    }

    /// Public sign-up. New accounts are always citizens.
    pub fn register(&self, input: RegisterInput) -> Result<UserView> {
        let user = self.create_user(input, Role::Citizen)?;
        Ok(UserView::from(&user))
    }

    /// Create an account with an explicit role (CLI, bootstrap).
    pub fn create_user(&self, input: RegisterInput, role: Role) -> Result<User> {
        let input = RegisterInput {
            username: input.username.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            ..input
        };
        input.validate()?;

        // Hash outside the write lock; it is deliberately slow.
        let password_hash = hash_password(&input.password, self.config.password_rounds)?;
        let user = User {
            id: Uuid::new_v4(),
            username: input.username,
            email: input.email,
            password_hash,
            role,
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        };

        self.storage.write(|t| {
            if t.user_by_username(&user.username).is_some() {
                return Err(ApiError::Conflict("A user with that username already exists.".to_string()));
            }
            if t.user_by_email(&user.email).is_some() {
                return Err(ApiError::Conflict("A user with that email already exists.".to_string()));
            }
            t.users.insert(user.id, user.clone());
            Ok::<_, ApiError>(())
        })?;
        info!(user_id = %user.id, role = user.role.as_str(), "Created account {}", user.username);
        Ok(user)
    }

    /// Exchange credentials for an access/refresh token pair.
    pub fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let user = self
            .storage
            .read(|t| t.user_by_username(username.trim()).cloned())
            .filter(|u| u.is_active && verify_password(password, &u.password_hash));
        let Some(user) = user else {
            metrics::auth_failure("credentials");
            return Err(AuthError::InvalidCredentials.into());
        };

        let now = Utc::now();
        let pair = self.tokens.issue_pair(&user, now)?;
        self.storage.write(|t| {
            if let Some(stored) = t.users.get_mut(&user.id) {
                stored.last_login = Some(now);
            }
            Ok::<_, ApiError>(())
        })?;
        info!(user_id = %user.id, "Issued tokens");
        Ok(pair)
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair
    /// is issued. Reusing a revoked refresh token fails.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let now = Utc::now();
        let claims = self.tokens.decode(refresh_token, TokenType::Refresh)?;

        self.storage.write(|t| {
            if t.is_token_revoked(claims.jti) {
                return Err(AuthError::Revoked.into());
            }
            let user = t
                .users
                .get(&claims.sub)
                .filter(|u| u.is_active)
                .cloned()
                .ok_or(AuthError::InvalidCredentials)?;
            let pair = self.tokens.issue_pair(&user, now)?;
            t.revoke_token(claims.jti, claims.expires_at(), now);
            Ok::<_, ApiError>(pair)
        })
    }

    pub fn list_users(&self, caller: &Caller) -> Result<Vec<UserView>> {
        caller.require_elevated()?;
        let mut users: Vec<UserView> = self
            .storage
            .read(|t| t.users.values().map(UserView::from).collect());
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    pub fn set_role(&self, caller: &Caller, user_id: Uuid, role: &str) -> Result<UserView> {
        caller.require_admin()?;
        let role: Role = crate::domain::parse_choice(role)
            .ok_or_else(|| ApiError::bad_request(format!("\"{role}\" is not a valid role.")))?;
        if user_id == caller.id() && role != Role::Admin {
            return Err(ApiError::bad_request("Admins cannot demote themselves."));
        }
        let view = self.storage.write(|t| {
            let user = t.users.get_mut(&user_id).ok_or_else(|| ApiError::not_found("User"))?;
            user.role = role;
            Ok::<_, ApiError>(UserView::from(&*user))
        })?;
        info!(user_id = %user_id, role = role.as_str(), "Changed account role");
        Ok(view)
    }

    pub fn set_active(&self, caller: &Caller, user_id: Uuid, active: bool) -> Result<UserView> {
        caller.require_admin()?;
        if user_id == caller.id() && !active {
            return Err(ApiError::bad_request("Admins cannot deactivate themselves."));
        }
        self.storage.write(|t| {
            let user = t.users.get_mut(&user_id).ok_or_else(|| ApiError::not_found("User"))?;
            user.is_active = active;
            Ok(UserView::from(&*user))
        })
    }

    /// Create the configured administrator unless the username is taken.
    pub fn ensure_bootstrap_admin(&self, admin: &BootstrapAdmin) -> Result<bool> {
        not_blank(&admin.username).map_err(|_| ApiError::bad_request("bootstrap username may not be blank"))?;
        if self.storage.read(|t| t.user_by_username(&admin.username).is_some()) {
            return Ok(false);
        }
        self.create_user(
            RegisterInput {
                username: admin.username.clone(),
                email: admin.email.clone(),
                password: admin.password.clone(),
                first_name: String::new(),
                last_name: String::new(),
            },
            Role::Admin,
        )?;
        Ok(true)
    }
}
