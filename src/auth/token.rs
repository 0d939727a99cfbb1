use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;
use crate::config::AuthConfig;
use crate::domain::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub jti: Uuid,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Issues and verifies HS256 JWTs.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.secret_key.as_bytes(),
            Duration::minutes(config.access_token_minutes),
            Duration::days(config.refresh_token_days),
        )
    }

    pub fn issue_pair(&self, user: &User, now: DateTime<Utc>) -> Result<TokenPair, AuthError> {
        Ok(TokenPair {
            access: self.issue(user, TokenType::Access, now)?,
            refresh: self.issue(user, TokenType::Refresh, now)?,
        })
    }

    pub fn issue(&self, user: &User, token_type: TokenType, now: DateTime<Utc>) -> Result<String, AuthError> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user.id,
            role: user.role,
            jti: Uuid::new_v4(),
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Crypto(e.to_string()))
    }

    /// Verify signature and expiry, then check the token is of the expected type.
    pub fn decode(&self, token: &str, expected: TokenType) -> Result<Claims, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            }
        })?;
        if data.claims.token_type != expected {
            return Err(AuthError::WrongTokenType);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: "dispatch".to_string(),
            email: "dispatch@example.org".to_string(),
            password_hash: String::new(),
            role,
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    fn service() -> TokenService {
        TokenService::new(b"test-secret-key-0123456789", Duration::minutes(5), Duration::days(1))
    }

    #[test]
    fn issued_tokens_decode_with_their_type() {
        let svc = service();
        let u = user(Role::Dispatcher);
        let pair = svc.issue_pair(&u, Utc::now()).unwrap();

        let access = svc.decode(&pair.access, TokenType::Access).unwrap();
        assert_eq!(access.sub, u.id);
        assert_eq!(access.role, Role::Dispatcher);

        assert_eq!(svc.decode(&pair.access, TokenType::Refresh), Err(AuthError::WrongTokenType));
        assert!(svc.decode(&pair.refresh, TokenType::Refresh).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let svc = service();
        let issued = Utc::now() - Duration::minutes(10);
        let token = svc.issue(&user(Role::Citizen), TokenType::Access, issued).unwrap();
        assert_eq!(svc.decode(&token, TokenType::Access), Err(AuthError::Expired));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let svc = service();
        let token = svc.issue(&user(Role::Citizen), TokenType::Access, Utc::now()).unwrap();

        let other = TokenService::new(b"another-secret-key-987654", Duration::minutes(5), Duration::days(1));
        assert_eq!(other.decode(&token, TokenType::Access), Err(AuthError::InvalidToken));

        // Re-sign the same claims as admin with a different key
        let mut claims = svc.decode(&token, TokenType::Access).unwrap();
        claims.role = Role::Admin;
        let forged = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"guessed-secret"),
        )
        .unwrap();
        assert_eq!(svc.decode(&forged, TokenType::Access), Err(AuthError::InvalidToken));

        assert_eq!(svc.decode("garbage", TokenType::Access), Err(AuthError::InvalidToken));
    }
}
