//! Bearer-token authentication: password hashing, HS256 tokens with
//! access/refresh rotation, and the request extractor that resolves the
//! calling account.

mod extractor;
mod password;
mod token;

pub use extractor::Caller;
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenPair, TokenService, TokenType};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication credentials were not provided.")]
    MissingCredentials,

    #[error("Given token not valid for any token type")]
    InvalidToken,

    #[error("Token is expired")]
    Expired,

    #[error("Token has wrong type")]
    WrongTokenType,

    #[error("Token is blacklisted")]
    Revoked,

    #[error("No active account found with the given credentials")]
    InvalidCredentials,

    #[error("User is inactive")]
    Inactive,

    #[error("Crypto failure: {0}")]
    Crypto(String),
}
