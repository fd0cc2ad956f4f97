//! Bearer-token verification for WebSocket sessions.

mod claims;
mod jwt;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::UserId;

pub use claims::Claims;
pub use jwt::JwtValidator;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token subject is not a user ID: {0}")]
    InvalidSubject(String),
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}
