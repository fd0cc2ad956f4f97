use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::session::UserId;

use super::AuthError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (numeric user ID, string-encoded as JWT requires)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Additional custom claims
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn new(user_id: UserId, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            exp: now + ttl_seconds,
            iat: now,
            extra: HashMap::new(),
        }
    }

    /// Parse the subject as a user ID. Zero is reserved for unauthenticated sessions.
    pub fn user_id(&self) -> Result<UserId, AuthError> {
        match self.sub.parse::<UserId>() {
            Ok(0) | Err(_) => Err(AuthError::InvalidSubject(self.sub.clone())),
            Ok(id) => Ok(id),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.exp < chrono::Utc::now().timestamp()
    }
}
