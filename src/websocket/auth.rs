use std::sync::Arc;

use axum::http::{header, HeaderMap};

use crate::hub::ChannelId;
use crate::server::AppState;
use crate::session::{CloseCode, Session, UserId};

use super::ServerMessage;

/// Authorization header as presented on the upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHeader {
    Absent,
    Bearer(String),
    /// Present but not a usable `Bearer <token>`
    Malformed,
}

impl AuthHeader {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(value) = headers.get(header::AUTHORIZATION) else {
            return Self::Absent;
        };

        match value.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
            Some(token) if !token.trim().is_empty() => Self::Bearer(token.trim().to_string()),
            _ => Self::Malformed,
        }
    }
}

/// Promote `session` to an authenticated user session.
///
/// Verifies the token, registers the session with the hub manager, resolves
/// the user's channels and subscribes to them, then sends
/// `AuthenticationSuccess`. On failure returns the code to close with.
#[tracing::instrument(name = "ws.authenticate", skip_all, fields(session_id = %session.id()))]
pub async fn authenticate(
    state: &AppState,
    session: &Arc<Session>,
    token: &str,
) -> Result<UserId, CloseCode> {
    if let Some(user_id) = session.user_id() {
        tracing::warn!(user_id, "Session already authenticated, ignoring");
        return Ok(user_id);
    }

    let user_id = match state.verifier.verify(token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "Token verification failed");
            return Err(CloseCode::Unauthorized);
        }
    };

    if !session.set_user_id(user_id) {
        // Lost a race with a concurrent authentication on the same session
        return session.user_id().ok_or(CloseCode::Unauthorized);
    }

    // Register before resolving so membership events that land meanwhile
    // reach this session through the hub manager
    if !state.hub_manager.register(user_id, session) {
        return Err(session.close_code().unwrap_or(CloseCode::GoingAway));
    }

    let channels = match state.resolver.channels_for_user(user_id).await {
        Ok(channels) => channels,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Failed to resolve channels");
            return Err(CloseCode::UnableToGetChannels);
        }
    };

    state.hub.subscribe(&ChannelId::user(user_id), session);
    for channel in &channels {
        state.hub.subscribe(channel, session);
    }

    if session
        .send_message(ServerMessage::AuthenticationSuccess { user_id })
        .await
        .is_err()
    {
        return Err(session.close_code().unwrap_or(CloseCode::GoingAway));
    }

    tracing::info!(user_id, channels = channels.len() + 1, "Session authenticated");
    Ok(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_auth_header_parsing() {
        assert_eq!(AuthHeader::from_headers(&HeaderMap::new()), AuthHeader::Absent);
        assert_eq!(
            AuthHeader::from_headers(&headers("Bearer abc.def")),
            AuthHeader::Bearer("abc.def".into())
        );
        assert_eq!(AuthHeader::from_headers(&headers("Basic xyz")), AuthHeader::Malformed);
        assert_eq!(AuthHeader::from_headers(&headers("Bearer ")), AuthHeader::Malformed);
    }
}
