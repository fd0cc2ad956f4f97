use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;

use super::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Guards the event ingest routes with the shared `api.key`.
///
/// Without a configured key every caller is let through.
pub async fn api_key_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.settings.api.key.as_deref() else {
        return Ok(next.run(req).await);
    };

    match req.headers().get(API_KEY_HEADER).map(|v| v.to_str()) {
        Some(Ok(key)) if key == expected => Ok(next.run(req).await),
        Some(_) => Err(AppError::Auth("Invalid API key".to_string())),
        None => Err(AppError::Auth(format!("Missing {} header", API_KEY_HEADER))),
    }
}
