//! Event ingest endpoint for domain services.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::error::AppError;
use crate::events::RawEvent;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub accepted: bool,
    pub event: String,
    /// Number of bus subscribers the event was queued for
    pub subscribers: usize,
}

/// POST /api/v1/events
#[tracing::instrument(name = "api.publish_event", skip_all)]
pub async fn publish_event(
    State(state): State<AppState>,
    Json(raw): Json<RawEvent>,
) -> Result<(StatusCode, Json<PublishResponse>), AppError> {
    let event = raw.name.clone();
    let subscribers = state.publish_event(raw).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            accepted: true,
            event,
            subscribers,
        }),
    ))
}
