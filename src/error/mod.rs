use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::events::EventDecodeError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventDecodeError),

    #[error("Event bus unavailable: {0}")]
    Broker(#[from] BrokerError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

fn redact(detail: String, generic: &str) -> String {
    if is_production() {
        generic.to_string()
    } else {
        detail
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let log_message = self.to_string();
        let (status, code, client_message) = match &self {
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                redact(log_message.clone(), "Configuration error"),
            ),
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::InvalidEvent(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_EVENT",
                e.to_string(),
            ),
            AppError::Broker(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BROKER_CLOSED",
                "Event bus is shutting down".to_string(),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                redact(log_message.clone(), "Internal server error"),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                redact(log_message.clone(), "Service temporarily unavailable"),
            ),
        };

        if status.is_server_error() {
            tracing::error!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API error"
            );
        } else {
            tracing::warn!(
                code = %code,
                status = %status.as_u16(),
                message = %log_message,
                "API request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let resp = AppError::Broker(BrokerError::Closed).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = AppError::InvalidEvent(EventDecodeError::MissingName).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = AppError::Auth("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
