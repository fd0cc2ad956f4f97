//! PostgreSQL-backed channel resolution.
//!
//! Reads the platform's membership tables:
//! - `conversation_memberships (user_id, conversation_id)`
//! - `organization_memberships (user_id, organization_id)`
//! - `conversations (id, organization_id)`

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::hub::ChannelId;
use crate::session::UserId;

use super::{ChannelResolver, ResolveError};

const CHANNELS_FOR_USER: &str = r#"
    SELECT cm.conversation_id
    FROM conversation_memberships cm
    WHERE cm.user_id = $1
    UNION
    SELECT c.id
    FROM conversations c
    JOIN organization_memberships om ON om.organization_id = c.organization_id
    WHERE om.user_id = $1
    ORDER BY 1
"#;

/// Create a connection pool from configuration.
pub async fn connect_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds as u64))
        .connect(&config.url)
        .await?;

    tracing::info!(
        pool_size = config.pool_size,
        url = %mask_database_url(&config.url),
        "PostgreSQL connection pool created"
    );

    Ok(pool)
}

/// Mask the password in a database URL for logging.
pub fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // A colon right after the scheme is not a password separator
            if !url[..colon_pos].ends_with("postgres") && !url[..colon_pos].ends_with("postgresql") {
                return format!("{}***{}", &url[..colon_pos + 1], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

pub struct PostgresChannelResolver {
    pool: PgPool,
}

impl PostgresChannelResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelResolver for PostgresChannelResolver {
    async fn channels_for_user(&self, user_id: UserId) -> Result<Vec<ChannelId>, ResolveError> {
        let user_id = i64::try_from(user_id)
            .map_err(|_| ResolveError::Unavailable(format!("user id {} out of range", user_id)))?;

        let rows: Vec<i64> = sqlx::query_scalar(CHANNELS_FOR_USER)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let channels = rows
            .into_iter()
            .filter_map(|id| u64::try_from(id).ok())
            .map(ChannelId::conversation)
            .collect();

        Ok(channels)
    }
}
