//! Resolution of the hub channels a user belongs to.
//!
//! A session subscribes at authentication time to its personal channel plus
//! every conversation channel returned by a [`ChannelResolver`]: direct
//! conversation memberships and conversations of organizations the user is a
//! member of.

mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::DomainEvent;
use crate::hub::ChannelId;
use crate::session::UserId;

pub use memory::MembershipDirectory;
pub use postgres::{connect_pool, mask_database_url, PostgresChannelResolver};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Membership lookup unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ChannelResolver: Send + Sync {
    /// Conversation channels for `user_id`, excluding the personal channel
    async fn channels_for_user(&self, user_id: UserId) -> Result<Vec<ChannelId>, ResolveError>;

    /// Take note of a membership change seen on the domain stream. Resolvers
    /// backed by the system of record have nothing to do here.
    async fn record(&self, _event: &DomainEvent) {}
}
