//! Domain events carried on the in-process bus.
//!
//! External services publish [`RawEvent`]s (a name plus a JSON payload). They
//! are decoded exactly once, at the bus boundary, into the closed
//! [`DomainEvent`] enum; only decoded events ever reach the broker.

mod types;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use types::{
    names, ConversationId, ConversationMembership, DomainEvent, MessageEvent, NotificationEvent,
    OrganizationId, OrganizationMembership,
};

use crate::session::UserId;

/// Stream the hub manager consumes
pub const DOMAIN_STREAM: &str = "domain";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
}

/// Event as received at the boundary, before decoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<EventContext>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            context: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("event name is empty")]
    MissingName,

    #[error("invalid payload for {name}: {source}")]
    InvalidPayload {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid payload for {name}: {field} must be non-zero")]
    ZeroId { name: String, field: &'static str },
}

/// Decoded event as carried by the broker
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event: DomainEvent,
    pub context: Option<EventContext>,
}

impl BusEvent {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            event,
            context: None,
        }
    }

    pub fn name(&self) -> &str {
        self.event.name()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.context
            .as_ref()
            .and_then(|c| c.correlation_id.as_deref())
    }
}

impl TryFrom<RawEvent> for BusEvent {
    type Error = EventDecodeError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            event: DomainEvent::decode(&raw.name, raw.payload)?,
            context: raw.context,
        })
    }
}
