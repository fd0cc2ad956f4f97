//! Topic fanout for live sessions.
//!
//! A [`Hub`] owns one [`Channel`] per topic that currently has subscribers.
//! Each channel runs its own fanout loop that delivers routed events to its
//! sessions one at a time, in arrival order.

mod channel;
mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::ConversationId;
use crate::session::UserId;

pub use channel::{Channel, CHANNEL_BUFFER_SIZE};
pub use registry::{Hub, HubStats};

/// Topic key within the hub, e.g. `conversation/7` or `user/42`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Personal channel of a user
    pub fn user(user_id: UserId) -> Self {
        Self(format!("user/{}", user_id))
    }

    pub fn conversation(conversation_id: ConversationId) -> Self {
        Self(format!("conversation/{}", conversation_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event on its way to the sessions of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct HubEvent {
    pub name: String,
    pub payload: Value,
    /// User the event belongs to, for visibility scoping
    pub owner: Option<UserId>,
}
