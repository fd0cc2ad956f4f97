use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::metrics::{EventMetrics, CHANNELS_ACTIVE};
use crate::session::Session;

use super::{Channel, ChannelId, HubEvent};

#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub total_channels: usize,
    pub channels: BTreeMap<String, usize>,
}

/// Registry of live channels.
///
/// Creation and removal happen while holding the channel's map entry, so a
/// channel is registered exactly when it has at least one subscriber.
#[derive(Default)]
pub struct Hub {
    channels: DashMap<ChannelId, Arc<Channel>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `session` to `id`, creating the channel on first use.
    ///
    /// Returns false if the session is closing (nothing is registered) or was
    /// already subscribed.
    pub fn subscribe(&self, id: &ChannelId, session: &Arc<Session>) -> bool {
        match self.channels.entry(id.clone()) {
            Entry::Occupied(entry) => {
                // Track before checking closed: teardown closes first, then reads the set
                session.track_subscription(id.clone());
                if session.is_closed() {
                    session.untrack_subscription(id);
                    return false;
                }
                entry.get().subscribe(session.clone())
            }
            Entry::Vacant(entry) => {
                session.track_subscription(id.clone());
                if session.is_closed() {
                    session.untrack_subscription(id);
                    return false;
                }
                let channel = Channel::spawn(id.clone());
                channel.subscribe(session.clone());
                entry.insert(channel);
                CHANNELS_ACTIVE.inc();
                tracing::debug!(channel = %id, "Channel created");
                true
            }
        }
    }

    /// Remove `session` from `id`, destroying the channel once it is empty.
    pub fn unsubscribe(&self, id: &ChannelId, session: &Session) -> bool {
        let was_tracked = session.untrack_subscription(id);

        if let Entry::Occupied(entry) = self.channels.entry(id.clone()) {
            if entry.get().unsubscribe(session.id()) {
                entry.remove();
                CHANNELS_ACTIVE.dec();
                tracing::debug!(channel = %id, "Channel removed");
            }
        }

        was_tracked
    }

    /// Queue `event` for every subscriber of `id`.
    ///
    /// A channel without subscribers does not exist, so routing to it drops the
    /// event. Waits while the channel's inbound queue is full.
    pub async fn route_message(&self, id: &ChannelId, event: Arc<HubEvent>) -> bool {
        let channel = self.channels.get(id).map(|entry| entry.value().clone());

        match channel {
            Some(channel) => {
                EventMetrics::record_routed(&event.name);
                channel.enqueue(event).await
            }
            None => {
                tracing::trace!(channel = %id, event = %event.name, "No subscribers, event dropped");
                false
            }
        }
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    pub fn is_subscribed(&self, id: &ChannelId, session: &Session) -> bool {
        self.channels
            .get(id)
            .map(|channel| channel.is_subscribed(session.id()))
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, id: &ChannelId) -> usize {
        self.channels
            .get(id)
            .map(|channel| channel.subscriber_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn stats(&self) -> HubStats {
        let channels: BTreeMap<String, usize> = self
            .channels
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().subscriber_count()))
            .collect();

        HubStats {
            total_channels: channels.len(),
            channels,
        }
    }
}
