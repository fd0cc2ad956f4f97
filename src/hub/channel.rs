use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::session::{Session, SessionId};
use crate::websocket::ServerMessage;

use super::{ChannelId, HubEvent};

/// Capacity of a channel's inbound queue
pub const CHANNEL_BUFFER_SIZE: usize = 128;

type Subscribers = Arc<DashMap<SessionId, Arc<Session>>>;

/// Fanout unit for one topic.
///
/// Dropping the last handle to a channel closes its inbound queue; the fanout
/// loop drains what is left and exits.
pub struct Channel {
    id: ChannelId,
    inbound: mpsc::Sender<Arc<HubEvent>>,
    subscribers: Subscribers,
}

impl Channel {
    /// Create a channel and start its fanout loop. Must be called within a Tokio runtime.
    pub fn spawn(id: ChannelId) -> Arc<Self> {
        let (inbound, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let subscribers: Subscribers = Arc::new(DashMap::new());

        tokio::spawn(fanout_loop(id.clone(), rx, subscribers.clone()));

        Arc::new(Self {
            id,
            inbound,
            subscribers,
        })
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Add a session; returns false if it was already subscribed.
    pub fn subscribe(&self, session: Arc<Session>) -> bool {
        self.subscribers.insert(session.id(), session).is_none()
    }

    /// Remove a session; returns whether the channel is now empty.
    pub fn unsubscribe(&self, session_id: SessionId) -> bool {
        self.subscribers.remove(&session_id);
        self.subscribers.is_empty()
    }

    pub fn is_subscribed(&self, session_id: SessionId) -> bool {
        self.subscribers.contains_key(&session_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Queue an event for fanout. Waits while the inbound queue is full.
    pub async fn enqueue(&self, event: Arc<HubEvent>) -> bool {
        self.inbound.send(event).await.is_ok()
    }
}

async fn fanout_loop(
    id: ChannelId,
    mut rx: mpsc::Receiver<Arc<HubEvent>>,
    subscribers: Subscribers,
) {
    tracing::debug!(channel = %id, "Channel fanout started");

    while let Some(event) = rx.recv().await {
        let recipients: Vec<Arc<Session>> =
            subscribers.iter().map(|entry| entry.value().clone()).collect();

        for session in recipients {
            if session
                .send_message(ServerMessage::Event(event.clone()))
                .await
                .is_err()
            {
                tracing::trace!(
                    channel = %id,
                    session_id = %session.id(),
                    event = %event.name,
                    "Skipped closed session"
                );
            }
        }
    }

    tracing::debug!(channel = %id, "Channel fanout stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use crate::visibility::FieldVisibility;
    use crate::websocket::Frame;

    fn session() -> (Arc<Session>, mpsc::Receiver<Frame>) {
        Session::new(
            Duration::from_secs(30),
            Arc::new(FieldVisibility::default()),
            &CancellationToken::new(),
        )
    }

    fn event(n: u64) -> Arc<HubEvent> {
        Arc::new(HubEvent {
            name: "messages.MESSAGE_SENT".into(),
            payload: serde_json::json!({ "n": n }),
            owner: None,
        })
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let channel = Channel::spawn(ChannelId::conversation(1));
        let (a, _ra) = session();
        let (b, _rb) = session();

        assert!(channel.subscribe(a.clone()));
        assert!(!channel.subscribe(a.clone()));
        assert!(channel.subscribe(b.clone()));
        assert_eq!(channel.subscriber_count(), 2);

        assert!(!channel.unsubscribe(a.id()));
        assert!(channel.unsubscribe(b.id()));
        assert!(channel.unsubscribe(b.id()));
    }

    #[tokio::test]
    async fn test_fanout_preserves_order_per_session() {
        let channel = Channel::spawn(ChannelId::conversation(1));
        let (a, mut ra) = session();
        let (b, mut rb) = session();
        channel.subscribe(a);
        channel.subscribe(b);

        for n in 0..3 {
            assert!(channel.enqueue(event(n)).await);
        }

        for n in 0..3 {
            let fa = tokio::time::timeout(Duration::from_secs(1), ra.recv()).await.unwrap().unwrap();
            let fb = tokio::time::timeout(Duration::from_secs(1), rb.recv()).await.unwrap().unwrap();
            assert_eq!(fa.data["n"], n);
            assert_eq!(fb.data["n"], n);
            assert_eq!(fa.sequence_number, n);
        }
    }

    #[tokio::test]
    async fn test_closed_subscriber_does_not_stall_others() {
        let channel = Channel::spawn(ChannelId::conversation(1));
        let (dead, _keep_rx) = session();
        let (live, mut rx) = session();
        dead.close_with_error(crate::session::CloseCode::Timeout);
        channel.subscribe(dead);
        channel.subscribe(live);

        channel.enqueue(event(1)).await;

        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(frame.data["n"], 1);
    }
}
