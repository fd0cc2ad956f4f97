//! Per-connection session actor state

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::hub::ChannelId;
use crate::visibility::{Projector, Scope};
use crate::websocket::{Frame, ServerMessage};

use super::CloseCode;

pub type SessionId = Uuid;
pub type UserId = u64;

/// Capacity of a session's outbound frame queue
pub const OUTBOUND_BUFFER_SIZE: usize = 4;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("session closed")]
    Closed,
}

/// One live connection.
///
/// The reader and writer tasks share a session through `Arc`. Everything that
/// can block (enqueueing a frame, waiting for a heartbeat) also watches the
/// session's cancellation token, so closing never depends on which task is
/// still running.
pub struct Session {
    id: SessionId,
    /// 0 until authenticated
    user_id: AtomicU64,
    /// Next sequence number; held across the enqueue so wire order matches stamp order
    sequence: Mutex<u64>,
    outbound: mpsc::Sender<Frame>,
    closed: AtomicBool,
    close_code: OnceLock<CloseCode>,
    cancel: CancellationToken,
    heartbeat: Notify,
    heartbeat_timeout: Duration,
    subscriptions: DashSet<ChannelId>,
    projector: Arc<dyn Projector>,
    connected_at: DateTime<Utc>,
}

impl Session {
    /// Create an unauthenticated session. The returned receiver is the
    /// outbound queue the writer drains.
    pub fn new(
        heartbeat_timeout: Duration,
        projector: Arc<dyn Projector>,
        parent: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: AtomicU64::new(0),
            sequence: Mutex::new(0),
            outbound,
            closed: AtomicBool::new(false),
            close_code: OnceLock::new(),
            cancel: parent.child_token(),
            heartbeat: Notify::new(),
            heartbeat_timeout,
            subscriptions: DashSet::new(),
            projector,
            connected_at: Utc::now(),
        });
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self.user_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    /// Promote the session to `user_id`. Fails if it is already authenticated.
    pub fn set_user_id(&self, user_id: UserId) -> bool {
        user_id != 0
            && self
                .user_id
                .compare_exchange(0, user_id, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Stamp, project and enqueue a message for the client.
    ///
    /// Blocks while the outbound queue is full, which pushes back on whoever
    /// is delivering to this session. Fails once the session is closed.
    pub async fn send_message(&self, message: ServerMessage) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let mut sequence = self.sequence.lock().await;
        let frame = match &message {
            ServerMessage::Event(event) => {
                let scope = Scope::for_recipient(self.user_id(), event.owner);
                Frame {
                    op: message.op(),
                    event: Some(event.name.clone()),
                    data: self.projector.project(scope, &event.name, &event.payload),
                    sequence_number: *sequence,
                }
            }
            _ => Frame {
                op: message.op(),
                event: None,
                data: message.control_payload(),
                sequence_number: *sequence,
            },
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Closed),
            sent = self.outbound.send(frame) => sent.map_err(|_| SessionError::Closed)?,
        }
        *sequence += 1;
        Ok(())
    }

    /// Request termination with `code`.
    ///
    /// Only the first call records a code; returns whether this call did.
    pub fn close_with_error(&self, code: CloseCode) -> bool {
        let first = self.close_code.set(code).is_ok();
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if first {
            tracing::debug!(session_id = %self.id, close_code = %code, "Session close requested");
        }
        first
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code.get().copied()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Resolves once the session is closed or the process is shutting down.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Reset the heartbeat timer
    pub fn record_heartbeat(&self) {
        self.heartbeat.notify_one();
    }

    pub async fn heartbeat_received(&self) {
        self.heartbeat.notified().await
    }

    pub(crate) fn track_subscription(&self, channel: ChannelId) -> bool {
        self.subscriptions.insert(channel)
    }

    pub(crate) fn untrack_subscription(&self, channel: &ChannelId) -> bool {
        self.subscriptions.remove(channel).is_some()
    }

    pub fn is_subscribed(&self, channel: &ChannelId) -> bool {
        self.subscriptions.contains(channel)
    }

    pub fn subscriptions(&self) -> Vec<ChannelId> {
        self.subscriptions.iter().map(|c| c.key().clone()).collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubEvent;
    use crate::visibility::FieldVisibility;
    use crate::websocket::OpCode;
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn new_session() -> (Arc<Session>, mpsc::Receiver<Frame>) {
        Session::new(
            Duration::from_secs(30),
            Arc::new(FieldVisibility::default()),
            &CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase_from_zero() {
        let (session, mut rx) = new_session();

        session
            .send_message(ServerMessage::Hello {
                heartbeat_interval_ms: 1000,
            })
            .await
            .unwrap();
        session.send_message(ServerMessage::HeartbeatAck).await.unwrap();
        session.send_message(ServerMessage::HeartbeatAck).await.unwrap();

        let seqs: Vec<u64> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|f| f.sequence_number)
        .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_concurrent_senders_keep_wire_order() {
        let (session, mut rx) = new_session();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    session.send_message(ServerMessage::HeartbeatAck).await.unwrap();
                }
            }));
        }

        let mut last = None;
        for _ in 0..80 {
            let frame = rx.recv().await.unwrap();
            if let Some(prev) = last {
                assert!(frame.sequence_number > prev);
            }
            last = Some(frame.sequence_number);
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, _rx) = new_session();

        assert!(session.close_with_error(CloseCode::Timeout));
        assert!(!session.close_with_error(CloseCode::Unsupported));

        assert_eq!(session.close_code(), Some(CloseCode::Timeout));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (session, _rx) = new_session();
        session.close_with_error(CloseCode::Normal);

        let result = session.send_message(ServerMessage::HeartbeatAck).await;
        assert_eq!(result, Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn test_blocked_send_released_by_close() {
        let (session, _rx) = new_session();
        for _ in 0..OUTBOUND_BUFFER_SIZE {
            session.send_message(ServerMessage::HeartbeatAck).await.unwrap();
        }

        let mut blocked = task::spawn(session.send_message(ServerMessage::HeartbeatAck));
        assert_pending!(blocked.poll());

        session.close_with_error(CloseCode::Timeout);
        assert!(blocked.is_woken());
        assert_ready_eq!(blocked.poll(), Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn test_parent_cancellation_closes_session() {
        let parent = CancellationToken::new();
        let (session, _rx) = Session::new(
            Duration::from_secs(30),
            Arc::new(FieldVisibility::default()),
            &parent,
        );

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), session.cancelled())
            .await
            .unwrap();
        assert!(session.is_closed());
        assert_eq!(session.close_code(), None);
    }

    #[test]
    fn test_user_id_set_once() {
        let (session, _rx) = new_session();
        assert_eq!(session.user_id(), None);
        assert!(!session.set_user_id(0));
        assert!(session.set_user_id(42));
        assert!(!session.set_user_id(43));
        assert_eq!(session.user_id(), Some(42));
    }

    #[tokio::test]
    async fn test_event_payload_projected_per_recipient() {
        let (session, mut rx) = new_session();
        session.set_user_id(1);

        let event = Arc::new(HubEvent {
            name: "messages.MESSAGE_SENT".into(),
            payload: json!({"conversationId": 7, "sender": {"id": 42, "email": "a@x"}}),
            owner: Some(42),
        });
        session
            .send_message(ServerMessage::Event(event))
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.op, OpCode::Event);
        assert_eq!(frame.event.as_deref(), Some("messages.MESSAGE_SENT"));
        assert_eq!(frame.data, json!({"conversationId": 7, "sender": {"id": 42}}));
    }
}
