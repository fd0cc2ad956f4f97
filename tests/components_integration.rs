//! Cross-component integration tests
//!
//! These tests wire the broker, hub manager and hub together without starting
//! a server. Sessions are driven directly through their outbound queues.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use volunteer_gateway::broker::{Broker, BrokerError};
use volunteer_gateway::config::OverflowPolicy;
use volunteer_gateway::events::{names, BusEvent, RawEvent, DOMAIN_STREAM};
use volunteer_gateway::hub::{ChannelId, Hub};
use volunteer_gateway::hub_manager::HubManager;
use volunteer_gateway::session::{CloseCode, Session};
use volunteer_gateway::visibility::FieldVisibility;
use volunteer_gateway::websocket::{Frame, OpCode};

struct TestEnvironment {
    broker: Arc<Broker<BusEvent>>,
    hub: Arc<Hub>,
    manager: Arc<HubManager>,
    shutdown: CancellationToken,
}

async fn create_test_environment() -> TestEnvironment {
    let broker = Arc::new(Broker::with_policy(64, OverflowPolicy::Block));
    let hub = Arc::new(Hub::new());
    let manager = Arc::new(HubManager::new(hub.clone()));
    manager.start(&broker).await;

    TestEnvironment {
        broker,
        hub,
        manager,
        shutdown: CancellationToken::new(),
    }
}

impl TestEnvironment {
    fn session(&self) -> (Arc<Session>, mpsc::Receiver<Frame>) {
        Session::new(
            Duration::from_secs(30),
            Arc::new(FieldVisibility::default()),
            &self.shutdown,
        )
    }

    async fn publish(&self, name: &str, payload: serde_json::Value) -> Result<usize, BrokerError> {
        let event = BusEvent::try_from(RawEvent::new(name, payload)).unwrap();
        self.broker.publish(DOMAIN_STREAM, event).await
    }
}

async fn recv(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("outbound queue closed")
}

async fn assert_silent(rx: &mut mpsc::Receiver<Frame>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(result.is_err(), "unexpected frame: {:?}", result);
}

#[tokio::test]
async fn test_event_delivered_once_to_every_subscriber() {
    let env = create_test_environment().await;
    let (a, mut rx_a) = env.session();
    let (b, mut rx_b) = env.session();
    let (outsider, mut rx_out) = env.session();

    env.manager.register(1, &a);
    env.manager.register(2, &b);
    env.manager.register(3, &outsider);
    env.hub.subscribe(&ChannelId::conversation(7), &a);
    env.hub.subscribe(&ChannelId::conversation(7), &b);

    env.publish(names::MESSAGE_SENT, json!({"conversationId": 7}))
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = recv(rx).await;
        assert_eq!(frame.op, OpCode::Event);
        assert_eq!(frame.event.as_deref(), Some(names::MESSAGE_SENT));
        assert_silent(rx).await;
    }
    assert_silent(&mut rx_out).await;
}

#[tokio::test]
async fn test_membership_event_then_message_in_publish_order() {
    let env = create_test_environment().await;
    let (first, mut rx1) = env.session();
    let (second, mut rx2) = env.session();
    env.manager.register(42, &first);
    env.manager.register(42, &second);

    // Published back to back: the pump subscribes before it routes
    env.publish(
        names::CONVERSATION_MEMBERSHIP_CREATED,
        json!({"userId": 42, "conversationId": 9}),
    )
    .await
    .unwrap();
    env.publish(names::MESSAGE_SENT, json!({"conversationId": 9, "n": 1}))
        .await
        .unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let frame = recv(rx).await;
        assert_eq!(frame.data["n"], 1);
    }
    assert!(first.is_subscribed(&ChannelId::conversation(9)));
    assert!(second.is_subscribed(&ChannelId::conversation(9)));
}

#[tokio::test]
async fn test_publish_after_close_is_rejected() {
    let env = create_test_environment().await;
    let (session, mut rx) = env.session();
    env.manager.register(1, &session);
    env.hub.subscribe(&ChannelId::user(1), &session);

    env.broker.close().await;

    let result = env
        .publish(names::NOTIFICATION_CREATED, json!({"userId": 1}))
        .await;
    assert_eq!(result, Err(BrokerError::Closed));
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn test_closed_session_does_not_block_channel() {
    let env = create_test_environment().await;
    let (gone, _rx_gone) = env.session();
    let (live, mut rx_live) = env.session();
    let channel = ChannelId::conversation(3);
    env.hub.subscribe(&channel, &gone);
    env.hub.subscribe(&channel, &live);

    gone.close_with_error(CloseCode::GoingAway);

    for n in 0..10 {
        env.publish(names::MESSAGE_SENT, json!({"conversationId": 3, "n": n}))
            .await
            .unwrap();
    }

    for n in 0..10 {
        assert_eq!(recv(&mut rx_live).await.data["n"], n);
    }
}

#[tokio::test]
async fn test_concurrent_subscribe_unsubscribe_converges() {
    let env = create_test_environment().await;
    let channel = ChannelId::conversation(11);

    let mut sessions = Vec::new();
    for _ in 0..32 {
        sessions.push(env.session());
    }

    let mut tasks = Vec::new();
    for (i, (session, _)) in sessions.iter().enumerate() {
        let hub = env.hub.clone();
        let session = session.clone();
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..20 {
                hub.subscribe(&channel, &session);
                tokio::task::yield_now().await;
                hub.unsubscribe(&channel, &session);
            }
            // Odd sessions stay subscribed
            if i % 2 == 1 {
                hub.subscribe(&channel, &session);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(env.hub.subscriber_count(&channel), 16);
    assert!(env.hub.contains(&channel));

    for (session, _) in sessions.iter().skip(1).step_by(2) {
        env.hub.unsubscribe(&channel, session);
    }
    assert!(!env.hub.contains(&channel));
    assert_eq!(env.hub.channel_count(), 0);
}
