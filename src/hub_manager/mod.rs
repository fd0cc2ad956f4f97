//! Bridge between the domain event bus and live hub subscriptions.
//!
//! The [`HubManager`] knows which sessions belong to which user. It is the only
//! consumer of the domain stream: membership changes become subscribe or
//! unsubscribe calls on every session of the affected user, and deliverable
//! events are routed into the hub.
//!
//! A user can belong to a conversation directly and through one or more
//! organizations. When a [`ChannelResolver`] is attached, removals are checked
//! against it so a channel the user still reaches another way stays subscribed.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::broker::Broker;
use crate::events::{BusEvent, ConversationId, DomainEvent, DOMAIN_STREAM};
use crate::hub::{ChannelId, Hub};
use crate::membership::ChannelResolver;
use crate::metrics::{SESSIONS_AUTHENTICATED, USERS_CONNECTED};
use crate::session::{Session, SessionId, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct HubManagerStats {
    pub users: usize,
    pub sessions: usize,
}

pub struct HubManager {
    hub: Arc<Hub>,
    /// user_id -> live authenticated sessions (supports multiple devices)
    users: DashMap<UserId, HashMap<SessionId, Arc<Session>>>,
    resolver: Option<Arc<dyn ChannelResolver>>,
}

impl HubManager {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            users: DashMap::new(),
            resolver: None,
        }
    }

    /// Manager that records membership events with `resolver` and consults
    /// it before dropping a conversation channel.
    pub fn with_resolver(hub: Arc<Hub>, resolver: Arc<dyn ChannelResolver>) -> Self {
        Self {
            resolver: Some(resolver),
            ..Self::new(hub)
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Register an authenticated session under `user_id`.
    ///
    /// Returns false if the session started closing, in which case nothing
    /// stays registered.
    pub fn register(&self, user_id: UserId, session: &Arc<Session>) -> bool {
        let inserted = {
            let mut sessions = self.users.entry(user_id).or_default();
            sessions.insert(session.id(), session.clone()).is_none()
        };
        if inserted {
            SESSIONS_AUTHENTICATED.inc();
        }
        USERS_CONNECTED.set(self.users.len() as i64);

        // Teardown closes before it unregisters, so a close racing with us is seen here
        if session.is_closed() {
            self.unregister(user_id, session.id());
            return false;
        }

        tracing::info!(session_id = %session.id(), user_id, "Session registered");
        true
    }

    pub fn unregister(&self, user_id: UserId, session_id: SessionId) -> bool {
        let removed = match self.users.get_mut(&user_id) {
            Some(mut sessions) => sessions.remove(&session_id).is_some(),
            None => false,
        };
        self.users.remove_if(&user_id, |_, sessions| sessions.is_empty());

        if removed {
            SESSIONS_AUTHENTICATED.dec();
            tracing::info!(session_id = %session_id, user_id, "Session unregistered");
        }
        USERS_CONNECTED.set(self.users.len() as i64);
        removed
    }

    pub fn sessions_for(&self, user_id: UserId) -> Vec<Arc<Session>> {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, user_id: UserId, session_id: SessionId) -> bool {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.contains_key(&session_id))
            .unwrap_or(false)
    }

    /// Subscribe every live session of `user_id` to `channel`.
    ///
    /// Holds the user's entry for the duration, so a session registering
    /// concurrently either is included here or registers afterwards.
    pub fn subscribe_all(&self, user_id: UserId, channel: &ChannelId) -> usize {
        let Some(sessions) = self.users.get(&user_id) else {
            return 0;
        };
        let count = sessions
            .values()
            .filter(|session| self.hub.subscribe(channel, session))
            .count();
        tracing::debug!(user_id, channel = %channel, sessions = count, "Subscribed user sessions");
        count
    }

    pub fn unsubscribe_all(&self, user_id: UserId, channel: &ChannelId) -> usize {
        let Some(sessions) = self.users.get(&user_id) else {
            return 0;
        };
        let count = sessions
            .values()
            .filter(|session| self.hub.unsubscribe(channel, session))
            .count();
        tracing::debug!(user_id, channel = %channel, sessions = count, "Unsubscribed user sessions");
        count
    }

    /// Apply the subscription changes an event implies
    pub async fn process_event(&self, event: &DomainEvent) {
        if let Some(resolver) = &self.resolver {
            resolver.record(event).await;
        }

        match event {
            DomainEvent::ConversationMembershipCreated(m) => {
                self.subscribe_all(m.user_id, &ChannelId::conversation(m.conversation_id));
            }
            DomainEvent::ConversationMembershipDeleted(m) => {
                self.revoke(m.user_id, std::slice::from_ref(&m.conversation_id))
                    .await;
            }
            DomainEvent::OrganizationMembershipCreated(m) => {
                for conversation_id in &m.conversation_ids {
                    self.subscribe_all(m.user_id, &ChannelId::conversation(*conversation_id));
                }
            }
            DomainEvent::OrganizationMembershipDeleted(m) => {
                self.revoke(m.user_id, &m.conversation_ids).await;
            }
            DomainEvent::Unrecognized { name } => {
                tracing::debug!(event = %name, "Ignoring unrecognized event");
            }
            _ => {}
        }
    }

    /// Unsubscribe the user from conversations no longer reachable by any membership.
    ///
    /// Without a resolver, or when the lookup fails, the event is taken at its
    /// word and every listed conversation is dropped.
    async fn revoke(&self, user_id: UserId, conversation_ids: &[ConversationId]) {
        if conversation_ids.is_empty() || !self.users.contains_key(&user_id) {
            return;
        }

        let retained = match &self.resolver {
            Some(resolver) => match resolver.channels_for_user(user_id).await {
                Ok(channels) => channels,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Membership re-check failed");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        for conversation_id in conversation_ids {
            let channel = ChannelId::conversation(*conversation_id);
            if retained.contains(&channel) {
                tracing::debug!(user_id, channel = %channel, "Still a member, keeping subscription");
                continue;
            }
            self.unsubscribe_all(user_id, &channel);
        }
    }

    /// Process one bus event, then fan out its payload if it has one
    pub async fn handle(&self, event: BusEvent) {
        self.process_event(&event.event).await;

        if let Some((channel, hub_event)) = event.event.delivery() {
            self.hub.route_message(&channel, hub_event).await;
        }
    }

    /// Drain the domain stream. Runs until the broker closes.
    pub async fn message_pump(self: Arc<Self>, mut rx: mpsc::Receiver<BusEvent>) {
        tracing::info!(stream = DOMAIN_STREAM, "Message pump started");

        while let Some(event) = rx.recv().await {
            tracing::trace!(
                event = %event.name(),
                correlation_id = ?event.correlation_id(),
                "Processing bus event"
            );
            self.handle(event).await;
        }

        tracing::info!(stream = DOMAIN_STREAM, "Message pump stopped");
    }

    /// Subscribe to the domain stream and spawn the pump.
    pub async fn start(self: &Arc<Self>, broker: &Broker<BusEvent>) -> JoinHandle<()> {
        let rx = broker.subscribe(DOMAIN_STREAM).await;
        tokio::spawn(self.clone().message_pump(rx))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn session_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn stats(&self) -> HubManagerStats {
        HubManagerStats {
            users: self.user_count(),
            sessions: self.session_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::Receiver;
    use tokio_util::sync::CancellationToken;

    use crate::config::OverflowPolicy;
    use crate::events::{names, ConversationMembership, OrganizationMembership, RawEvent};
    use crate::membership::MembershipDirectory;
    use crate::visibility::FieldVisibility;
    use crate::websocket::{Frame, OpCode};

    fn new_session() -> (Arc<Session>, Receiver<Frame>) {
        Session::new(
            Duration::from_secs(30),
            Arc::new(FieldVisibility::default()),
            &CancellationToken::new(),
        )
    }

    fn manager() -> Arc<HubManager> {
        Arc::new(HubManager::new(Arc::new(Hub::new())))
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let manager = manager();
        let (a, _rx_a) = new_session();
        let (b, _rx_b) = new_session();

        assert!(manager.register(42, &a));
        assert!(manager.register(42, &b));
        assert_eq!(manager.user_count(), 1);
        assert_eq!(manager.session_count(), 2);

        assert!(manager.unregister(42, a.id()));
        assert!(!manager.unregister(42, a.id()));
        assert_eq!(manager.sessions_for(42).len(), 1);

        assert!(manager.unregister(42, b.id()));
        assert_eq!(manager.user_count(), 0);
    }

    #[tokio::test]
    async fn test_register_closed_session_is_rejected() {
        let manager = manager();
        let (session, _rx) = new_session();
        session.close_with_error(crate::session::CloseCode::Timeout);

        assert!(!manager.register(42, &session));
        assert!(!manager.is_registered(42, session.id()));
        assert_eq!(manager.user_count(), 0);
    }

    #[tokio::test]
    async fn test_membership_created_subscribes_every_session() {
        let manager = manager();
        let (a1, _rx1) = new_session();
        let (a2, _rx2) = new_session();
        let (other, _rx3) = new_session();
        manager.register(42, &a1);
        manager.register(42, &a2);
        manager.register(7, &other);

        manager.process_event(&DomainEvent::ConversationMembershipCreated(
            ConversationMembership {
                user_id: 42,
                conversation_id: 9,
            },
        ))
        .await;

        let channel = ChannelId::conversation(9);
        assert!(manager.hub().is_subscribed(&channel, &a1));
        assert!(manager.hub().is_subscribed(&channel, &a2));
        assert!(!manager.hub().is_subscribed(&channel, &other));
        assert_eq!(manager.hub().subscriber_count(&channel), 2);

        manager.process_event(&DomainEvent::ConversationMembershipDeleted(
            ConversationMembership {
                user_id: 42,
                conversation_id: 9,
            },
        ))
        .await;
        assert!(!manager.hub().contains(&channel));
        assert!(a1.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_organization_membership_covers_its_conversations() {
        let manager = manager();
        let (session, _rx) = new_session();
        manager.register(5, &session);

        manager.process_event(&DomainEvent::OrganizationMembershipCreated(
            OrganizationMembership {
                user_id: 5,
                organization_id: 1,
                conversation_ids: vec![10, 11],
            },
        ))
        .await;
        assert!(session.is_subscribed(&ChannelId::conversation(10)));
        assert!(session.is_subscribed(&ChannelId::conversation(11)));

        manager.process_event(&DomainEvent::OrganizationMembershipDeleted(
            OrganizationMembership {
                user_id: 5,
                organization_id: 1,
                conversation_ids: vec![10],
            },
        ))
        .await;
        assert!(!session.is_subscribed(&ChannelId::conversation(10)));
        assert!(session.is_subscribed(&ChannelId::conversation(11)));
    }

    #[tokio::test]
    async fn test_organization_removal_keeps_direct_membership() {
        let directory = Arc::new(MembershipDirectory::new());
        directory.add_conversation_member(42, 7);
        let manager = Arc::new(HubManager::with_resolver(
            Arc::new(Hub::new()),
            directory.clone(),
        ));
        let (session, _rx) = new_session();
        manager.register(42, &session);
        manager.hub().subscribe(&ChannelId::conversation(7), &session);

        let membership = OrganizationMembership {
            user_id: 42,
            organization_id: 1,
            conversation_ids: vec![7, 8],
        };
        manager
            .process_event(&DomainEvent::OrganizationMembershipCreated(membership.clone()))
            .await;
        manager
            .process_event(&DomainEvent::OrganizationMembershipDeleted(membership))
            .await;

        assert!(session.is_subscribed(&ChannelId::conversation(7)));
        assert!(!session.is_subscribed(&ChannelId::conversation(8)));
        assert_eq!(
            directory.channels_for_user(42).await.unwrap(),
            vec![ChannelId::conversation(7)]
        );

        // Dropping the last route to the conversation unsubscribes
        manager
            .process_event(&DomainEvent::ConversationMembershipDeleted(
                ConversationMembership {
                    user_id: 42,
                    conversation_id: 7,
                },
            ))
            .await;
        assert!(!session.is_subscribed(&ChannelId::conversation(7)));
        assert_eq!(manager.hub().channel_count(), 0);
    }

    #[tokio::test]
    async fn test_direct_removal_keeps_organization_membership() {
        let directory = Arc::new(MembershipDirectory::new());
        directory.add_conversation_member(5, 30);
        directory.add_organization_member(5, 3);
        directory.add_organization_conversation(3, 30);
        let manager = Arc::new(HubManager::with_resolver(
            Arc::new(Hub::new()),
            directory.clone(),
        ));
        let (session, _rx) = new_session();
        manager.register(5, &session);
        manager.hub().subscribe(&ChannelId::conversation(30), &session);

        manager
            .process_event(&DomainEvent::ConversationMembershipDeleted(
                ConversationMembership {
                    user_id: 5,
                    conversation_id: 30,
                },
            ))
            .await;

        assert!(session.is_subscribed(&ChannelId::conversation(30)));
    }

    #[tokio::test]
    async fn test_events_for_unknown_users_are_noops() {
        let manager = manager();
        manager.process_event(&DomainEvent::ConversationMembershipCreated(
            ConversationMembership {
                user_id: 99,
                conversation_id: 1,
            },
        ))
        .await;
        manager.process_event(&DomainEvent::Unrecognized {
            name: "hours.HOURS_LOGGED".into(),
        })
        .await;
        assert_eq!(manager.hub().channel_count(), 0);
    }

    #[tokio::test]
    async fn test_pump_delivers_in_publish_order() {
        let manager = manager();
        let broker: Broker<BusEvent> = Broker::with_policy(16, OverflowPolicy::Block);
        let pump = manager.start(&broker).await;

        let (session, mut rx) = new_session();
        manager.register(42, &session);
        manager.hub().subscribe(&ChannelId::conversation(7), &session);

        for i in 0..5 {
            let raw = RawEvent::new(
                names::MESSAGE_SENT,
                json!({"conversationId": 7, "messageId": i}),
            );
            broker
                .publish(DOMAIN_STREAM, BusEvent::try_from(raw).unwrap())
                .await
                .unwrap();
        }

        let mut previous = None;
        for i in 0..5 {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame.op, OpCode::Event);
            assert_eq!(frame.event.as_deref(), Some(names::MESSAGE_SENT));
            assert_eq!(frame.data["messageId"], i);
            if let Some(prev) = previous {
                assert!(frame.sequence_number > prev);
            }
            previous = Some(frame.sequence_number);
        }

        broker.close().await;
        tokio::time::timeout(Duration::from_secs(2), pump)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_membership_then_message_reaches_both_sessions() {
        let manager = manager();
        let (a1, mut rx1) = new_session();
        let (a2, mut rx2) = new_session();
        manager.register(42, &a1);
        manager.register(42, &a2);

        let created = RawEvent::new(
            names::CONVERSATION_MEMBERSHIP_CREATED,
            json!({"userId": 42, "conversationId": 9}),
        );
        manager.handle(BusEvent::try_from(created).unwrap()).await;

        let sent = RawEvent::new(names::MESSAGE_SENT, json!({"conversationId": 9}));
        manager.handle(BusEvent::try_from(sent).unwrap()).await;

        for rx in [&mut rx1, &mut rx2] {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frame.event.as_deref(), Some(names::MESSAGE_SENT));
        }
    }
}
