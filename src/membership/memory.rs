use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::events::{ConversationId, DomainEvent, OrganizationId};
use crate::hub::ChannelId;
use crate::session::UserId;

use super::{ChannelResolver, ResolveError};

/// In-memory membership directory.
///
/// Used in development and tests in place of the relational store. It can be
/// kept current by feeding it the same domain events the hub manager sees.
#[derive(Debug, Default)]
pub struct MembershipDirectory {
    conversations: DashMap<UserId, HashSet<ConversationId>>,
    organizations: DashMap<UserId, HashSet<OrganizationId>>,
    organization_conversations: DashMap<OrganizationId, HashSet<ConversationId>>,
}

impl MembershipDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversation_member(&self, user_id: UserId, conversation_id: ConversationId) {
        self.conversations
            .entry(user_id)
            .or_default()
            .insert(conversation_id);
    }

    pub fn remove_conversation_member(&self, user_id: UserId, conversation_id: ConversationId) {
        if let Some(mut set) = self.conversations.get_mut(&user_id) {
            set.remove(&conversation_id);
        }
    }

    pub fn add_organization_member(&self, user_id: UserId, organization_id: OrganizationId) {
        self.organizations
            .entry(user_id)
            .or_default()
            .insert(organization_id);
    }

    pub fn remove_organization_member(&self, user_id: UserId, organization_id: OrganizationId) {
        if let Some(mut set) = self.organizations.get_mut(&user_id) {
            set.remove(&organization_id);
        }
    }

    pub fn add_organization_conversation(
        &self,
        organization_id: OrganizationId,
        conversation_id: ConversationId,
    ) {
        self.organization_conversations
            .entry(organization_id)
            .or_default()
            .insert(conversation_id);
    }

    /// Apply a membership change carried by a domain event
    pub fn apply(&self, event: &DomainEvent) {
        match event {
            DomainEvent::ConversationMembershipCreated(m) => {
                self.add_conversation_member(m.user_id, m.conversation_id)
            }
            DomainEvent::ConversationMembershipDeleted(m) => {
                self.remove_conversation_member(m.user_id, m.conversation_id)
            }
            DomainEvent::OrganizationMembershipCreated(m) => {
                self.add_organization_member(m.user_id, m.organization_id);
                for conversation_id in &m.conversation_ids {
                    self.add_organization_conversation(m.organization_id, *conversation_id);
                }
            }
            DomainEvent::OrganizationMembershipDeleted(m) => {
                self.remove_organization_member(m.user_id, m.organization_id)
            }
            _ => {}
        }
    }

    fn conversation_ids(&self, user_id: UserId) -> BTreeSet<ConversationId> {
        let mut ids: BTreeSet<ConversationId> = self
            .conversations
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let organizations: Vec<OrganizationId> = self
            .organizations
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        for organization_id in organizations {
            if let Some(set) = self.organization_conversations.get(&organization_id) {
                ids.extend(set.iter().copied());
            }
        }

        ids
    }
}

#[async_trait]
impl ChannelResolver for MembershipDirectory {
    async fn channels_for_user(&self, user_id: UserId) -> Result<Vec<ChannelId>, ResolveError> {
        Ok(self
            .conversation_ids(user_id)
            .into_iter()
            .map(ChannelId::conversation)
            .collect())
    }

    async fn record(&self, event: &DomainEvent) {
        self.apply(event);
    }
}
