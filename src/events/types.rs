use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::hub::{ChannelId, HubEvent};
use crate::session::UserId;

use super::EventDecodeError;

pub type ConversationId = u64;
pub type OrganizationId = u64;

/// Well-known event names
pub mod names {
    pub const CONVERSATION_MEMBERSHIP_CREATED: &str =
        "conversations.CONVERSATION_MEMBERSHIP_CREATED";
    pub const CONVERSATION_MEMBERSHIP_DELETED: &str =
        "conversations.CONVERSATION_MEMBERSHIP_DELETED";
    pub const ORGANIZATION_MEMBERSHIP_CREATED: &str =
        "organizations.ORGANIZATION_MEMBERSHIP_CREATED";
    pub const ORGANIZATION_MEMBERSHIP_DELETED: &str =
        "organizations.ORGANIZATION_MEMBERSHIP_DELETED";
    pub const MESSAGE_SENT: &str = "messages.MESSAGE_SENT";
    pub const MESSAGE_UPDATED: &str = "messages.MESSAGE_UPDATED";
    pub const MESSAGE_DELETED: &str = "messages.MESSAGE_DELETED";
    pub const NOTIFICATION_CREATED: &str = "notifications.NOTIFICATION_CREATED";
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMembership {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationMembership {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    /// Conversations owned by the organization
    #[serde(default)]
    pub conversation_ids: Vec<ConversationId>,
}

/// A message lifecycle event; `payload` is delivered to clients as-is
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub conversation_id: ConversationId,
    pub sender_id: Option<UserId>,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub user_id: UserId,
    pub payload: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFields {
    conversation_id: ConversationId,
    #[serde(default)]
    sender_id: Option<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationFields {
    user_id: UserId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    ConversationMembershipCreated(ConversationMembership),
    ConversationMembershipDeleted(ConversationMembership),
    OrganizationMembershipCreated(OrganizationMembership),
    OrganizationMembershipDeleted(OrganizationMembership),
    MessageSent(MessageEvent),
    MessageUpdated(MessageEvent),
    MessageDeleted(MessageEvent),
    NotificationCreated(NotificationEvent),
    /// A name this gateway has no handling for
    Unrecognized { name: String },
}

fn parse<T: for<'de> Deserialize<'de>>(name: &str, payload: &Value) -> Result<T, EventDecodeError> {
    T::deserialize(payload).map_err(|source| EventDecodeError::InvalidPayload {
        name: name.to_string(),
        source,
    })
}

fn non_zero(name: &str, field: &'static str, id: u64) -> Result<u64, EventDecodeError> {
    if id == 0 {
        return Err(EventDecodeError::ZeroId {
            name: name.to_string(),
            field,
        });
    }
    Ok(id)
}

impl DomainEvent {
    pub fn decode(name: &str, payload: Value) -> Result<Self, EventDecodeError> {
        if name.trim().is_empty() {
            return Err(EventDecodeError::MissingName);
        }

        let event = match name {
            names::CONVERSATION_MEMBERSHIP_CREATED | names::CONVERSATION_MEMBERSHIP_DELETED => {
                let membership: ConversationMembership = parse(name, &payload)?;
                non_zero(name, "userId", membership.user_id)?;
                if name == names::CONVERSATION_MEMBERSHIP_CREATED {
                    Self::ConversationMembershipCreated(membership)
                } else {
                    Self::ConversationMembershipDeleted(membership)
                }
            }
            names::ORGANIZATION_MEMBERSHIP_CREATED | names::ORGANIZATION_MEMBERSHIP_DELETED => {
                let membership: OrganizationMembership = parse(name, &payload)?;
                non_zero(name, "userId", membership.user_id)?;
                if name == names::ORGANIZATION_MEMBERSHIP_CREATED {
                    Self::OrganizationMembershipCreated(membership)
                } else {
                    Self::OrganizationMembershipDeleted(membership)
                }
            }
            names::MESSAGE_SENT | names::MESSAGE_UPDATED | names::MESSAGE_DELETED => {
                let fields: MessageFields = parse(name, &payload)?;
                let message = MessageEvent {
                    conversation_id: fields.conversation_id,
                    sender_id: fields.sender_id.filter(|id| *id != 0),
                    payload,
                };
                match name {
                    names::MESSAGE_SENT => Self::MessageSent(message),
                    names::MESSAGE_UPDATED => Self::MessageUpdated(message),
                    _ => Self::MessageDeleted(message),
                }
            }
            names::NOTIFICATION_CREATED => {
                let fields: NotificationFields = parse(name, &payload)?;
                Self::NotificationCreated(NotificationEvent {
                    user_id: non_zero(name, "userId", fields.user_id)?,
                    payload,
                })
            }
            other => Self::Unrecognized {
                name: other.to_string(),
            },
        };

        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ConversationMembershipCreated(_) => names::CONVERSATION_MEMBERSHIP_CREATED,
            Self::ConversationMembershipDeleted(_) => names::CONVERSATION_MEMBERSHIP_DELETED,
            Self::OrganizationMembershipCreated(_) => names::ORGANIZATION_MEMBERSHIP_CREATED,
            Self::OrganizationMembershipDeleted(_) => names::ORGANIZATION_MEMBERSHIP_DELETED,
            Self::MessageSent(_) => names::MESSAGE_SENT,
            Self::MessageUpdated(_) => names::MESSAGE_UPDATED,
            Self::MessageDeleted(_) => names::MESSAGE_DELETED,
            Self::NotificationCreated(_) => names::NOTIFICATION_CREATED,
            Self::Unrecognized { name } => name.as_str(),
        }
    }

    /// Channel and client-facing payload, for events that are delivered to sessions
    pub fn delivery(&self) -> Option<(ChannelId, Arc<HubEvent>)> {
        match self {
            Self::MessageSent(message)
            | Self::MessageUpdated(message)
            | Self::MessageDeleted(message) => Some((
                ChannelId::conversation(message.conversation_id),
                Arc::new(HubEvent {
                    name: self.name().to_string(),
                    payload: message.payload.clone(),
                    owner: message.sender_id,
                }),
            )),
            Self::NotificationCreated(notification) => Some((
                ChannelId::user(notification.user_id),
                Arc::new(HubEvent {
                    name: self.name().to_string(),
                    payload: notification.payload.clone(),
                    owner: Some(notification.user_id),
                }),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BusEvent, RawEvent};
    use serde_json::json;

    #[test]
    fn test_decode_membership() {
        let event = DomainEvent::decode(
            names::CONVERSATION_MEMBERSHIP_CREATED,
            json!({"userId": 42, "conversationId": 9}),
        )
        .unwrap();

        assert_eq!(
            event,
            DomainEvent::ConversationMembershipCreated(ConversationMembership {
                user_id: 42,
                conversation_id: 9
            })
        );
        assert!(event.delivery().is_none());
    }

    #[test]
    fn test_decode_organization_membership() {
        let event = DomainEvent::decode(
            names::ORGANIZATION_MEMBERSHIP_DELETED,
            json!({"userId": 5, "organizationId": 2, "conversationIds": [10, 11]}),
        )
        .unwrap();

        match event {
            DomainEvent::OrganizationMembershipDeleted(m) => {
                assert_eq!(m.conversation_ids, vec![10, 11]);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_message_delivery_keeps_payload() {
        let payload = json!({"conversationId": 7, "senderId": 42, "body": "hello"});
        let event = DomainEvent::decode(names::MESSAGE_SENT, payload.clone()).unwrap();

        let (channel, hub_event) = event.delivery().unwrap();
        assert_eq!(channel, ChannelId::conversation(7));
        assert_eq!(hub_event.name, names::MESSAGE_SENT);
        assert_eq!(hub_event.payload, payload);
        assert_eq!(hub_event.owner, Some(42));
    }

    #[test]
    fn test_notification_routes_to_personal_channel() {
        let event =
            DomainEvent::decode(names::NOTIFICATION_CREATED, json!({"userId": 3, "title": "x"}))
                .unwrap();
        let (channel, hub_event) = event.delivery().unwrap();
        assert_eq!(channel.as_str(), "user/3");
        assert_eq!(hub_event.owner, Some(3));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let err = DomainEvent::decode(names::MESSAGE_SENT, json!({"conversationId": "seven"}))
            .unwrap_err();
        assert!(matches!(err, EventDecodeError::InvalidPayload { .. }));

        let err = DomainEvent::decode(
            names::CONVERSATION_MEMBERSHIP_CREATED,
            json!({"userId": 0, "conversationId": 1}),
        )
        .unwrap_err();
        assert!(matches!(err, EventDecodeError::ZeroId { field: "userId", .. }));

        assert!(matches!(
            DomainEvent::decode("  ", Value::Null),
            Err(EventDecodeError::MissingName)
        ));
    }

    #[test]
    fn test_unknown_name_is_unrecognized() {
        let event = DomainEvent::decode("hours.HOURS_LOGGED", json!({"hours": 2})).unwrap();
        assert_eq!(
            event,
            DomainEvent::Unrecognized {
                name: "hours.HOURS_LOGGED".into()
            }
        );
        assert_eq!(event.name(), "hours.HOURS_LOGGED");
    }

    #[test]
    fn test_bus_event_from_raw() {
        let raw: RawEvent = serde_json::from_value(json!({
            "name": "messages.MESSAGE_DELETED",
            "payload": {"conversationId": 1, "messageId": 99},
            "context": {"correlationId": "req-1"}
        }))
        .unwrap();

        let bus = BusEvent::try_from(raw).unwrap();
        assert_eq!(bus.name(), names::MESSAGE_DELETED);
        assert_eq!(bus.correlation_id(), Some("req-1"));
    }
}
