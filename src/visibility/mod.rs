//! Field-level visibility filtering for outbound event payloads.
//!
//! Every event delivered to a session is passed through a [`Projector`] with the
//! recipient's [`Scope`]. The default projector is a static table of
//! [`FieldRule`]s: each rule names an event (or `prefix.*`), a dot-separated
//! field path, and the minimum scope allowed to see that field. Fields the
//! recipient may not see are removed; everything else passes through untouched.

use serde_json::Value;

use crate::session::UserId;

/// Permission level of a recipient relative to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// Receives the event through a shared channel
    Member,
    /// The user the event is about
    Owner,
}

impl Scope {
    pub fn for_recipient(recipient: Option<UserId>, owner: Option<UserId>) -> Self {
        match (recipient, owner) {
            (Some(r), Some(o)) if r == o => Scope::Owner,
            _ => Scope::Member,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub event: &'static str,
    pub path: &'static str,
    pub min_scope: Scope,
}

impl FieldRule {
    fn applies_to(&self, event: &str) -> bool {
        match self.event.strip_suffix('*') {
            Some(prefix) => event.starts_with(prefix),
            None => self.event == event,
        }
    }
}

pub static DEFAULT_RULES: &[FieldRule] = &[
    FieldRule {
        event: "messages.*",
        path: "sender.email",
        min_scope: Scope::Owner,
    },
    FieldRule {
        event: "messages.*",
        path: "sender.phone",
        min_scope: Scope::Owner,
    },
    FieldRule {
        event: "notifications.*",
        path: "metadata.internal",
        min_scope: Scope::Owner,
    },
];

/// Filters an outbound payload for a recipient scope
pub trait Projector: Send + Sync {
    fn project(&self, scope: Scope, event: &str, value: &Value) -> Value;
}

/// Table-driven projector
#[derive(Debug, Clone, Copy)]
pub struct FieldVisibility {
    rules: &'static [FieldRule],
}

impl FieldVisibility {
    pub const fn new(rules: &'static [FieldRule]) -> Self {
        Self { rules }
    }
}

impl Default for FieldVisibility {
    fn default() -> Self {
        Self::new(DEFAULT_RULES)
    }
}

impl Projector for FieldVisibility {
    fn project(&self, scope: Scope, event: &str, value: &Value) -> Value {
        project(self.rules, scope, event, value)
    }
}

/// Apply `rules` to `value` for a recipient with `scope`.
pub fn project(rules: &[FieldRule], scope: Scope, event: &str, value: &Value) -> Value {
    let mut hidden = rules
        .iter()
        .filter(|rule| rule.applies_to(event) && scope < rule.min_scope)
        .peekable();

    if hidden.peek().is_none() {
        return value.clone();
    }

    let mut projected = value.clone();
    for rule in hidden {
        let segments: Vec<&str> = rule.path.split('.').collect();
        remove_path(&mut projected, &segments);
    }
    projected
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    match value {
        Value::Array(items) => {
            for item in items {
                remove_path(item, segments);
            }
        }
        Value::Object(map) => match segments {
            [] => {}
            [leaf] => {
                map.remove(*leaf);
            }
            [head, rest @ ..] => {
                if let Some(child) = map.get_mut(*head) {
                    remove_path(child, rest);
                }
            }
        },
        _ => {}
    }
}
