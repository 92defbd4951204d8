//! Routing keys for the topic exchange.
//!
//! Requests are published with a dotted key of the form
//! `<entity>.details.<verb>` (e.g. `equipment.details.get`); each
//! microservice binds its queue to the keys for the entities it owns.

use crate::message::Intention;
use std::fmt;

/// The CRUD verb segment of a routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read one or many entities.
    Get,
    /// Create an entity.
    Create,
    /// Update an entity.
    Update,
    /// Delete an entity.
    Delete,
}

impl From<Intention> for Verb {
    fn from(intention: Intention) -> Self {
        match intention {
            Intention::Read => Self::Get,
            Intention::Create => Self::Create,
            Intention::Update => Self::Update,
            Intention::Delete => Self::Delete,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A topic-exchange routing key, `<entity>.details.<verb>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingKey {
    entity: String,
    verb: Verb,
}

impl RoutingKey {
    /// A key for an arbitrary entity and verb.
    #[must_use]
    pub fn new(entity: impl Into<String>, verb: Verb) -> Self {
        Self {
            entity: entity.into(),
            verb,
        }
    }

    /// The key matching the given request intention.
    #[must_use]
    pub fn for_intention(entity: impl Into<String>, intention: Intention) -> Self {
        Self::new(entity, intention.into())
    }

    /// The well-known read key, used by the resolver's follow-up lookups.
    #[must_use]
    pub fn read(entity: impl Into<String>) -> Self {
        Self::new(entity, Verb::Get)
    }

    /// The entity segment.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.details.{}", self.entity, self.verb)
    }
}
