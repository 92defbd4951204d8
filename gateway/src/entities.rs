//! The constellation's entity declarations.
//!
//! Each microservice owns one entity kind; the gateway's only knowledge of
//! them is this table: which fields clients may send, and which reply
//! fields are references to be inflated by the resolver.

use std::sync::Arc;
use switchboard_core::{RefSpec, ResolverRegistry};
use switchboard_web::entity::list_shaped_reply;
use switchboard_web::{EntitySpec, FieldKind, FieldSpec};

/// The REST adapters served by this gateway.
pub fn entity_specs() -> Vec<Arc<EntitySpec>> {
    vec![
        Arc::new(
            EntitySpec::new("equipment")
                .field(FieldSpec::required("name", FieldKind::String))
                .field(FieldSpec::required("manufacturer", FieldKind::String))
                .field(FieldSpec::optional("model", FieldKind::String))
                .field(FieldSpec::optional("quantity", FieldKind::Number))
                .field(FieldSpec::optional("locationID", FieldKind::String))
                .with_validator(list_shaped_reply),
        ),
        Arc::new(
            EntitySpec::new("user")
                .field(FieldSpec::required("firstName", FieldKind::String))
                .field(FieldSpec::required("lastName", FieldKind::String))
                .field(FieldSpec::required("email", FieldKind::String))
                .field(FieldSpec::optional("stateID", FieldKind::String)),
        ),
        Arc::new(
            EntitySpec::new("venue")
                .field(FieldSpec::required("name", FieldKind::String))
                .field(FieldSpec::optional("address", FieldKind::String))
                .field(FieldSpec::optional("capacity", FieldKind::Number))
                .without_resolution(),
        ),
        Arc::new(
            EntitySpec::new("event")
                .field(FieldSpec::required("title", FieldKind::String))
                .field(FieldSpec::optional("description", FieldKind::String))
                .field(FieldSpec::optional("locationID", FieldKind::String))
                .field(FieldSpec::optional("topicID", FieldKind::String))
                .field(FieldSpec::optional("start", FieldKind::String))
                .field(FieldSpec::optional("end", FieldKind::String)),
        ),
        Arc::new(
            EntitySpec::new("topic")
                .field(FieldSpec::required("name", FieldKind::String))
                .field(FieldSpec::optional("description", FieldKind::String))
                .without_resolution(),
        ),
        Arc::new(
            EntitySpec::new("file")
                .field(FieldSpec::required("name", FieldKind::String))
                .field(FieldSpec::required("url", FieldKind::String))
                .field(FieldSpec::optional("ownerID", FieldKind::String))
                .without_resolution(),
        ),
        Arc::new(
            EntitySpec::new("state")
                .field(FieldSpec::required("name", FieldKind::String))
                .without_resolution(),
        ),
        Arc::new(
            EntitySpec::new("signup")
                .field(FieldSpec::required("userID", FieldKind::String))
                .field(FieldSpec::required("eventID", FieldKind::String))
                .field(FieldSpec::optional("confirmed", FieldKind::Boolean)),
        ),
    ]
}

/// Which reply fields the resolver inflates, per entity.
pub fn resolver_registry() -> ResolverRegistry {
    ResolverRegistry::new()
        .with_spec(RefSpec::new("equipment", [("locationID", "venue")]))
        .with_spec(RefSpec::new(
            "event",
            [("locationID", "venue"), ("topicID", "topic")],
        ))
        .with_spec(RefSpec::new(
            "signup",
            [("eventID", "event"), ("userID", "user")],
        ))
        .with_spec(RefSpec::new("user", [("stateID", "state")]))
}
