//! Shared application state for the HTTP handlers.

use std::sync::Arc;
use switchboard_core::Gateway;

use crate::entity::EntitySpec;

/// State shared by every handler: the correlation engine.
#[derive(Clone)]
pub struct AppState {
    /// The request-correlation engine.
    pub gateway: Gateway,
}

impl AppState {
    /// Wrap a gateway for handler use.
    #[must_use]
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

/// Per-entity handler state: the shared state plus the entity's spec.
#[derive(Clone)]
pub(crate) struct EntityState {
    pub(crate) app: AppState,
    pub(crate) spec: Arc<EntitySpec>,
}
