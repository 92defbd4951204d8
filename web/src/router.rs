//! Router assembly.
//!
//! One sub-router per entity, each carrying the uniform five CRUD routes,
//! nested under the entity's name, plus a `/health` liveness endpoint.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

use crate::entity::EntitySpec;
use crate::handlers;
use crate::state::{AppState, EntityState};

/// Build the router for one entity.
///
/// # Routes
///
/// - `GET /` - query with optional filters
/// - `POST /` - create
/// - `GET /:id` - fetch one
/// - `PATCH /:id` - update
/// - `DELETE /:id` - delete
pub fn entity_router(spec: Arc<EntitySpec>, app: AppState) -> Router {
    let state = EntityState { app, spec };
    Router::new()
        .route(
            "/",
            get(handlers::query_entities).post(handlers::create_entity),
        )
        .route(
            "/:id",
            get(handlers::get_entity)
                .patch(handlers::update_entity)
                .delete(handlers::delete_entity),
        )
        .with_state(state)
}

/// Build the full API router: every entity nested under its name, plus
/// `/health`.
pub fn api_router(specs: Vec<Arc<EntitySpec>>, app: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health));
    for spec in specs {
        let path = format!("/{}", spec.name);
        router = router.nest(&path, entity_router(spec, app.clone()));
    }
    router
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "UP"}))
}
