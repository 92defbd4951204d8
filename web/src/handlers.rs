//! The five generic CRUD handlers.
//!
//! Every entity shares these. Each handler coerces/validates the client's
//! fields against the entity's [`EntitySpec`](crate::entity::EntitySpec),
//! builds the request message, dispatches it through the gateway, and then
//! awaits the responder. The broker's answer (or the terminator's 504)
//! arrives through the oneshot; the handler itself never synthesizes a
//! success.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use std::collections::HashMap;
use switchboard_core::{
    default_completion, Completion, Intention, RequestMessage, Responder, RoutingKey,
};
use tracing::debug;

use crate::error::{gateway_dropped, gateway_response};
use crate::extract::CallerId;
use crate::state::EntityState;

/// `GET /E` - query by optional, typed filters.
pub(crate) async fn query_entities(
    State(state): State<EntityState>,
    CallerId(caller): CallerId,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let fields = match state.spec.coerce_query(&params) {
        Ok(fields) => fields,
        Err(rejection) => return rejection.into_response(),
    };
    dispatch(&state, Intention::Read, caller, fields, ReadShape::List).await
}

/// `GET /E/:id` - fetch one entity.
pub(crate) async fn get_entity(
    State(state): State<EntityState>,
    CallerId(caller): CallerId,
    Path(id): Path<String>,
) -> Response {
    let mut fields = Map::new();
    fields.insert("id".to_owned(), Value::String(id));
    dispatch(&state, Intention::Read, caller, fields, ReadShape::One).await
}

/// `POST /E` - create; the required field set is enforced before publish.
pub(crate) async fn create_entity(
    State(state): State<EntityState>,
    CallerId(caller): CallerId,
    Json(body): Json<Value>,
) -> Response {
    let fields = match state.spec.validate_create(&body) {
        Ok(fields) => fields,
        Err(rejection) => return rejection.into_response(),
    };
    dispatch(&state, Intention::Create, caller, fields, ReadShape::NotARead).await
}

/// `PATCH /E/:id` - update; all body fields optional, id from the path.
pub(crate) async fn update_entity(
    State(state): State<EntityState>,
    CallerId(caller): CallerId,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut fields = match state.spec.validate_update(&body) {
        Ok(fields) => fields,
        Err(rejection) => return rejection.into_response(),
    };
    fields.insert("id".to_owned(), Value::String(id));
    dispatch(&state, Intention::Update, caller, fields, ReadShape::NotARead).await
}

/// `DELETE /E/:id` - delete by path id.
pub(crate) async fn delete_entity(
    State(state): State<EntityState>,
    CallerId(caller): CallerId,
    Path(id): Path<String>,
) -> Response {
    let mut fields = Map::new();
    fields.insert("id".to_owned(), Value::String(id));
    dispatch(&state, Intention::Delete, caller, fields, ReadShape::NotARead).await
}

/// Which resolver wrapper a read's completion gets.
enum ReadShape {
    List,
    One,
    NotARead,
}

async fn dispatch(
    state: &EntityState,
    intention: Intention,
    caller: String,
    fields: Map<String, Value>,
    shape: ReadShape,
) -> Response {
    let gateway = &state.app.gateway;
    let entity = state.spec.name.as_str();

    let uid = gateway.next_id();
    let message = RequestMessage::new(uid, intention, caller).with_fields(fields);
    let key = RoutingKey::for_intention(entity, intention);
    let (responder, rx) = Responder::channel();

    let completion: Completion = if state.spec.resolve_reads {
        match shape {
            ReadShape::List => gateway.resolve_list(entity, default_completion()),
            ReadShape::One => gateway.resolve_one(entity, default_completion()),
            ReadShape::NotARead => default_completion(),
        }
    } else {
        default_completion()
    };

    let accepted = gateway
        .send_request(&key, message, responder, completion, state.spec.boxed_validator())
        .await;
    if !accepted {
        // Not an error for the client yet: the record waits for the sweep.
        debug!(entity, %key, "dispatch not accepted by the transport");
    }

    match rx.await {
        Ok(response) => gateway_response(response),
        Err(_) => gateway_dropped(),
    }
}
