//! Entity resolution.
//!
//! Replies frequently reference entities owned by other microservices as
//! raw identifier fields (`"locationID": "loc1"`). Before the HTTP response
//! is emitted those references are inflated: the resolver issues one READ
//! round-trip per unique referenced id on the target entity's well-known
//! read key, waits for all of them, and substitutes the fetched objects in
//! place of the raw ids.
//!
//! Resolver round-trips bypass the pending-request table. Their ids go into
//! the intercept registry instead, and the reply demultiplexer diverts any
//! intercepted id here rather than to a completion callback. An id is in at
//! most one of the two structures at any time.
//!
//! Failure is all-or-nothing: if any sub-fetch returns a non-OK status,
//! times out, or resolution exceeds the depth bound, the whole enrichment
//! fails and the outer completion fires with a synthesized 500-class reply.
//! Partial payloads are never emitted.

use crate::gateway::Gateway;
use crate::id::RequestId;
use crate::message::{Intention, Reply, RequestMessage};
use crate::routing::RoutingKey;
use crate::table::Completion;
use crate::transport::TransportError;
use futures::future;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// One identifier-valued field and the entity kind it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefField {
    /// Field name in the reply payload (e.g. `locationID`).
    pub field: String,
    /// Entity kind that owns the referenced object (e.g. `venue`).
    pub target: String,
}

/// The declared reference fields of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    /// The entity kind this spec describes.
    pub entity: String,
    /// Its identifier-valued fields.
    pub refs: Vec<RefField>,
}

impl RefSpec {
    /// Declare an entity's reference fields as `(field, target)` pairs.
    #[must_use]
    pub fn new<F, T>(entity: impl Into<String>, refs: impl IntoIterator<Item = (F, T)>) -> Self
    where
        F: Into<String>,
        T: Into<String>,
    {
        Self {
            entity: entity.into(),
            refs: refs
                .into_iter()
                .map(|(field, target)| RefField {
                    field: field.into(),
                    target: target.into(),
                })
                .collect(),
        }
    }
}

/// All declared reference specs, keyed by entity kind.
///
/// Entities without a spec pass through enrichment untouched.
#[derive(Debug, Clone, Default)]
pub struct ResolverRegistry {
    specs: HashMap<String, RefSpec>,
}

impl ResolverRegistry {
    /// An empty registry (no entity gets inflated).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entity's reference spec.
    #[must_use]
    pub fn with_spec(mut self, spec: RefSpec) -> Self {
        self.specs.insert(spec.entity.clone(), spec);
        self
    }

    /// Look up the spec for an entity kind.
    #[must_use]
    pub fn get(&self, entity: &str) -> Option<&RefSpec> {
        self.specs.get(entity)
    }
}

/// Why an enrichment cycle failed terminally.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A sub-fetch could not be published.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A sub-fetch request failed to serialize.
    #[error("sub-fetch request failed to serialize: {0}")]
    Encode(#[from] serde_json::Error),

    /// A sub-fetch reply carried a non-OK status.
    #[error("lookup of {entity} failed upstream (status {status})")]
    Upstream {
        /// Referenced entity kind.
        entity: String,
        /// The failing broker status.
        status: i64,
    },

    /// No sub-fetch reply arrived within the deadline.
    #[error("lookup of {entity} '{id}' timed out")]
    Timeout {
        /// Referenced entity kind.
        entity: String,
        /// Referenced id.
        id: String,
    },

    /// The reply arrived but carried no entity.
    #[error("lookup of {entity} '{id}' returned no entity")]
    Missing {
        /// Referenced entity kind.
        entity: String,
        /// Referenced id.
        id: String,
    },

    /// Reference chains went deeper than the configured bound.
    #[error("resolution depth exceeded while inflating {entity}")]
    DepthExceeded {
        /// The entity whose references could not be followed.
        entity: String,
    },

    /// The gateway shut down while a sub-fetch was in flight.
    #[error("gateway dropped an in-flight lookup")]
    Abandoned,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl Gateway {
    /// Wrap a completion so list replies are enriched before it fires.
    ///
    /// The wrapped completion is invoked exactly once: with the enriched
    /// reply on success, with a synthesized 500-class reply on any terminal
    /// sub-fetch failure, or with the original reply untouched when it
    /// carries a non-OK status (there is nothing to inflate in a failure).
    #[must_use]
    pub fn resolve_list(&self, entity: &str, completion: Completion) -> Completion {
        self.resolving(entity, completion)
    }

    /// Wrap a completion so a single-entity reply is enriched before it
    /// fires. Same contract as [`Gateway::resolve_list`]; single-entity
    /// replies arrive as one-element result lists (a bare object is also
    /// tolerated).
    #[must_use]
    pub fn resolve_one(&self, entity: &str, completion: Completion) -> Completion {
        self.resolving(entity, completion)
    }

    fn resolving(&self, entity: &str, completion: Completion) -> Completion {
        let gateway = self.clone();
        let entity = entity.to_owned();
        Box::new(move |responder, issued_at, reply, status| {
            if status != 0 {
                completion(responder, issued_at, reply, status);
                return;
            }
            let msg_id = reply.msg_id;
            tokio::spawn(async move {
                match gateway.enrich_reply(&entity, reply).await {
                    Ok(enriched) => completion(responder, issued_at, enriched, 0),
                    Err(err) => {
                        warn!(
                            entity = %entity,
                            msg_id = %msg_id,
                            error = %err,
                            "entity resolution failed; surfacing internal error"
                        );
                        let failure = Reply::failure(
                            msg_id,
                            500,
                            format!("failed to resolve referenced entities: {err}"),
                        );
                        completion(responder, issued_at, failure, 500);
                    }
                }
            });
        })
    }

    /// Inflate every declared reference in the reply's payload.
    async fn enrich_reply(&self, entity: &str, mut reply: Reply) -> Result<Reply, ResolveError> {
        let Some(spec) = self.registry().get(entity).cloned() else {
            return Ok(reply);
        };
        let user = reply
            .body
            .get("userID")
            .and_then(Value::as_str)
            .unwrap_or("gateway")
            .to_owned();

        match reply.body.get_mut("result") {
            Some(Value::Array(items)) => {
                self.enrich_values(&mut items[..], &spec, &user, 0).await?;
            }
            Some(single) if single.is_object() => {
                self.enrich_values(std::slice::from_mut(single), &spec, &user, 0)
                    .await?;
            }
            _ => {}
        }
        Ok(reply)
    }

    /// Inflate the declared references of a batch of payload objects.
    ///
    /// Reference occurrences are collected across the whole batch first so
    /// each unique `(target, id)` pair is fetched exactly once, then the
    /// fetched objects are substituted everywhere they were referenced.
    async fn enrich_values(
        &self,
        values: &mut [Value],
        spec: &RefSpec,
        user: &str,
        depth: usize,
    ) -> Result<(), ResolveError> {
        // (value index, field, target, referenced id)
        let mut wanted: Vec<(usize, String, String, String)> = Vec::new();
        for (idx, value) in values.iter().enumerate() {
            let Some(object) = value.as_object() else {
                continue;
            };
            for reference in &spec.refs {
                if let Some(id) = object.get(&reference.field).and_then(Value::as_str) {
                    wanted.push((
                        idx,
                        reference.field.clone(),
                        reference.target.clone(),
                        id.to_owned(),
                    ));
                }
            }
        }
        if wanted.is_empty() {
            return Ok(());
        }
        if depth >= self.config().max_resolution_depth {
            return Err(ResolveError::DepthExceeded {
                entity: spec.entity.clone(),
            });
        }

        let mut unique: Vec<(String, String)> = Vec::new();
        for (_, _, target, id) in &wanted {
            let pair = (target.clone(), id.clone());
            if !unique.contains(&pair) {
                unique.push(pair);
            }
        }

        let fetched = future::try_join_all(
            unique
                .iter()
                .map(|(target, id)| self.fetch_and_inflate(target, id, user, depth)),
        )
        .await?;
        let inflated: HashMap<(String, String), Value> =
            unique.into_iter().zip(fetched).collect();

        for (idx, field, target, id) in wanted {
            if let Some(entity) = inflated.get(&(target, id)) {
                if let Some(object) = values[idx].as_object_mut() {
                    object.insert(field, entity.clone());
                }
            }
        }
        Ok(())
    }

    /// Fetch one referenced entity and recursively inflate its own
    /// declared references one level deeper.
    fn fetch_and_inflate<'a>(
        &'a self,
        target: &'a str,
        id: &'a str,
        user: &'a str,
        depth: usize,
    ) -> BoxFuture<'a, Result<Value, ResolveError>> {
        Box::pin(async move {
            let mut value = self.fetch_entity(target, id, user).await?;
            if let Some(spec) = self.registry().get(target).cloned() {
                self.enrich_values(std::slice::from_mut(&mut value), &spec, user, depth + 1)
                    .await?;
            }
            Ok(value)
        })
    }

    /// One intercepted READ round-trip for a single entity.
    async fn fetch_entity(
        &self,
        entity: &str,
        entity_id: &str,
        user: &str,
    ) -> Result<Value, ResolveError> {
        let (uid, rx) = {
            let mut state = self.state();
            let uid = state.ids.allocate();
            let (tx, rx) = oneshot::channel();
            state.intercepts.insert(uid, tx);
            (uid, rx)
        };
        debug!(entity, id = entity_id, msg_id = %uid, "issuing resolver sub-fetch");

        let message = RequestMessage::new(uid, Intention::Read, user)
            .with_field("id", Value::String(entity_id.to_owned()));
        let key = RoutingKey::read(entity);
        let payload = match message.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                self.abandon_intercept(uid);
                return Err(err.into());
            }
        };
        if let Err(err) = self.transport().publish(&key, payload).await {
            self.abandon_intercept(uid);
            return Err(err.into());
        }

        // Resolver ids are not in the request table, so the terminator
        // never sweeps them; the await itself carries the deadline.
        match tokio::time::timeout(self.config().reply_deadline, rx).await {
            Ok(Ok(reply)) => {
                if reply.status != 0 {
                    return Err(ResolveError::Upstream {
                        entity: entity.to_owned(),
                        status: reply.status,
                    });
                }
                let missing = || ResolveError::Missing {
                    entity: entity.to_owned(),
                    id: entity_id.to_owned(),
                };
                match reply.into_result() {
                    Value::Array(items) => items.into_iter().next().ok_or_else(missing),
                    Value::Null => Err(missing()),
                    single => Ok(single),
                }
            }
            Ok(Err(_)) => Err(ResolveError::Abandoned),
            Err(_) => {
                self.abandon_intercept(uid);
                Err(ResolveError::Timeout {
                    entity: entity.to_owned(),
                    id: entity_id.to_owned(),
                })
            }
        }
    }

    /// Drop an intercept entry that will never be satisfied and release
    /// its id.
    fn abandon_intercept(&self, uid: RequestId) {
        let mut state = self.state();
        state.intercepts.remove(&uid);
        state.ids.release(uid);
    }
}
