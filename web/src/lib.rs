//! Axum REST adapters for the switchboard gateway.
//!
//! Each entity gets the uniform CRUD surface:
//!
//! - `GET /E` - query by optional, typed filters;
//! - `POST /E` - create with a required field set;
//! - `GET /E/:id` - fetch one (read-path references are inflated);
//! - `PATCH /E/:id` - update, all body fields optional;
//! - `DELETE /E/:id` - delete by path id.
//!
//! The adapters are thin: a declarative [`EntitySpec`] validates and
//! coerces the client's fields, the core's `Gateway` does the broker
//! round-trip, and the response envelope comes back through a oneshot
//! responder. Validation failures are answered with 400 before any broker
//! traffic happens.
//!
//! # Example
//!
//! ```ignore
//! let spec = Arc::new(
//!     EntitySpec::new("equipment")
//!         .field(FieldSpec::required("name", FieldKind::String))
//!         .field(FieldSpec::optional("locationID", FieldKind::String)),
//! );
//! let app = api_router(vec![spec], AppState::new(gateway));
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod entity;
pub mod error;
pub mod extract;
mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use entity::{EntitySpec, FieldKind, FieldSpec};
pub use error::BadRequest;
pub use extract::CallerId;
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};
pub use router::{api_router, entity_router};
pub use state::AppState;
