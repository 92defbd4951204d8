//! # Switchboard Core
//!
//! The request-correlation and dispatch engine of the switchboard gateway.
//!
//! Switchboard accepts REST requests, translates them into typed request
//! messages, publishes them onto a topic-routed broker exchange, and
//! correlates the asynchronous replies back to the waiting HTTP responders.
//! This crate is the broker-bound half of that story:
//!
//! - **Identifier allocation** ([`id`]): unique numeric request ids, released
//!   on completion or timeout.
//! - **Pending-request table** ([`table`]): one record per in-flight request,
//!   holding the HTTP responder handle and the completion callback.
//! - **Broker transport** ([`transport`]): the [`BrokerTransport`] trait that
//!   concrete brokers (AMQP in production, in-memory in tests) implement.
//! - **Gateway** ([`gateway`]): the `send_request` dispatcher, the reply
//!   demultiplexer, and the timeout terminator.
//! - **Entity resolver** ([`resolver`]): inflates identifier fields in
//!   replies into nested entity objects via additional broker round-trips
//!   before the HTTP response is emitted.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   send_request    ┌─────────────┐   publish    ┌────────┐
//! │ Adapter  │ ────────────────► │   Gateway   │ ───────────► │ Broker │
//! └──────────┘                   │  (pending   │              └───┬────┘
//!      ▲                         │   table)    │ ◄────────────────┘
//!      │   responder (oneshot)   └──────┬──────┘   inbox frames
//!      │                                │
//!      │                         ┌──────▼──────┐
//!      └──────────────────────── │ Demux /     │
//!             completion         │ Resolver    │
//!                                └─────────────┘
//! ```
//!
//! The crate is framework-free: no HTTP types, no broker client. The web
//! shell and the broker implementations live in sibling crates and meet this
//! one at the [`Responder`] and [`BrokerTransport`] seams.
//!
//! # Concurrency model
//!
//! All shared mutable state (allocator, table, intercept registry) sits
//! behind a single coarse mutex inside [`Gateway`]; critical sections are
//! microseconds and no lock is ever held across an await point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod envelope;
pub mod gateway;
pub mod id;
pub mod message;
pub mod resolver;
pub mod responder;
pub mod routing;
pub mod table;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use envelope::{Envelope, ErrorBody, ErrorCode};
pub use gateway::{Gateway, GatewayConfig};
pub use id::{IdAllocator, RequestId};
pub use message::{Intention, Reply, ReplyParseError, RequestMessage};
pub use resolver::{RefField, RefSpec, ResolveError, ResolverRegistry};
pub use responder::{default_completion, GatewayResponse, Responder};
pub use routing::{RoutingKey, Verb};
pub use table::{Completion, PendingRequest, RequestTable, ValidationError, Validator};
pub use transport::{BrokerTransport, FrameStream, TransportError};
