//! AMQP transport for the switchboard gateway.
//!
//! Implements [`BrokerTransport`] over a single AMQP 0.9.1 connection with
//! two channels:
//!
//! - a **publish channel** bound to the non-durable topic exchange
//!   `request`, where every outgoing request message lands under its
//!   `<entity>.details.<verb>` routing key;
//! - a **consume channel** bound to the direct exchange `gateway` through an
//!   exclusive inbox queue, consumed with auto-ack.
//!
//! The topology is asserted at connect time, in order, and any failure is
//! fatal to startup. The inbox queue is exclusive, so exactly one gateway
//! instance consumes it; horizontal scaling requires a queue per instance.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_amqp::AmqpTransport;
//!
//! # async fn example() -> Result<(), switchboard_core::TransportError> {
//! let transport = AmqpTransport::builder()
//!     .url("amqp://localhost:5672")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::future::Future;
use std::pin::Pin;
use switchboard_core::{BrokerTransport, FrameStream, RoutingKey, TransportError};
use tracing::{debug, info, warn};

/// Name of the topic exchange requests are published to.
pub const REQUEST_EXCHANGE: &str = "request";

/// Name of the direct exchange replies arrive through.
pub const GATEWAY_EXCHANGE: &str = "gateway";

/// Name of the exclusive inbox queue.
pub const INBOX_QUEUE: &str = "inbox";

/// AMQP-backed [`BrokerTransport`].
///
/// Holds the process-wide connection plus its two channels for the life of
/// the process; dropping the connection fails every in-flight request,
/// which then surface to clients as timeouts.
#[derive(Debug)]
pub struct AmqpTransport {
    publish_channel: Channel,
    consume_channel: Channel,
    queue_name: String,
    consumer_tag: String,
    // Kept alive so the channels outlive the struct's users.
    _connection: Connection,
}

impl AmqpTransport {
    /// Start building a transport.
    #[must_use]
    pub fn builder() -> AmqpTransportBuilder {
        AmqpTransportBuilder::default()
    }

    /// Connect with default options.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] if any topology step
    /// fails; see the module docs for the startup contract.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::builder().url(url).connect().await
    }

    /// The server-assigned (or asserted) inbox queue name.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// Builder for [`AmqpTransport`].
#[derive(Debug, Default)]
pub struct AmqpTransportBuilder {
    url: Option<String>,
    consumer_tag: Option<String>,
}

impl AmqpTransportBuilder {
    /// Set the broker URL (e.g. `amqp://localhost:5672`).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Override the consumer tag used on the inbox subscription.
    ///
    /// Default: `switchboard-inbox`.
    #[must_use]
    pub fn consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    /// Open the connection and assert the gateway topology.
    ///
    /// Steps, in order, each fatal on failure:
    /// 1. open the publish channel and assert the topic exchange `request`
    ///    (non-durable);
    /// 2. open the consume channel and assert the direct exchange `gateway`;
    /// 3. assert the exclusive queue `inbox` and bind it to `gateway` with
    ///    an empty routing key.
    ///
    /// Consumption itself starts when [`BrokerTransport::consume`] is
    /// called.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] naming the failing step.
    pub async fn connect(self) -> Result<AmqpTransport, TransportError> {
        let url = self
            .url
            .ok_or_else(|| TransportError::ConnectionFailed("broker URL not configured".into()))?;

        let connection = Connection::connect(&url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("connect: {e}")))?;

        let publish_channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("publish channel: {e}")))?;
        publish_channel
            .exchange_declare(
                REQUEST_EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: false,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("request exchange: {e}")))?;

        let consume_channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("consume channel: {e}")))?;
        consume_channel
            .exchange_declare(
                GATEWAY_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("gateway exchange: {e}")))?;

        let queue = consume_channel
            .queue_declare(
                INBOX_QUEUE,
                QueueDeclareOptions {
                    exclusive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("inbox queue: {e}")))?;
        let queue_name = queue.name().as_str().to_owned();

        consume_channel
            .queue_bind(
                &queue_name,
                GATEWAY_EXCHANGE,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("inbox binding: {e}")))?;

        info!(
            url = %url,
            queue = %queue_name,
            "AMQP transport connected; topology asserted"
        );

        Ok(AmqpTransport {
            publish_channel,
            consume_channel,
            queue_name,
            consumer_tag: self
                .consumer_tag
                .unwrap_or_else(|| "switchboard-inbox".to_owned()),
            _connection: connection,
        })
    }
}

impl BrokerTransport for AmqpTransport {
    fn publish(
        &self,
        key: &RoutingKey,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let _confirm = self
                .publish_channel
                .basic_publish(
                    REQUEST_EXCHANGE,
                    &key,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default().with_content_type("application/json".into()),
                )
                .await
                .map_err(|e| TransportError::PublishFailed {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            debug!(key = %key, bytes = payload.len(), "frame published");
            Ok(())
        })
    }

    fn consume(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<FrameStream, TransportError>> + Send + '_>> {
        Box::pin(async move {
            let consumer = self
                .consume_channel
                .basic_consume(
                    &self.queue_name,
                    &self.consumer_tag,
                    BasicConsumeOptions {
                        no_ack: true,
                        ..BasicConsumeOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError::ConsumeFailed(e.to_string()))?;

            info!(queue = %self.queue_name, "consuming inbox with auto-ack");

            // Forward deliveries through a channel so the stream handed to
            // the gateway owns no broker types.
            let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<u8>>(100);
            tokio::spawn(async move {
                let mut consumer = consumer;
                while let Some(delivery) = consumer.next().await {
                    match delivery {
                        Ok(delivery) => {
                            if delivery.data.is_empty() {
                                warn!("ignoring empty delivery on the inbox");
                                continue;
                            }
                            if tx.send(delivery.data).await.is_err() {
                                break; // Gateway dropped the stream.
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "inbox delivery error");
                        }
                    }
                }
                debug!("inbox consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(frame) = rx.recv().await {
                    yield frame;
                }
            };

            Ok(Box::pin(stream) as FrameStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<AmqpTransport>();
        assert_sync::<AmqpTransport>();
    }

    #[test]
    fn builder_requires_url() {
        let builder = AmqpTransport::builder();
        let err = futures::executor::block_on(builder.connect()).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }
}
