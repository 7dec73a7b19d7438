//! Queue consumer for downstream workers.
//!
//! Declares a durable queue, binds it to routing-key patterns on the topic
//! exchange and yields parsed envelopes. Acknowledgement is explicit: a
//! message that cannot be parsed is rejected without requeue.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::amqp::DEFAULT_EXCHANGE;
use super::{OutboundMessage, PublishError};

/// Consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Broker URL.
    pub url: String,

    /// Topic exchange name.
    pub exchange: String,

    /// Durable queue name.
    pub queue: String,

    /// Routing-key patterns, e.g. `listener.*`.
    pub bindings: Vec<String>,

    /// Maximum unacknowledged deliveries.
    pub prefetch: u16,
}

impl ConsumerConfig {
    /// Creates a config for `queue` bound to `bindings`.
    #[must_use]
    pub fn new(url: impl Into<String>, queue: impl Into<String>, bindings: Vec<String>) -> Self {
        Self {
            url: url.into(),
            exchange: DEFAULT_EXCHANGE.to_string(),
            queue: queue.into(),
            bindings,
            prefetch: 16,
        }
    }

    /// Sets the exchange name.
    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }
}

/// A parsed delivery awaiting acknowledgement.
#[derive(Debug)]
pub struct ReceivedMessage {
    /// The envelope.
    pub message: OutboundMessage,
    delivery: Delivery,
}

impl ReceivedMessage {
    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is gone.
    pub async fn ack(self) -> Result<(), PublishError> {
        self.delivery.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    /// Rejects the message, optionally requeueing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is gone.
    pub async fn nack(self, requeue: bool) -> Result<(), PublishError> {
        self.delivery
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

/// Consumer of bus envelopes from one durable queue.
pub struct BusConsumer {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    config: ConsumerConfig,
}

impl BusConsumer {
    /// Connects, declares the exchange and queue, and binds every pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if any broker operation fails.
    pub async fn connect(config: ConsumerConfig) -> Result<Self, PublishError> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for pattern in &config.bindings {
            channel
                .queue_bind(
                    &config.queue,
                    &config.exchange,
                    pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        channel
            .basic_qos(config.prefetch, BasicQosOptions::default())
            .await?;

        let consumer = channel
            .basic_consume(
                &config.queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            "Consuming '{}' bound to {:?} on '{}'",
            config.queue, config.bindings, config.exchange
        );

        Ok(Self {
            connection,
            channel,
            consumer,
            config,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Waits for the next valid envelope.
    ///
    /// Malformed payloads are rejected without requeue and skipped. Returns
    /// `None` when the consumer is cancelled or the connection drops.
    ///
    /// # Errors
    ///
    /// Returns an error if a delivery fails.
    pub async fn next_message(&mut self) -> Option<Result<ReceivedMessage, PublishError>> {
        loop {
            let delivery = match self.consumer.next().await? {
                Ok(delivery) => delivery,
                Err(e) => return Some(Err(e.into())),
            };

            match parse_delivery(&delivery.data) {
                Ok(message) => return Some(Ok(ReceivedMessage { message, delivery })),
                Err(e) => {
                    warn!("Rejecting malformed message: {}", e);
                    if let Err(e) = delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await
                    {
                        return Some(Err(e.into()));
                    }
                }
            }
        }
    }

    /// Closes the channel and connection.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(200, "shutdown").await {
            warn!("Error closing consumer channel: {}", e);
        }
        if let Err(e) = self.connection.close(200, "shutdown").await {
            warn!("Error closing consumer connection: {}", e);
        }
    }
}

/// Parses a delivery body into an envelope.
pub(crate) fn parse_delivery(body: &[u8]) -> Result<OutboundMessage, PublishError> {
    OutboundMessage::from_json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DomainEvent, WithdrawalEvent, WITHDRAWAL_ROUTING_KEY};
    use alloy::primitives::{Address, B256, U256};

    #[test]
    fn test_consumer_config_new() {
        let config = ConsumerConfig::new(
            "amqp://localhost:5672/%2f",
            "relayer",
            vec!["listener.*".to_string()],
        )
        .with_exchange("events");

        assert_eq!(config.queue, "relayer");
        assert_eq!(config.exchange, "events");
        assert_eq!(config.bindings, vec!["listener.*".to_string()]);
        assert_eq!(config.prefetch, 16);
    }

    #[test]
    fn test_parse_delivery() {
        let event = DomainEvent::Withdrawal(WithdrawalEvent {
            recipient: Address::repeat_byte(0x33),
            nullifier_hash: B256::repeat_byte(0x44),
            relayer: Address::repeat_byte(0x55),
            fee: U256::from(1_000u64),
            tx_hash: B256::repeat_byte(0xbb),
            block_number: 121,
            contract_address: Address::repeat_byte(0x01),
            chain_id: 2021,
        });
        let body = OutboundMessage::new(event.clone()).to_json().unwrap();

        let parsed = parse_delivery(&body).unwrap();
        assert_eq!(parsed.routing_key, WITHDRAWAL_ROUTING_KEY);
        assert_eq!(parsed.data, event);
    }

    #[test]
    fn test_parse_delivery_rejects_garbage() {
        assert!(parse_delivery(b"not json").is_err());
        assert!(parse_delivery(b"{\"type\":\"listener.deposit\"}").is_err());
    }
}
