//! Fan-out of domain events over a topic-routed message bus.
//!
//! # Components
//!
//! - [`amqp`]: Publisher on a durable AMQP topic exchange
//! - [`consumer`]: Queue consumer used by downstream workers
//!
//! Every message is an [`OutboundMessage`] envelope serialized as JSON:
//! `{"type": "<routing key>", "data": <event>}`.

pub mod amqp;
pub mod consumer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::events::DomainEvent;

pub use amqp::{AmqpConfig, AmqpPublisher};
pub use consumer::{BusConsumer, ConsumerConfig, ReceivedMessage};

/// Envelope sent on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Routing key the message was published under.
    #[serde(rename = "type")]
    pub routing_key: String,

    /// The event.
    pub data: DomainEvent,
}

impl OutboundMessage {
    /// Wraps an event under its own routing key.
    #[must_use]
    pub fn new(event: DomainEvent) -> Self {
        Self {
            routing_key: event.routing_key().to_string(),
            data: event,
        }
    }

    /// Wraps an event under an explicit routing key.
    #[must_use]
    pub fn with_routing_key(routing_key: impl Into<String>, event: DomainEvent) -> Self {
        Self {
            routing_key: routing_key.into(),
            data: event,
        }
    }

    /// Serializes the envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        serde_json::to_vec(self).map_err(|e| PublishError::Serialization(e.to_string()))
    }

    /// Parses an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid envelope.
    pub fn from_json(payload: &[u8]) -> Result<Self, PublishError> {
        serde_json::from_slice(payload).map_err(|e| PublishError::Deserialization(e.to_string()))
    }
}

/// Bus errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Channel operation failed.
    #[error("channel error: {0}")]
    Channel(String),

    /// Failed to serialize message.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize message.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The broker rejected the message.
    #[error("broker nacked message on {0}")]
    Nacked(String),

    /// The publish did not complete in time.
    #[error("publish timed out after {0} ms")]
    Timeout(u64),

    /// No live connection.
    #[error("not connected")]
    NotConnected,

    /// The publisher was closed.
    #[error("publisher closed")]
    Closed,
}

impl From<lapin::Error> for PublishError {
    fn from(err: lapin::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

/// Publishes domain events with at-least-once delivery.
///
/// `Ok` means the broker accepted the message.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `event` under `routing_key`.
    async fn publish(&self, routing_key: &str, event: &DomainEvent) -> Result<(), PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DepositEvent, EventKind};
    use alloy::primitives::{Address, B256, U256};

    fn deposit() -> DomainEvent {
        DomainEvent::Deposit(DepositEvent {
            commitment: B256::repeat_byte(0x11),
            depositor: Address::repeat_byte(0x22),
            leaf_index: 7,
            on_chain_timestamp: U256::from(1_700_000_000u64),
            tx_hash: B256::repeat_byte(0xaa),
            block_number: 120,
            contract_address: Address::repeat_byte(0x01),
            chain_id: 2021,
        })
    }

    #[test]
    fn test_outbound_message_envelope() {
        let msg = OutboundMessage::new(deposit());
        let json: serde_json::Value = serde_json::from_slice(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], EventKind::Deposit.routing_key());
        assert_eq!(json["data"]["event"], "deposit");
        assert_eq!(json["data"]["leaf_index"], 7);
        assert_eq!(json["data"]["block_number"], 120);
    }

    #[test]
    fn test_outbound_message_parse() {
        let msg = OutboundMessage::with_routing_key("kyc.mint", deposit());
        let parsed = OutboundMessage::from_json(&msg.to_json().unwrap()).unwrap();

        assert_eq!(parsed, msg);
        assert_eq!(parsed.routing_key, "kyc.mint");
    }

    #[test]
    fn test_outbound_message_parse_invalid() {
        let err = OutboundMessage::from_json(b"{\"type\": 1}").unwrap_err();
        assert!(matches!(err, PublishError::Deserialization(_)));
    }

    #[test]
    fn test_publish_error_display() {
        assert_eq!(PublishError::NotConnected.to_string(), "not connected");
        assert_eq!(
            PublishError::Timeout(10_000).to_string(),
            "publish timed out after 10000 ms"
        );
    }
}
