//! Shieldpool Listener - Deposit and withdrawal event ingestion and fan-out.
//!
//! This crate ingests `Deposit` and `Withdrawal` events emitted by pool
//! contracts on an EVM chain, stores them idempotently in Postgres and
//! republishes them on a topic exchange for downstream workers. Historical
//! blocks are scanned in checkpointed ranges before the live subscription
//! takes over.
//!
//! # Components
//!
//! - [`config`]: Listener configuration
//! - [`chain`]: Chain log source
//! - [`decoder`]: Raw log decoding
//! - [`store`]: Checkpoint and event storage
//! - [`bus`]: Message bus publisher and consumer
//! - [`events`]: Domain events, processor and metrics
//! - [`sync`]: Backfill, live forwarding and the ingestion service
//! - [`context`]: Connections built at startup

pub mod backoff;
pub mod bus;
pub mod chain;
pub mod config;
pub mod context;
pub mod decoder;
pub mod error;
pub mod events;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{Backoff, BackoffConfig};
pub use bus::{AmqpPublisher, EventPublisher, OutboundMessage, PublishError};
pub use chain::{LogSource, RawLog, RpcLogSource, SourceError};
pub use config::{ConfigError, ListenerConfig};
pub use context::ListenerContext;
pub use decoder::{DecodeError, EventDecoder};
pub use error::PipelineError;
pub use events::{DomainEvent, EventKind, EventProcessor, PipelineMetrics};
pub use store::{CheckpointStore, EventStore, MemoryStore, PgStore, StoreError, StoreOutcome};
pub use sync::{IngestionService, ServiceConfig};
