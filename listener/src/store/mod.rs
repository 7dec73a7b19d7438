//! Durable storage for checkpoints and decoded events.
//!
//! # Components
//!
//! - [`checkpoint`]: Checkpoint value type and start-block computation
//! - [`postgres`]: Postgres implementation (sqlx)
//! - [`memory`]: In-process implementation for tests and embedding
//!
//! Event storage is idempotent: a second insert of the same natural key
//! (commitment or nullifier hash, per contract and chain) reports
//! [`StoreOutcome::Duplicate`] instead of failing.

pub mod checkpoint;
pub mod memory;
pub mod postgres;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::events::{DepositEvent, DomainEvent, EventKind, WithdrawalEvent};

pub use checkpoint::{effective_start, Checkpoint, CheckpointRecord};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Row id of a stored event.
pub type StoredId = i64;

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The event was stored for the first time.
    Inserted(StoredId),

    /// The event already existed.
    Duplicate {
        /// Id of the existing row.
        id: StoredId,
        /// Whether the existing row was already published.
        published: bool,
    },
}

impl StoreOutcome {
    /// Returns the row id.
    #[must_use]
    pub const fn id(&self) -> StoredId {
        match self {
            Self::Inserted(id) | Self::Duplicate { id, .. } => *id,
        }
    }

    /// Returns true if this was a first insert.
    #[must_use]
    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    /// Returns true if the event still has to be published.
    ///
    /// A duplicate whose earlier publish never succeeded is published again.
    #[must_use]
    pub const fn needs_publish(&self) -> bool {
        match self {
            Self::Inserted(_) => true,
            Self::Duplicate { published, .. } => !*published,
        }
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be converted back into a domain value.
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Failure description.
        reason: String,
    },

    /// The store is unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of the highest block fully ingested per contract and chain.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the last synced block, if any.
    async fn get_checkpoint(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<Option<u64>, StoreError>;

    /// Advances the checkpoint. Lower values than the stored one are ignored.
    async fn advance_checkpoint(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), StoreError>;
}

/// Idempotent storage for decoded events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Stores a deposit keyed by `(contract, chain, commitment)`.
    async fn store_deposit(&self, event: &DepositEvent) -> Result<StoreOutcome, StoreError>;

    /// Stores a withdrawal keyed by `(contract, chain, nullifier_hash)`.
    async fn store_withdrawal(&self, event: &WithdrawalEvent) -> Result<StoreOutcome, StoreError>;

    /// Records that the event stored under `id` was published.
    async fn mark_published(&self, kind: EventKind, id: StoredId) -> Result<(), StoreError>;

    /// Stores any domain event.
    async fn store(&self, event: &DomainEvent) -> Result<StoreOutcome, StoreError> {
        match event {
            DomainEvent::Deposit(deposit) => self.store_deposit(deposit).await,
            DomainEvent::Withdrawal(withdrawal) => self.store_withdrawal(withdrawal).await,
        }
    }
}
