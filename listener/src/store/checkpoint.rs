//! Checkpoint tracking ingestion progress per contract and chain.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest block fully ingested for one `(contract, chain)` pair.
///
/// Checkpoints only move forward; an advance to a lower block is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Watched contract.
    pub contract_address: Address,

    /// Chain id.
    pub chain_id: u64,

    /// Last block whose logs are durably stored.
    pub last_synced_block: u64,
}

impl Checkpoint {
    /// Creates a checkpoint at `last_synced_block`.
    #[must_use]
    pub const fn new(contract_address: Address, chain_id: u64, last_synced_block: u64) -> Self {
        Self {
            contract_address,
            chain_id,
            last_synced_block,
        }
    }

    /// Moves the checkpoint forward.
    ///
    /// Returns false (and leaves the checkpoint unchanged) if `block` is not
    /// ahead of the current value.
    pub fn advance(&mut self, block: u64) -> bool {
        if block > self.last_synced_block {
            self.last_synced_block = block;
            true
        } else {
            false
        }
    }
}

/// Computes the first block to scan.
///
/// An operator-supplied start block never rewinds past completed work.
#[must_use]
pub fn effective_start(configured_start: u64, stored: Option<u64>) -> u64 {
    match stored {
        Some(last) => configured_start.max(last.saturating_add(1)),
        None => configured_start,
    }
}

/// A checkpoint row with its last update time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// The checkpoint.
    pub checkpoint: Checkpoint,
    /// When it was last advanced.
    pub updated_at: DateTime<Utc>,
}
