//! In-process store.
//!
//! Same uniqueness and monotonicity rules as the Postgres store. Used by
//! tests and when embedding the pipeline without a database.

use std::collections::HashMap;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Checkpoint, CheckpointStore, EventStore, StoreError, StoreOutcome, StoredId};
use crate::events::{DepositEvent, EventKind, WithdrawalEvent};

type NaturalKey = (Address, u64, B256);

/// A stored event row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow<T> {
    /// Row id.
    pub id: StoredId,
    /// The event.
    pub event: T,
    /// Whether the event has been published.
    pub published: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: StoredId,
    deposits: Vec<StoredRow<DepositEvent>>,
    withdrawals: Vec<StoredRow<WithdrawalEvent>>,
    deposit_keys: HashMap<NaturalKey, usize>,
    withdrawal_keys: HashMap<NaturalKey, usize>,
    checkpoints: HashMap<(Address, u64), Checkpoint>,
    /// Remaining event stores before every store call fails.
    fail_after: Option<usize>,
}

impl Inner {
    fn allocate_id(&mut self) -> StoredId {
        self.next_id += 1;
        self.next_id
    }

    fn check_fault(&mut self) -> Result<(), StoreError> {
        match self.fail_after.as_mut() {
            Some(0) => Err(StoreError::Unavailable("injected store failure".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Store keeping rows in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every event store fail once `count` more stores have succeeded.
    pub async fn fail_after(&self, count: usize) {
        self.inner.lock().await.fail_after = Some(count);
    }

    /// Clears an injected failure.
    pub async fn heal(&self) {
        self.inner.lock().await.fail_after = None;
    }

    /// Returns all stored deposits in insertion order.
    pub async fn deposits(&self) -> Vec<StoredRow<DepositEvent>> {
        self.inner.lock().await.deposits.clone()
    }

    /// Returns all stored withdrawals in insertion order.
    pub async fn withdrawals(&self) -> Vec<StoredRow<WithdrawalEvent>> {
        self.inner.lock().await.withdrawals.clone()
    }

    /// Returns the number of stored deposits.
    pub async fn deposit_count(&self) -> usize {
        self.inner.lock().await.deposits.len()
    }

    /// Returns the number of stored withdrawals.
    pub async fn withdrawal_count(&self) -> usize {
        self.inner.lock().await.withdrawals.len()
    }

    /// Sets a checkpoint directly, bypassing the monotonic rule.
    pub async fn set_checkpoint(&self, contract_address: Address, chain_id: u64, block: u64) {
        self.inner
            .lock()
            .await
            .checkpoints
            .insert(
                (contract_address, chain_id),
                Checkpoint::new(contract_address, chain_id, block),
            );
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_checkpoint(
        &self,
        contract_address: Address,
        chain_id: u64,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .checkpoints
            .get(&(contract_address, chain_id))
            .map(|checkpoint| checkpoint.last_synced_block))
    }

    async fn advance_checkpoint(
        &self,
        contract_address: Address,
        chain_id: u64,
        block_number: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .checkpoints
            .entry((contract_address, chain_id))
            .or_insert_with(|| Checkpoint::new(contract_address, chain_id, block_number))
            .advance(block_number);
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn store_deposit(&self, event: &DepositEvent) -> Result<StoreOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_fault()?;

        let key = (event.contract_address, event.chain_id, event.commitment);
        if let Some(&index) = inner.deposit_keys.get(&key) {
            let row = &inner.deposits[index];
            return Ok(StoreOutcome::Duplicate {
                id: row.id,
                published: row.published,
            });
        }

        let id = inner.allocate_id();
        let index = inner.deposits.len();
        inner.deposits.push(StoredRow {
            id,
            event: event.clone(),
            published: false,
        });
        inner.deposit_keys.insert(key, index);
        Ok(StoreOutcome::Inserted(id))
    }

    async fn store_withdrawal(&self, event: &WithdrawalEvent) -> Result<StoreOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_fault()?;

        let key = (event.contract_address, event.chain_id, event.nullifier_hash);
        if let Some(&index) = inner.withdrawal_keys.get(&key) {
            let row = &inner.withdrawals[index];
            return Ok(StoreOutcome::Duplicate {
                id: row.id,
                published: row.published,
            });
        }

        let id = inner.allocate_id();
        let index = inner.withdrawals.len();
        inner.withdrawals.push(StoredRow {
            id,
            event: event.clone(),
            published: false,
        });
        inner.withdrawal_keys.insert(key, index);
        Ok(StoreOutcome::Inserted(id))
    }

    async fn mark_published(&self, kind: EventKind, id: StoredId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let found = match kind {
            EventKind::Deposit => inner.deposits.iter_mut().find(|row| row.id == id).map(|row| {
                row.published = true;
            }),
            EventKind::Withdrawal => inner
                .withdrawals
                .iter_mut()
                .find(|row| row.id == id)
                .map(|row| {
                    row.published = true;
                }),
        };

        found.ok_or_else(|| StoreError::CorruptRow {
            table: kind.as_str(),
            reason: format!("no row with id {}", id),
        })
    }
}
