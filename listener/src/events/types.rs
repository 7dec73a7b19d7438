//! Types for the event pipeline.
//!
//! Defines the decoded domain events and per-batch processing results.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Routing key for deposit events.
pub const DEPOSIT_ROUTING_KEY: &str = "listener.deposit";

/// Routing key for withdrawal events.
pub const WITHDRAWAL_ROUTING_KEY: &str = "listener.withdrawal";

/// Kind of a decoded domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A deposit into the pool.
    Deposit,
    /// A withdrawal from the pool.
    Withdrawal,
}

impl EventKind {
    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
        }
    }

    /// Returns the routing key events of this kind are published under.
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        match self {
            Self::Deposit => DEPOSIT_ROUTING_KEY,
            Self::Withdrawal => WITHDRAWAL_ROUTING_KEY,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded `Deposit` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Deposit commitment, unique per deposit.
    pub commitment: B256,
    /// Account that made the deposit.
    pub depositor: Address,
    /// Leaf index of the commitment in the pool's Merkle tree.
    pub leaf_index: u32,
    /// Block timestamp emitted by the contract.
    pub on_chain_timestamp: U256,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block number.
    pub block_number: u64,
    /// Emitting contract.
    pub contract_address: Address,
    /// Chain the event was observed on.
    pub chain_id: u64,
}

/// A decoded `Withdrawal` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    /// Account receiving the withdrawn funds.
    pub recipient: Address,
    /// Nullifier hash, unique per withdrawal.
    pub nullifier_hash: B256,
    /// Relayer that submitted the withdrawal.
    pub relayer: Address,
    /// Fee paid to the relayer.
    pub fee: U256,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block number.
    pub block_number: u64,
    /// Emitting contract.
    pub contract_address: Address,
    /// Chain the event was observed on.
    pub chain_id: u64,
}

/// A decoded contract event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Deposit event.
    Deposit(DepositEvent),
    /// Withdrawal event.
    Withdrawal(WithdrawalEvent),
}

impl DomainEvent {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Deposit(_) => EventKind::Deposit,
            Self::Withdrawal(_) => EventKind::Withdrawal,
        }
    }

    /// Returns the routing key for publishing.
    #[must_use]
    pub const fn routing_key(&self) -> &'static str {
        self.kind().routing_key()
    }

    /// Returns the natural uniqueness key (commitment or nullifier hash).
    #[must_use]
    pub const fn natural_key(&self) -> &B256 {
        match self {
            Self::Deposit(e) => &e.commitment,
            Self::Withdrawal(e) => &e.nullifier_hash,
        }
    }

    /// Returns the block number.
    #[must_use]
    pub const fn block_number(&self) -> u64 {
        match self {
            Self::Deposit(e) => e.block_number,
            Self::Withdrawal(e) => e.block_number,
        }
    }

    /// Returns the emitting contract.
    #[must_use]
    pub const fn contract_address(&self) -> Address {
        match self {
            Self::Deposit(e) => e.contract_address,
            Self::Withdrawal(e) => e.contract_address,
        }
    }

    /// Returns the transaction hash.
    #[must_use]
    pub const fn tx_hash(&self) -> &B256 {
        match self {
            Self::Deposit(e) => &e.tx_hash,
            Self::Withdrawal(e) => &e.tx_hash,
        }
    }
}

impl From<DepositEvent> for DomainEvent {
    fn from(event: DepositEvent) -> Self {
        Self::Deposit(event)
    }
}

impl From<WithdrawalEvent> for DomainEvent {
    fn from(event: WithdrawalEvent) -> Self {
        Self::Withdrawal(event)
    }
}

/// What happened to a single log in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// Stored for the first time (or never published before) and published.
    Published(EventKind),
    /// Already stored and published; nothing was sent.
    Duplicate(EventKind),
    /// Could not be decoded; skipped.
    Skipped,
}

/// Result of processing a batch of logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingResult {
    /// Number of logs seen.
    pub logs_seen: usize,
    /// Deposits published.
    pub deposits: usize,
    /// Withdrawals published.
    pub withdrawals: usize,
    /// Events already stored and published.
    pub duplicates: usize,
    /// Logs skipped because they could not be decoded.
    pub skipped: usize,
}

impl ProcessingResult {
    /// Creates an empty result.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Records the outcome of one log.
    pub fn record(&mut self, outcome: LogOutcome) {
        self.logs_seen += 1;
        match outcome {
            LogOutcome::Published(EventKind::Deposit) => self.deposits += 1,
            LogOutcome::Published(EventKind::Withdrawal) => self.withdrawals += 1,
            LogOutcome::Duplicate(_) => self.duplicates += 1,
            LogOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Folds another result into this one.
    pub fn merge(&mut self, other: &Self) {
        self.logs_seen += other.logs_seen;
        self.deposits += other.deposits;
        self.withdrawals += other.withdrawals;
        self.duplicates += other.duplicates;
        self.skipped += other.skipped;
    }

    /// Returns the number of events published.
    #[must_use]
    pub const fn published(&self) -> usize {
        self.deposits + self.withdrawals
    }

    /// Returns true if no logs were seen.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.logs_seen == 0
    }
}
