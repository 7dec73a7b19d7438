//! Checkpointed backfill over bounded block ranges.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::chain::{LogQuery, LogSource};
use crate::decoder::EventDecoder;
use crate::error::PipelineError;
use crate::events::{EventProcessor, ProcessingResult};
use crate::store::{effective_start, CheckpointStore};

use super::sleep_or_shutdown;

/// Inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block.
    pub from: u64,
    /// Last block.
    pub to: u64,
}

impl BlockRange {
    /// Creates a range.
    #[must_use]
    pub const fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Returns the number of blocks in the range.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.to.saturating_sub(self.from).saturating_add(1)
    }

    /// Returns true if the range is inverted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.to < self.from
    }

    /// Splits `[start, end]` into contiguous ascending ranges of `chunk_size`
    /// blocks. The last range is clamped to `end`.
    pub fn partition(start: u64, end: u64, chunk_size: u64) -> impl Iterator<Item = Self> {
        let step = chunk_size.max(1) - 1;
        let mut next = (start <= end).then_some(start);

        std::iter::from_fn(move || {
            let from = next?;
            let to = from.saturating_add(step).min(end);
            next = (to < end).then(|| to + 1);
            Some(Self { from, to })
        })
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillState {
    /// Not started.
    Idle,
    /// Fetching and processing a range.
    Scanning(BlockRange),
    /// Advancing checkpoints for a processed range.
    Committing(BlockRange),
    /// Caught up to the given block.
    CaughtUp(u64),
}

/// Backfill parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Configured start block.
    pub start_block: u64,

    /// Blocks per range.
    pub chunk_size: u64,

    /// Blocks behind the head to stop at.
    pub confirmations: u64,

    /// Attempts per range.
    pub max_range_attempts: u32,

    /// Delay between attempts.
    pub retry: BackoffConfig,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            chunk_size: 500,
            confirmations: 0,
            max_range_attempts: 5,
            retry: BackoffConfig::default(),
        }
    }
}

/// Outcome of one backfill pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Highest block committed, if the pass scanned anything.
    pub last_synced: Option<u64>,

    /// Ranges committed.
    pub ranges: u64,

    /// Per-log outcomes.
    pub result: ProcessingResult,

    /// True if shutdown interrupted the pass.
    pub interrupted: bool,
}

impl BackfillReport {
    fn new() -> Self {
        Self {
            last_synced: None,
            ranges: 0,
            result: ProcessingResult::empty(),
            interrupted: false,
        }
    }
}

/// Sequential bounded-range scanner.
///
/// Scans from the effective start block to the confirmation-adjusted head,
/// one range at a time. Checkpoints advance only after every log of a range
/// has been stored and published. A failing range is retried in place and
/// is never skipped.
pub struct BackfillScheduler {
    source: Arc<dyn LogSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    processor: EventProcessor,
    contracts: Vec<Address>,
    config: BackfillConfig,
    state: BackfillState,
}

impl BackfillScheduler {
    /// Creates a scheduler for `contracts`.
    #[must_use]
    pub fn new(
        source: Arc<dyn LogSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        processor: EventProcessor,
        contracts: Vec<Address>,
        config: BackfillConfig,
    ) -> Self {
        Self {
            source,
            checkpoints,
            processor,
            contracts,
            config,
            state: BackfillState::Idle,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> BackfillState {
        self.state
    }

    fn chain_id(&self) -> u64 {
        self.processor.decoder().chain_id()
    }

    /// Computes the first block to scan across all watched contracts.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint cannot be read.
    pub async fn start_block(&self) -> Result<u64, PipelineError> {
        let mut start: Option<u64> = None;
        for contract in &self.contracts {
            let stored = self
                .checkpoints
                .get_checkpoint(*contract, self.chain_id())
                .await?;
            let contract_start = effective_start(self.config.start_block, stored);
            debug!(
                "Contract {} checkpoint {:?}, starts at {}",
                contract, stored, contract_start
            );
            start = Some(start.map_or(contract_start, |s| s.min(contract_start)));
        }
        Ok(start.unwrap_or(self.config.start_block))
    }

    /// Scans up to the current head.
    ///
    /// # Errors
    ///
    /// Returns an error if the head or checkpoints cannot be read, or if a
    /// range fails on every attempt.
    pub async fn run(
        &mut self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BackfillReport, PipelineError> {
        let mut report = BackfillReport::new();

        let head = self.source.chain_head().await?;
        let target = head.saturating_sub(self.config.confirmations);
        let start = self.start_block().await?;

        if start > target {
            debug!("Backfill already at head {} (next block {})", target, start);
            self.state = BackfillState::CaughtUp(target);
            return Ok(report);
        }

        info!(
            "Backfilling blocks {} to {} (head {}) in chunks of {}",
            start, target, head, self.config.chunk_size
        );

        for range in BlockRange::partition(start, target, self.config.chunk_size) {
            if *shutdown.borrow() {
                info!("Backfill interrupted before range {}", range);
                report.interrupted = true;
                return Ok(report);
            }

            match self.run_range(range, shutdown).await? {
                Some(result) => {
                    report.result.merge(&result);
                    report.ranges += 1;
                    report.last_synced = Some(range.to);
                }
                None => {
                    report.interrupted = true;
                    return Ok(report);
                }
            }
        }

        self.state = BackfillState::CaughtUp(target);
        info!(
            "Backfill caught up at block {}: {} ranges, {} logs, {} published",
            target,
            report.ranges,
            report.result.logs_seen,
            report.result.published()
        );
        Ok(report)
    }

    /// Runs one range with retries. Returns `None` if shutdown interrupted
    /// the retry wait.
    async fn run_range(
        &mut self,
        range: BlockRange,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<ProcessingResult>, PipelineError> {
        let mut backoff = Backoff::new(self.config.retry);
        let attempts = self.config.max_range_attempts.max(1);
        let mut shutdown = shutdown.clone();

        for attempt in 1..=attempts {
            match self.try_range(range).await {
                Ok(result) => return Ok(Some(result)),
                Err(e) if attempt == attempts => {
                    return Err(PipelineError::RangeExhausted {
                        from: range.from,
                        to: range.to,
                        attempts,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "Range {} attempt {}/{} failed: {}; retrying in {:?}",
                        range, attempt, attempts, e, delay
                    );
                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        return Ok(None);
                    }
                }
            }
        }

        Ok(None)
    }

    async fn try_range(&mut self, range: BlockRange) -> Result<ProcessingResult, PipelineError> {
        self.state = BackfillState::Scanning(range);

        let query = LogQuery::new(self.contracts.clone(), range.from, range.to)
            .with_topics(EventDecoder::signatures());
        let logs = self.source.fetch_logs(&query).await?;
        let result = self.processor.process_batch(&logs).await?;

        self.state = BackfillState::Committing(range);
        for contract in &self.contracts {
            self.checkpoints
                .advance_checkpoint(*contract, self.chain_id(), range.to)
                .await?;
        }
        self.processor.metrics().record_range_committed();

        info!(
            "Committed range {}: {} logs, {} deposits, {} withdrawals, {} duplicates",
            range, result.logs_seen, result.deposits, result.withdrawals, result.duplicates
        );
        Ok(result)
    }
}

impl fmt::Debug for BackfillScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackfillScheduler")
            .field("contracts", &self.contracts)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
