//! Event processor implementation.
//!
//! The single decode, store, publish step shared by backfill and the live
//! forwarder.

use std::sync::Arc;

use tracing::{debug, warn};

use super::metrics::PipelineMetrics;
use super::types::{EventKind, LogOutcome, ProcessingResult};
use crate::bus::EventPublisher;
use crate::chain::RawLog;
use crate::decoder::EventDecoder;
use crate::error::PipelineError;
use crate::store::EventStore;

/// Event processor for deposits and withdrawals.
///
/// For each log: decode, store idempotently, and publish if the stored row
/// has not been published yet. A log that cannot be decoded is skipped; a
/// store or publish failure is returned so the caller can retry the log.
///
/// # Example
///
/// ```rust,ignore
/// use shieldpool_listener::events::EventProcessor;
///
/// let processor = EventProcessor::new(decoder, store, publisher, metrics);
/// let result = processor.process_batch(&logs).await?;
/// println!("Published {} events", result.published());
/// ```
#[derive(Clone)]
pub struct EventProcessor {
    decoder: EventDecoder,
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<PipelineMetrics>,
}

impl EventProcessor {
    /// Creates a new event processor.
    #[must_use]
    pub fn new(
        decoder: EventDecoder,
        store: Arc<dyn EventStore>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            decoder,
            store,
            publisher,
            metrics,
        }
    }

    /// Returns a reference to the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the decoder.
    #[must_use]
    pub const fn decoder(&self) -> &EventDecoder {
        &self.decoder
    }

    /// Processes one log.
    ///
    /// # Errors
    ///
    /// Returns an error if storing or publishing fails. The event may have
    /// been stored in that case; processing the log again publishes it.
    pub async fn process_log(&self, log: &RawLog) -> Result<LogOutcome, PipelineError> {
        self.metrics.record_log();

        let event = match self.decoder.decode(log) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    "Skipping log tx={} index={} block={}: {}",
                    log.tx_hash, log.log_index, log.block_number, e
                );
                self.metrics.record_decode_error();
                return Ok(LogOutcome::Skipped);
            }
        };

        let kind = event.kind();
        let outcome = self.store.store(&event).await?;

        if outcome.is_inserted() {
            match kind {
                EventKind::Deposit => self.metrics.record_deposit(),
                EventKind::Withdrawal => self.metrics.record_withdrawal(),
            }
        } else {
            self.metrics.record_duplicate();
        }

        if !outcome.needs_publish() {
            debug!(
                "{} {} already stored and published",
                kind,
                event.natural_key()
            );
            return Ok(LogOutcome::Duplicate(kind));
        }

        if let Err(e) = self.publisher.publish(event.routing_key(), &event).await {
            self.metrics.record_publish_failure();
            return Err(e.into());
        }
        self.metrics.record_published();
        self.store.mark_published(kind, outcome.id()).await?;

        debug!(
            "Published {} {} from block {}",
            kind,
            event.natural_key(),
            event.block_number()
        );

        Ok(LogOutcome::Published(kind))
    }

    /// Processes logs in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first store or publish error.
    pub async fn process_batch(&self, logs: &[RawLog]) -> Result<ProcessingResult, PipelineError> {
        let mut result = ProcessingResult::empty();
        for log in logs {
            result.record(self.process_log(log).await?);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("chain_id", &self.decoder.chain_id())
            .finish_non_exhaustive()
    }
}
