//! Live subscription forwarding.

use std::sync::Arc;

use alloy::primitives::Address;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::{LogSource, LogStream};
use crate::error::PipelineError;
use crate::events::{EventProcessor, ProcessingResult};
use crate::store::CheckpointStore;

/// Observable forwarder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    /// Opening the subscription.
    Subscribing,
    /// Reading logs.
    Streaming,
    /// The stream ended; waiting for the supervisor to resubscribe.
    Resubscribing,
}

/// Reads the live log subscription and pushes every log through the
/// processor.
///
/// The checkpoint is advanced block by block: once a log from a newer block
/// arrives, every log of the previous block has been delivered, so that block
/// is sealed. Advancing is best effort; a failed advance only means a wider
/// re-scan after restart.
pub struct LiveForwarder {
    source: Arc<dyn LogSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    processor: EventProcessor,
    contracts: Vec<Address>,
    state: LiveState,
    pending_block: Option<u64>,
    result: ProcessingResult,
}

impl LiveForwarder {
    /// Creates a forwarder for `contracts`.
    #[must_use]
    pub fn new(
        source: Arc<dyn LogSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        processor: EventProcessor,
        contracts: Vec<Address>,
    ) -> Self {
        Self {
            source,
            checkpoints,
            processor,
            contracts,
            state: LiveState::Subscribing,
            pending_block: None,
            result: ProcessingResult::empty(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> LiveState {
        self.state
    }

    /// Returns the outcomes of all logs forwarded so far.
    #[must_use]
    pub const fn result(&self) -> &ProcessingResult {
        &self.result
    }

    /// Opens the subscription for all watched contracts.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be opened.
    pub async fn subscribe(&mut self) -> Result<LogStream, PipelineError> {
        self.state = LiveState::Subscribing;
        self.pending_block = None;
        let stream = self.source.subscribe_logs(&self.contracts).await?;
        info!("Live subscription open for {} contracts", self.contracts.len());
        Ok(stream)
    }

    /// Forwards logs until shutdown, stream end or a processing failure.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreamEnded`] if the node drops the
    /// subscription, or the first store or publish error.
    pub async fn forward(
        &mut self,
        mut stream: LogStream,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        self.state = LiveState::Streaming;
        let mut shutdown = shutdown.clone();

        loop {
            let log = tokio::select! {
                log = stream.next() => log,
                Ok(_) = shutdown.wait_for(|stop| *stop) => {
                    info!("Live forwarder stopping");
                    return Ok(());
                }
            };

            let Some(log) = log else {
                warn!("Live subscription ended");
                self.state = LiveState::Resubscribing;
                return Err(PipelineError::StreamEnded);
            };

            if let Some(pending) = self.pending_block {
                if log.block_number > pending {
                    self.seal(pending).await;
                }
            }
            self.pending_block = Some(
                self.pending_block
                    .map_or(log.block_number, |p| p.max(log.block_number)),
            );

            match self.processor.process_log(&log).await {
                Ok(outcome) => {
                    debug!("Live log block={} outcome={:?}", log.block_number, outcome);
                    self.result.record(outcome);
                }
                Err(e) => {
                    self.state = LiveState::Resubscribing;
                    return Err(e);
                }
            }
        }
    }

    async fn seal(&self, block: u64) {
        let chain_id = self.processor.decoder().chain_id();
        for contract in &self.contracts {
            if let Err(e) = self
                .checkpoints
                .advance_checkpoint(*contract, chain_id, block)
                .await
            {
                warn!(
                    "Failed to advance checkpoint for {} to {}: {}",
                    contract, block, e
                );
            }
        }
        debug!("Sealed live block {}", block);
    }
}

impl std::fmt::Debug for LiveForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveForwarder")
            .field("contracts", &self.contracts)
            .field("state", &self.state)
            .field("pending_block", &self.pending_block)
            .finish_non_exhaustive()
    }
}
