//! Ingestion service.
//!
//! Runs the backfill-then-stream cycle under a supervising restart loop.

use std::sync::Arc;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::backfill::{BackfillConfig, BackfillScheduler};
use super::live::LiveForwarder;
use super::sleep_or_shutdown;
use crate::backoff::{Backoff, BackoffConfig};
use crate::chain::LogSource;
use crate::error::PipelineError;
use crate::events::{EventProcessor, PipelineMetrics};
use crate::store::CheckpointStore;

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Backfill parameters.
    pub backfill: BackfillConfig,

    /// Delay between cycle restarts.
    pub restart: BackoffConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backfill: BackfillConfig::default(),
            restart: BackoffConfig::new(1_000, 2.0, 60_000),
        }
    }
}

/// Progress of the current process across cycles.
#[derive(Debug, Default, Clone, Copy)]
struct CycleProgress {
    /// A backfill pass has completed at least once.
    synced: bool,
    /// The current cycle reached the streaming phase.
    streamed: bool,
}

/// Supervised ingestion loop.
///
/// Each cycle backfills to the head, opens the live subscription, backfills
/// once more to cover blocks mined in between, then streams. Failures before
/// the first completed backfill that [`PipelineError::is_fatal_at_startup`]
/// are returned; everything else restarts the cycle from the checkpoint
/// after a backoff.
pub struct IngestionService {
    source: Arc<dyn LogSource>,
    checkpoints: Arc<dyn CheckpointStore>,
    processor: EventProcessor,
    contracts: Vec<Address>,
    config: ServiceConfig,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl IngestionService {
    /// Creates a new service.
    #[must_use]
    pub fn new(
        source: Arc<dyn LogSource>,
        checkpoints: Arc<dyn CheckpointStore>,
        processor: EventProcessor,
        contracts: Vec<Address>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            source,
            checkpoints,
            processor,
            contracts,
            config,
            running: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.processor.metrics()
    }

    /// Returns true if the service is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Runs until shutdown is signalled.
    ///
    /// # Errors
    ///
    /// Returns an error only for startup failures.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        self.running
            .store(true, std::sync::atomic::Ordering::Relaxed);
        info!(
            "Ingestion service started for {} contracts on chain {}",
            self.contracts.len(),
            self.processor.decoder().chain_id()
        );

        let result = self.supervise(shutdown).await;

        self.running
            .store(false, std::sync::atomic::Ordering::Relaxed);
        info!("Ingestion service stopped");
        result
    }

    async fn supervise(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let mut progress = CycleProgress::default();
        let mut backoff = Backoff::new(self.config.restart);

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            progress.streamed = false;
            match self.run_cycle(&mut progress, &shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) if !progress.synced && e.is_fatal_at_startup() => {
                    error!("Startup failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    if progress.streamed {
                        backoff.reset();
                    }
                    let delay = backoff.next_delay();
                    self.processor.metrics().record_restart();
                    error!("Ingestion cycle failed: {}; restarting in {:?}", e, delay);

                    if sleep_or_shutdown(delay, &mut shutdown).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs one cycle. `Ok` means shutdown was requested.
    async fn run_cycle(
        &self,
        progress: &mut CycleProgress,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let mut backfill = BackfillScheduler::new(
            Arc::clone(&self.source),
            Arc::clone(&self.checkpoints),
            self.processor.clone(),
            self.contracts.clone(),
            self.config.backfill.clone(),
        );

        let report = backfill.run(shutdown).await?;
        if report.interrupted {
            return Ok(());
        }
        progress.synced = true;

        let mut live = LiveForwarder::new(
            Arc::clone(&self.source),
            Arc::clone(&self.checkpoints),
            self.processor.clone(),
            self.contracts.clone(),
        );
        let stream = live.subscribe().await?;

        let catch_up = backfill.run(shutdown).await?;
        if catch_up.interrupted {
            return Ok(());
        }
        if catch_up.ranges > 0 {
            warn!(
                "Caught up {} ranges mined during subscription setup",
                catch_up.ranges
            );
        }

        progress.streamed = true;
        live.forward(stream, shutdown).await
    }
}

impl std::fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("contracts", &self.contracts)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
