//! Connections built once at startup.

use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{debug, info, warn};

use crate::bus::{AmqpPublisher, EventPublisher};
use crate::chain::{LogSource, RpcLogSource};
use crate::config::ListenerConfig;
use crate::decoder::EventDecoder;
use crate::error::PipelineError;
use crate::events::{EventProcessor, PipelineMetrics};
use crate::store::{CheckpointStore, EventStore, PgStore};
use crate::sync::IngestionService;

/// Owns the database pool, chain connection and broker connection.
///
/// Built from a validated [`ListenerConfig`] and closed explicitly on
/// shutdown.
pub struct ListenerContext {
    config: ListenerConfig,
    contracts: Vec<Address>,
    store: Arc<PgStore>,
    source: Arc<RpcLogSource>,
    publisher: Arc<AmqpPublisher>,
    metrics: Arc<PipelineMetrics>,
}

impl ListenerContext {
    /// Opens every connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any dependency is
    /// unreachable.
    pub async fn connect(config: ListenerConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let contracts = config.parse_addresses()?;
        let metrics = Arc::new(PipelineMetrics::new());

        let store = PgStore::connect(&config.database_url, config.db_max_connections).await?;
        if config.run_migrations {
            store.run_migrations().await?;
        }
        store.health_check().await?;
        let stats = store.stats().await?;
        info!(
            "Database has {} deposits, {} withdrawals, {} unpublished, {} checkpoints",
            stats.deposit_count,
            stats.withdrawal_count,
            stats.unpublished_count,
            stats.checkpoint_count
        );
        log_recent_rows(&store).await;

        let source = RpcLogSource::connect(&config.rpc_url, config.rpc_timeout()).await?;
        let publisher = AmqpPublisher::connect(config.amqp(), Arc::clone(&metrics)).await?;

        Ok(Self {
            config,
            contracts,
            store: Arc::new(store),
            source: Arc::new(source),
            publisher: Arc::new(publisher),
            metrics,
        })
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Builds the ingestion service over these connections.
    #[must_use]
    pub fn ingestion_service(&self) -> IngestionService {
        let processor = EventProcessor::new(
            EventDecoder::new(self.config.chain_id),
            Arc::clone(&self.store) as Arc<dyn EventStore>,
            Arc::clone(&self.publisher) as Arc<dyn EventPublisher>,
            Arc::clone(&self.metrics),
        );

        IngestionService::new(
            Arc::clone(&self.source) as Arc<dyn LogSource>,
            Arc::clone(&self.store) as Arc<dyn CheckpointStore>,
            processor,
            self.contracts.clone(),
            self.config.service(),
        )
    }

    /// Closes the broker and database connections.
    pub async fn close(&self) {
        self.publisher.close().await;
        self.store.close().await;
        info!("Listener context closed");
    }
}

impl std::fmt::Debug for ListenerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerContext")
            .field("contracts", &self.contracts)
            .field("chain_id", &self.config.chain_id)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

/// Logs stored checkpoints and the newest rows. Read failures only warn.
async fn log_recent_rows(store: &PgStore) {
    match store.checkpoints().await {
        Ok(checkpoints) => {
            for record in checkpoints {
                info!(
                    "Checkpoint {} on chain {} at block {} (updated {})",
                    record.checkpoint.contract_address,
                    record.checkpoint.chain_id,
                    record.checkpoint.last_synced_block,
                    record.updated_at
                );
            }
        }
        Err(e) => warn!("Failed to read checkpoints: {}", e),
    }

    match store.recent_deposits(5, 0).await {
        Ok(deposits) => {
            info!("Retrieved {} recent deposits", deposits.len());
            for deposit in deposits {
                debug!(
                    "Deposit commitment={:#x} depositor={} block={}",
                    deposit.commitment, deposit.depositor, deposit.block_number
                );
            }
        }
        Err(e) => warn!("Failed to read recent deposits: {}", e),
    }

    match store.recent_withdrawals(5, 0).await {
        Ok(withdrawals) => {
            info!("Retrieved {} recent withdrawals", withdrawals.len());
            for withdrawal in withdrawals {
                debug!(
                    "Withdrawal nullifier={:#x} recipient={} block={}",
                    withdrawal.nullifier_hash, withdrawal.recipient, withdrawal.block_number
                );
            }
        }
        Err(e) => warn!("Failed to read recent withdrawals: {}", e),
    }
}
