//! Shieldpool Listener binary.
//!
//! Entry point for the event ingestion service.

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shieldpool_listener::{ListenerConfig, ListenerContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,shieldpool_listener=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ListenerConfig::from_env().context("invalid configuration")?;

    tracing::info!("Starting Shieldpool Listener");
    tracing::info!("Chain id: {}", config.chain_id);
    tracing::info!("Contracts: {}", config.contract_addresses.join(", "));
    tracing::info!("Start block: {}", config.start_block);
    tracing::info!("Chunk size: {}", config.block_chunk_size);
    tracing::info!("Exchange: {}", config.amqp_exchange);

    let context = ListenerContext::connect(config)
        .await
        .context("failed to initialize listener")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
    });

    let service = context.ingestion_service();
    let result = service.run(shutdown_rx).await;

    tracing::info!("Final metrics: {:?}", context.metrics().snapshot());
    context.close().await;

    result.context("ingestion failed")?;
    tracing::info!("Shutting down listener");

    Ok(())
}
