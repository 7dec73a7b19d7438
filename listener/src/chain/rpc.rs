//! WebSocket RPC log source.

use std::future::IntoFuture;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{LogQuery, LogSource, LogStream, RawLog, SourceError};

/// Log source backed by an Ethereum JSON-RPC node over WebSocket.
///
/// Every request is bounded by the configured timeout so one unresponsive
/// call cannot wedge the pipeline.
#[derive(Clone)]
pub struct RpcLogSource {
    provider: RootProvider<PubSubFrontend>,
    timeout: Duration,
}

impl RpcLogSource {
    /// Connects to the node at `rpc_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established in time.
    pub async fn connect(rpc_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        info!("Connecting to chain node at {}", rpc_url);

        let provider = tokio::time::timeout(
            timeout,
            ProviderBuilder::new().on_ws(WsConnect::new(rpc_url)),
        )
        .await
        .map_err(|_| SourceError::Timeout("connect"))?
        .map_err(|e| SourceError::Connect(e.to_string()))?;

        Ok(Self { provider, timeout })
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, E, F>(&self, method: &'static str, fut: F) -> Result<T, SourceError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| SourceError::Timeout(method))?
            .map_err(|e| SourceError::Rpc {
                method,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn chain_head(&self) -> Result<u64, SourceError> {
        self.bounded("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn fetch_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, SourceError> {
        let mut filter = Filter::new()
            .address(query.addresses.clone())
            .from_block(query.from_block)
            .to_block(query.to_block);
        if let Some(topics) = &query.topics {
            filter = filter.event_signature(topics.clone());
        }

        let logs = self
            .bounded("eth_getLogs", self.provider.get_logs(&filter))
            .await?;

        debug!(
            "eth_getLogs [{}, {}] returned {} logs",
            query.from_block,
            query.to_block,
            logs.len()
        );

        Ok(logs.into_iter().filter_map(raw_log_from_rpc).collect())
    }

    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream, SourceError> {
        let filter = Filter::new().address(addresses.to_vec());

        let subscription = tokio::time::timeout(self.timeout, self.provider.subscribe_logs(&filter))
            .await
            .map_err(|_| SourceError::Timeout("eth_subscribe"))?
            .map_err(|e| SourceError::Subscribe(e.to_string()))?;

        info!("Subscribed to logs for {} contracts", addresses.len());

        Ok(subscription
            .into_stream()
            .filter_map(|log| async move { raw_log_from_rpc(log) })
            .boxed())
    }
}

/// Converts an RPC log, dropping removed and pending logs.
fn raw_log_from_rpc(log: Log) -> Option<RawLog> {
    if log.removed {
        warn!(
            "Dropping removed log (reorg) tx={:?} block={:?}",
            log.transaction_hash, log.block_number
        );
        return None;
    }

    let (Some(block_number), Some(tx_hash)) = (log.block_number, log.transaction_hash) else {
        debug!("Dropping pending log without block coordinates");
        return None;
    };

    Some(RawLog {
        contract_address: log.inner.address,
        topics: log.inner.data.topics().to_vec(),
        data: log.inner.data.data.clone(),
        tx_hash,
        block_number,
        log_index: log.log_index.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, B256};

    fn rpc_log(removed: bool, block_number: Option<u64>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x01),
                data: LogData::new_unchecked(
                    vec![B256::repeat_byte(0x0a), B256::repeat_byte(0x0b)],
                    Bytes::from(vec![1u8, 2, 3]),
                ),
            },
            block_hash: None,
            block_number,
            block_timestamp: None,
            transaction_hash: Some(B256::repeat_byte(0xcc)),
            transaction_index: Some(0),
            log_index: Some(4),
            removed,
        }
    }

    #[test]
    fn test_raw_log_from_rpc() {
        let raw = raw_log_from_rpc(rpc_log(false, Some(42))).expect("raw log");

        assert_eq!(raw.contract_address, Address::repeat_byte(0x01));
        assert_eq!(raw.topics.len(), 2);
        assert_eq!(raw.data.as_ref(), &[1u8, 2, 3]);
        assert_eq!(raw.tx_hash, B256::repeat_byte(0xcc));
        assert_eq!(raw.block_number, 42);
        assert_eq!(raw.log_index, 4);
    }

    #[test]
    fn test_raw_log_from_rpc_drops_removed() {
        assert!(raw_log_from_rpc(rpc_log(true, Some(42))).is_none());
    }

    #[test]
    fn test_raw_log_from_rpc_drops_pending() {
        assert!(raw_log_from_rpc(rpc_log(false, None)).is_none());
    }
}
