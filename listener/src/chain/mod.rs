//! Chain log source.
//!
//! Abstracts the remote chain node: bounded historical log queries, the
//! current head, and a live log subscription.

pub mod rpc;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use rpc::RpcLogSource;

/// A raw contract log as delivered by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    /// Emitting contract.
    pub contract_address: Address,
    /// Ordered topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// Non-indexed event data.
    pub data: Bytes,
    /// Transaction hash.
    pub tx_hash: B256,
    /// Block number.
    pub block_number: u64,
    /// Position of the log within its block.
    pub log_index: u64,
}

/// Historical log query over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// Contracts to match; a log from any of them is returned.
    pub addresses: Vec<Address>,
    /// Optional event signatures to match against `topics[0]`.
    pub topics: Option<Vec<B256>>,
    /// First block (inclusive).
    pub from_block: u64,
    /// Last block (inclusive).
    pub to_block: u64,
}

impl LogQuery {
    /// Creates a query for all events of `addresses` in `[from_block, to_block]`.
    #[must_use]
    pub fn new(addresses: Vec<Address>, from_block: u64, to_block: u64) -> Self {
        Self {
            addresses,
            topics: None,
            from_block,
            to_block,
        }
    }

    /// Restricts the query to the given event signatures.
    #[must_use]
    pub fn with_topics(mut self, topics: Vec<B256>) -> Self {
        self.topics = Some(topics);
        self
    }
}

/// Live stream of logs. Ends when the subscription is dropped by the node.
pub type LogStream = BoxStream<'static, RawLog>;

/// Errors from the chain log source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Could not connect to the node.
    #[error("failed to connect to chain node: {0}")]
    Connect(String),

    /// An RPC request failed.
    #[error("rpc request `{method}` failed: {reason}")]
    Rpc {
        /// RPC method.
        method: &'static str,
        /// Failure description.
        reason: String,
    },

    /// An RPC request did not complete in time.
    #[error("rpc request `{0}` timed out")]
    Timeout(&'static str),

    /// The subscription could not be opened.
    #[error("log subscription failed: {0}")]
    Subscribe(String),
}

/// Capability wrapping a remote chain node.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Returns the current chain head block number.
    async fn chain_head(&self) -> Result<u64, SourceError>;

    /// Fetches logs for a bounded block range.
    async fn fetch_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, SourceError>;

    /// Opens a live subscription to logs emitted by `addresses`.
    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_query_new() {
        let query = LogQuery::new(vec![Address::repeat_byte(1)], 10, 20);
        assert_eq!(query.from_block, 10);
        assert_eq!(query.to_block, 20);
        assert!(query.topics.is_none());
    }

    #[test]
    fn test_log_query_with_topics() {
        let query = LogQuery::new(vec![], 1, 2).with_topics(vec![B256::repeat_byte(9)]);
        assert_eq!(query.topics, Some(vec![B256::repeat_byte(9)]));
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Rpc {
            method: "eth_getLogs",
            reason: "range too large".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "rpc request `eth_getLogs` failed: range too large"
        );
        assert_eq!(
            SourceError::Timeout("eth_blockNumber").to_string(),
            "rpc request `eth_blockNumber` timed out"
        );
    }
}
