//! Test doubles shared by unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures::StreamExt;

use crate::bus::{EventPublisher, PublishError};
use crate::chain::{LogQuery, LogSource, LogStream, RawLog, SourceError};
use crate::decoder::abi::{Deposit, Withdrawal};
use crate::events::DomainEvent;

pub const CONTRACT: Address = address!("00000000000000000000000000000000000000c0");
pub const OTHER_CONTRACT: Address = address!("00000000000000000000000000000000000000c1");

fn tx_hash(block: u64, salt: u8) -> B256 {
    let mut bytes = [salt; 32];
    bytes[24..].copy_from_slice(&block.to_be_bytes());
    B256::from(bytes)
}

/// A well-formed deposit log whose commitment is `key` repeated.
pub fn deposit_log(contract: Address, key: u8, block: u64) -> RawLog {
    let mut data = vec![0u8; 64];
    data[28..32].copy_from_slice(&u32::from(key).to_be_bytes());
    data[32..64].copy_from_slice(&U256::from(1_700_000_000u64 + block).to_be_bytes::<32>());

    RawLog {
        contract_address: contract,
        topics: vec![
            Deposit::SIGNATURE_HASH,
            B256::repeat_byte(key),
            Address::repeat_byte(0x22).into_word(),
        ],
        data: Bytes::from(data),
        tx_hash: tx_hash(block, key),
        block_number: block,
        log_index: u64::from(key),
    }
}

/// A well-formed withdrawal log whose nullifier hash is `key` repeated.
pub fn withdrawal_log(contract: Address, key: u8, block: u64) -> RawLog {
    let mut data = vec![0u8; 96];
    data[12..32].copy_from_slice(Address::repeat_byte(0x33).as_slice());
    data[32..64].copy_from_slice(B256::repeat_byte(key).as_slice());
    data[64..96].copy_from_slice(&U256::from(5_000u64).to_be_bytes::<32>());

    RawLog {
        contract_address: contract,
        topics: vec![
            Withdrawal::SIGNATURE_HASH,
            Address::repeat_byte(0x44).into_word(),
        ],
        data: Bytes::from(data),
        tx_hash: tx_hash(block, key),
        block_number: block,
        log_index: u64::from(key),
    }
}

/// A log with an unrecognised signature.
pub fn unknown_log(contract: Address, block: u64) -> RawLog {
    RawLog {
        contract_address: contract,
        topics: vec![B256::repeat_byte(0xee)],
        data: Bytes::new(),
        tx_hash: tx_hash(block, 0xee),
        block_number: block,
        log_index: 0,
    }
}

/// Log source serving a fixed set of historical logs and queued live streams.
#[derive(Default)]
pub struct ScriptedSource {
    head: AtomicU64,
    head_after_subscribe: Mutex<Option<u64>>,
    fail_head: AtomicBool,
    fail_fetches: AtomicU32,
    logs: Mutex<Vec<RawLog>>,
    streams: Mutex<VecDeque<LogStream>>,
    queries: Mutex<Vec<(u64, u64)>>,
    last_topics: Mutex<Option<Vec<B256>>>,
    subscriptions: Mutex<Vec<Vec<Address>>>,
}

impl ScriptedSource {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            ..Default::default()
        }
    }

    pub fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Queues a live stream that yields `logs` and then ends.
    pub fn push_subscription(&self, logs: Vec<RawLog>) {
        self.push_stream(futures::stream::iter(logs).boxed());
    }

    pub fn push_stream(&self, stream: LogStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    /// Fails the next `count` fetches.
    pub fn fail_fetches(&self, count: u32) {
        self.fail_fetches.store(count, Ordering::SeqCst);
    }

    pub fn fail_head(&self, fail: bool) {
        self.fail_head.store(fail, Ordering::SeqCst);
    }

    /// Moves the head once the next subscription opens.
    pub fn set_head_after_subscribe(&self, head: u64) {
        *self.head_after_subscribe.lock().unwrap() = Some(head);
    }

    /// Ranges requested so far, failed attempts included.
    pub fn queries(&self) -> Vec<(u64, u64)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn last_topics(&self) -> Option<Vec<B256>> {
        self.last_topics.lock().unwrap().clone()
    }

    /// Address lists of every subscription opened.
    pub fn subscribed_addresses(&self) -> Vec<Vec<Address>> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn chain_head(&self) -> Result<u64, SourceError> {
        if self.fail_head.load(Ordering::SeqCst) {
            return Err(SourceError::Timeout("eth_blockNumber"));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, SourceError> {
        self.queries
            .lock()
            .unwrap()
            .push((query.from_block, query.to_block));
        *self.last_topics.lock().unwrap() = query.topics.clone();

        let remaining = self.fail_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_fetches.store(remaining - 1, Ordering::SeqCst);
            return Err(SourceError::Rpc {
                method: "eth_getLogs",
                reason: "scripted failure".to_string(),
            });
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| {
                log.block_number >= query.from_block
                    && log.block_number <= query.to_block
                    && query.addresses.contains(&log.contract_address)
                    && query.topics.as_ref().map_or(true, |topics| {
                        log.topics.first().is_some_and(|t| topics.contains(t))
                    })
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream, SourceError> {
        self.subscriptions.lock().unwrap().push(addresses.to_vec());

        let stream = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SourceError::Subscribe("no scripted stream".to_string()))?;

        if let Some(head) = self.head_after_subscribe.lock().unwrap().take() {
            self.head.store(head, Ordering::SeqCst);
        }
        Ok(stream)
    }
}

/// Publisher recording every accepted message.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, DomainEvent)>>,
    fail_next: AtomicU32,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` publishes.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, DomainEvent)> {
        self.published.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    /// Number of distinct natural keys published.
    pub fn distinct_keys(&self) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| *event.natural_key())
            .collect::<HashSet<_>>()
            .len()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, routing_key: &str, event: &DomainEvent) -> Result<(), PublishError> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::NotConnected);
        }

        self.published
            .lock()
            .unwrap()
            .push((routing_key.to_string(), event.clone()));
        Ok(())
    }
}
