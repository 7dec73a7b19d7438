//! Event decoder.
//!
//! Turns a [`RawLog`] into a typed [`DomainEvent`]. The event kind is
//! identified by `topics[0]`. Deposits are decoded against the ABI layout;
//! withdrawals are read from fixed 32-byte data slots, with the relayer
//! taken from `topics[1]`.
//!
//! Decoding is pure and never panics: every failure is a [`DecodeError`]
//! that the caller logs before skipping the log.

pub mod abi;

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;

use crate::chain::RawLog;
use crate::events::{DepositEvent, DomainEvent, WithdrawalEvent};

use abi::{
    Deposit, Withdrawal, DEPOSIT_DATA_LEN, DEPOSIT_TOPICS, WITHDRAWAL_DATA_LEN,
    WITHDRAWAL_TOPICS,
};

/// Errors produced while decoding a log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// `topics[0]` does not match any known event signature.
    #[error("unknown event signature {0}")]
    UnknownEvent(B256),

    /// `data` is shorter than the event requires.
    #[error("{event} data truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Event name.
        event: &'static str,
        /// Minimum length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// The log carries fewer topics than the event requires.
    #[error("{event} log has {actual} topics, expected {expected}")]
    MissingTopics {
        /// Event name, or `"log"` when there is no signature topic at all.
        event: &'static str,
        /// Required topic count.
        expected: usize,
        /// Actual topic count.
        actual: usize,
    },

    /// Structured ABI decoding failed.
    #[error("{event} abi decoding failed: {reason}")]
    Abi {
        /// Event name.
        event: &'static str,
        /// Failure description.
        reason: String,
    },
}

/// Decoder for pool contract logs on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDecoder {
    chain_id: u64,
}

impl EventDecoder {
    /// Creates a decoder that tags events with `chain_id`.
    #[must_use]
    pub const fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }

    /// Returns the chain id attached to decoded events.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Returns the signature hashes of all events this decoder understands.
    #[must_use]
    pub fn signatures() -> Vec<B256> {
        vec![Deposit::SIGNATURE_HASH, Withdrawal::SIGNATURE_HASH]
    }

    /// Decodes a raw log.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the log is not a known event or is malformed.
    pub fn decode(&self, log: &RawLog) -> Result<DomainEvent, DecodeError> {
        let signature = log.topics.first().ok_or(DecodeError::MissingTopics {
            event: "log",
            expected: 1,
            actual: 0,
        })?;

        if *signature == Deposit::SIGNATURE_HASH {
            self.decode_deposit(log).map(DomainEvent::Deposit)
        } else if *signature == Withdrawal::SIGNATURE_HASH {
            self.decode_withdrawal(log).map(DomainEvent::Withdrawal)
        } else {
            Err(DecodeError::UnknownEvent(*signature))
        }
    }

    fn decode_deposit(&self, log: &RawLog) -> Result<DepositEvent, DecodeError> {
        check_topics("Deposit", log, DEPOSIT_TOPICS)?;
        let data = log
            .data
            .get(..DEPOSIT_DATA_LEN)
            .ok_or(DecodeError::Truncated {
                event: "Deposit",
                expected: DEPOSIT_DATA_LEN,
                actual: log.data.len(),
            })?;

        let decoded = Deposit::decode_raw_log(log.topics.iter().copied(), data, true).map_err(
            |e| DecodeError::Abi {
                event: "Deposit",
                reason: e.to_string(),
            },
        )?;

        Ok(DepositEvent {
            commitment: decoded.commitment,
            depositor: decoded.depositor,
            leaf_index: decoded.leafIndex,
            on_chain_timestamp: decoded.timestamp,
            tx_hash: log.tx_hash,
            block_number: log.block_number,
            contract_address: log.contract_address,
            chain_id: self.chain_id,
        })
    }

    fn decode_withdrawal(&self, log: &RawLog) -> Result<WithdrawalEvent, DecodeError> {
        check_topics("Withdrawal", log, WITHDRAWAL_TOPICS)?;
        if log.data.len() < WITHDRAWAL_DATA_LEN {
            return Err(DecodeError::Truncated {
                event: "Withdrawal",
                expected: WITHDRAWAL_DATA_LEN,
                actual: log.data.len(),
            });
        }

        let relayer = log
            .topics
            .get(1)
            .copied()
            .map(Address::from_word)
            .ok_or(DecodeError::MissingTopics {
                event: "Withdrawal",
                expected: WITHDRAWAL_TOPICS,
                actual: log.topics.len(),
            })?;

        // Slot 0: recipient (low 20 bytes), slot 1: nullifier hash, slot 2: fee.
        let recipient = Address::from_word(data_word("Withdrawal", &log.data, 0)?);
        let nullifier_hash = data_word("Withdrawal", &log.data, 1)?;
        let fee = U256::from_be_bytes(data_word("Withdrawal", &log.data, 2)?.0);

        Ok(WithdrawalEvent {
            recipient,
            nullifier_hash,
            relayer,
            fee,
            tx_hash: log.tx_hash,
            block_number: log.block_number,
            contract_address: log.contract_address,
            chain_id: self.chain_id,
        })
    }
}

fn check_topics(event: &'static str, log: &RawLog, expected: usize) -> Result<(), DecodeError> {
    if log.topics.len() < expected {
        return Err(DecodeError::MissingTopics {
            event,
            expected,
            actual: log.topics.len(),
        });
    }
    Ok(())
}

/// Reads the 32-byte slot at `index` from `data`.
fn data_word(event: &'static str, data: &[u8], index: usize) -> Result<B256, DecodeError> {
    let start = index * 32;
    data.get(start..start + 32)
        .map(B256::from_slice)
        .ok_or(DecodeError::Truncated {
            event,
            expected: start + 32,
            actual: data.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Bytes;

    const CHAIN_ID: u64 = 2021;

    fn deposit_log(data: Vec<u8>) -> RawLog {
        RawLog {
            contract_address: Address::repeat_byte(0x01),
            topics: vec![
                Deposit::SIGNATURE_HASH,
                B256::repeat_byte(0x11),
                Address::repeat_byte(0x22).into_word(),
            ],
            data: Bytes::from(data),
            tx_hash: B256::repeat_byte(0xaa),
            block_number: 100,
            log_index: 0,
        }
    }

    fn deposit_data(leaf_index: u32, timestamp: u64) -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[28..32].copy_from_slice(&leaf_index.to_be_bytes());
        data[32..64].copy_from_slice(&U256::from(timestamp).to_be_bytes::<32>());
        data
    }

    fn withdrawal_log(data: Vec<u8>) -> RawLog {
        RawLog {
            contract_address: Address::repeat_byte(0x01),
            topics: vec![
                Withdrawal::SIGNATURE_HASH,
                Address::repeat_byte(0x33).into_word(),
            ],
            data: Bytes::from(data),
            tx_hash: B256::repeat_byte(0xbb),
            block_number: 101,
            log_index: 1,
        }
    }

    fn withdrawal_data() -> Vec<u8> {
        let mut data = vec![0u8; 96];
        data[12..32].copy_from_slice(Address::repeat_byte(0x44).as_slice());
        data[32..64].copy_from_slice(B256::repeat_byte(0x55).as_slice());
        data[64..96].copy_from_slice(&U256::from(1_000_000u64).to_be_bytes::<32>());
        data
    }

    #[test]
    fn test_decode_deposit() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let log = deposit_log(deposit_data(7, 1_700_000_000));

        let event = decoder.decode(&log).expect("deposit");
        let DomainEvent::Deposit(deposit) = event else {
            panic!("expected deposit");
        };

        assert_eq!(deposit.commitment, B256::repeat_byte(0x11));
        assert_eq!(deposit.depositor, Address::from_word(log.topics[2]));
        assert_eq!(deposit.depositor, Address::repeat_byte(0x22));
        assert_eq!(deposit.leaf_index, 7);
        assert_eq!(deposit.on_chain_timestamp, U256::from(1_700_000_000u64));
        assert_eq!(deposit.tx_hash, B256::repeat_byte(0xaa));
        assert_eq!(deposit.block_number, 100);
        assert_eq!(deposit.contract_address, Address::repeat_byte(0x01));
        assert_eq!(deposit.chain_id, CHAIN_ID);
    }

    #[test]
    fn test_decode_deposit_truncated() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let log = deposit_log(vec![0u8; 40]);

        assert_eq!(
            decoder.decode(&log),
            Err(DecodeError::Truncated {
                event: "Deposit",
                expected: 64,
                actual: 40,
            })
        );
    }

    #[test]
    fn test_decode_deposit_missing_topics() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let mut log = deposit_log(deposit_data(1, 1));
        log.topics.truncate(2);

        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::MissingTopics {
                event: "Deposit",
                expected: 3,
                actual: 2,
            })
        ));
    }

    #[test]
    fn test_decode_withdrawal_raw_offsets() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let log = withdrawal_log(withdrawal_data());

        let event = decoder.decode(&log).expect("withdrawal");
        let DomainEvent::Withdrawal(withdrawal) = event else {
            panic!("expected withdrawal");
        };

        assert_eq!(withdrawal.recipient, Address::repeat_byte(0x44));
        assert_eq!(withdrawal.nullifier_hash, B256::repeat_byte(0x55));
        assert_eq!(
            withdrawal.nullifier_hash.to_string(),
            format!("0x{}", "55".repeat(32))
        );
        assert_eq!(withdrawal.fee, U256::from(1_000_000u64));
        assert_eq!(withdrawal.relayer, Address::repeat_byte(0x33));
        assert_eq!(withdrawal.block_number, 101);
        assert_eq!(withdrawal.chain_id, CHAIN_ID);
    }

    #[test]
    fn test_decode_withdrawal_ignores_high_bytes_of_recipient_slot() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let mut data = withdrawal_data();
        data[..12].copy_from_slice(&[0xffu8; 12]);

        let event = decoder.decode(&withdrawal_log(data)).expect("withdrawal");
        let DomainEvent::Withdrawal(withdrawal) = event else {
            panic!("expected withdrawal");
        };

        assert_eq!(withdrawal.recipient, Address::repeat_byte(0x44));
    }

    #[test]
    fn test_decode_withdrawal_truncated() {
        let decoder = EventDecoder::new(CHAIN_ID);

        for len in [0, 32, 95] {
            let log = withdrawal_log(vec![0u8; len]);
            assert_eq!(
                decoder.decode(&log),
                Err(DecodeError::Truncated {
                    event: "Withdrawal",
                    expected: 96,
                    actual: len,
                })
            );
        }
    }

    #[test]
    fn test_decode_withdrawal_accepts_longer_data() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let mut data = withdrawal_data();
        data.extend_from_slice(&[0u8; 32]);

        assert!(decoder.decode(&withdrawal_log(data)).is_ok());
    }

    #[test]
    fn test_decode_unknown_event() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let mut log = deposit_log(deposit_data(1, 1));
        log.topics[0] = B256::repeat_byte(0xee);

        assert_eq!(
            decoder.decode(&log),
            Err(DecodeError::UnknownEvent(B256::repeat_byte(0xee)))
        );
    }

    #[test]
    fn test_decode_no_topics() {
        let decoder = EventDecoder::new(CHAIN_ID);
        let mut log = deposit_log(deposit_data(1, 1));
        log.topics.clear();

        assert!(matches!(
            decoder.decode(&log),
            Err(DecodeError::MissingTopics { actual: 0, .. })
        ));
    }

    #[test]
    fn test_signatures() {
        let signatures = EventDecoder::signatures();
        assert_eq!(signatures.len(), 2);
        assert!(signatures.contains(&Deposit::SIGNATURE_HASH));
        assert!(signatures.contains(&Withdrawal::SIGNATURE_HASH));
    }
}
