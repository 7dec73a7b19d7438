//! Event pipeline module.
//!
//! This module provides the decoded domain events and the processor that
//! stores and publishes them.
//!
//! # Components
//!
//! - [`types`]: DepositEvent, WithdrawalEvent, DomainEvent types
//! - [`processor`]: EventProcessor implementation
//! - [`metrics`]: Pipeline metrics

pub mod metrics;
pub mod processor;
pub mod types;

pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use processor::EventProcessor;
pub use types::{
    DepositEvent, DomainEvent, EventKind, LogOutcome, ProcessingResult, WithdrawalEvent,
    DEPOSIT_ROUTING_KEY, WITHDRAWAL_ROUTING_KEY,
};
