//! Pipeline error type.

use crate::bus::PublishError;
use crate::chain::SourceError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors that stop a backfill pass or a live stream.
///
/// Undecodable logs never surface here: they are skipped where they occur.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Chain node failure.
    #[error("log source error: {0}")]
    Source(#[from] SourceError),

    /// Storage failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Broker failure.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    /// A block range kept failing after every retry.
    #[error("range [{from}, {to}] failed after {attempts} attempts: {source}")]
    RangeExhausted {
        /// First block of the range.
        from: u64,
        /// Last block of the range.
        to: u64,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: Box<PipelineError>,
    },

    /// The live subscription ended.
    #[error("live subscription ended")]
    StreamEnded,
}

impl PipelineError {
    /// Returns true if the error should abort the process when it happens
    /// before the first backfill completes.
    ///
    /// Bad configuration, an unreachable chain head and an unreadable
    /// checkpoint store are fatal at startup. A range that exhausted its
    /// retries is not: the cycle restarts from the checkpoint. Broker
    /// failures are retried the same way.
    #[must_use]
    pub const fn is_fatal_at_startup(&self) -> bool {
        match self {
            Self::Config(_) | Self::Source(_) | Self::Store(_) => true,
            Self::RangeExhausted { .. } | Self::Publish(_) | Self::StreamEnded => false,
        }
    }
}
