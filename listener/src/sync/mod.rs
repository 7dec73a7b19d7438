//! Backfill, live forwarding and the supervising ingestion loop.
//!
//! # Components
//!
//! - [`backfill`]: Checkpointed range scanner
//! - [`live`]: Subscription reader
//! - [`service`]: Restart loop tying the two together

pub mod backfill;
pub mod live;
pub mod service;

use std::time::Duration;

use tokio::sync::watch;

pub use backfill::{BackfillConfig, BackfillReport, BackfillScheduler, BackfillState, BlockRange};
pub use live::{LiveForwarder, LiveState};
pub use service::{IngestionService, ServiceConfig};

/// Sleeps for `delay`. Returns true early if shutdown is requested.
///
/// A dropped shutdown sender never wakes the sleep.
pub(crate) async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        Ok(_) = shutdown.wait_for(|stop| *stop) => true,
    }
}
