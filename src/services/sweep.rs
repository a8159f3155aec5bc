use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{clock::Clock, error::Result, stores::permanent::PermanentStore};

/// Result of one sweep invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Expired rows were deleted (possibly none).
    Completed(u64),
    /// Another sweep, here or on another instance, was already running.
    Skipped,
}

/// Periodically deletes expired rows from the permanent store.
///
/// The ephemeral store expires on its own; only durable rows need purging.
#[derive(Clone)]
pub struct ExpirySweep {
    permanent: Arc<dyn PermanentStore>,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when the sweep ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExpirySweep {
    pub fn new(permanent: Arc<dyn PermanentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            permanent,
            clock,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run_once(&self) -> Result<SweepOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            tracing::debug!("Expiry sweep already running, skipping");
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = RunningGuard(&self.running);

        match self.permanent.delete_expired(self.clock.now()).await? {
            Some(deleted) => Ok(SweepOutcome::Completed(deleted)),
            None => Ok(SweepOutcome::Skipped),
        }
    }

    /// Runs the sweep every `interval` until `shutdown` is cancelled.
    ///
    /// A failed run is logged and retried on the next tick.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("🛑 Expiry sweep stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }

                tracing::info!("🧹 Running scheduled sweep of expired revocation records...");
                match self.run_once().await {
                    Ok(SweepOutcome::Completed(deleted)) => {
                        tracing::info!("✅ Sweep completed, {} expired records removed", deleted);
                    }
                    Ok(SweepOutcome::Skipped) => {
                        tracing::info!("⏭️ Sweep skipped, another sweep holds the store");
                    }
                    Err(e) => {
                        tracing::error!("❌ Sweep failed: {}", e);
                    }
                }
            }
        })
    }
}
