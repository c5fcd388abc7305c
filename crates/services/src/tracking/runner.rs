use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use course_core::model::BACKSTOP_INTERVAL_SECS;

use super::tracker::ProgressTracker;

/// Cadence of the elapsed-time recomputation.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Timer task driving a [`ProgressTracker`].
///
/// Ticks once per second, issues the safety-net flush every
/// [`BACKSTOP_INTERVAL_SECS`], and on shutdown stops tracking with a
/// best-effort final flush.
pub struct TrackingTask {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

/// Spawn the timer task for a tracker.
///
/// Flush failures inside the loop are recorded on the tracker's error
/// surface and retried on later ticks, so the loop itself never exits early.
#[must_use]
pub fn spawn_tracking(tracker: Arc<ProgressTracker>) -> TrackingTask {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let mut ticker = time::interval(TICK_INTERVAL);
        // a delayed tick must not trigger a catch-up burst; elapsed time is
        // derived from wall clock, so skipped ticks lose nothing
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    ticks += 1;
                    if ticks % BACKSTOP_INTERVAL_SECS == 0 {
                        let _ = tracker.flush_outstanding().await;
                    } else {
                        let _ = tracker.tick().await;
                    }
                }
            }
        }

        debug!("tracking task shutting down");
        tracker.shutdown().await;
    });

    TrackingTask {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    }
}

impl TrackingTask {
    /// Stop the timer loop and wait for the final flush to complete.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// True until [`Self::stop`] has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TrackingTask {
    fn drop(&mut self) {
        // dropped without stop(): cancel the loop; the session's unflushed
        // delta is abandoned with it
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
