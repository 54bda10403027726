//! Interval-driven scan runner that never lets two runs overlap

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counts of what a `PeriodicScan::run` loop did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodicStats {
    pub launched: usize,
    pub skipped: usize,
}

/// Clears the running flag when the run it guards ends, however it ends
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct PeriodicScan {
    interval: Duration,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

impl PeriodicScan {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cancel: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token that stops the loop. A run already in progress is awaited, not
    /// aborted; hand it a `child_token` to make it stop early.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the running flag, or `None` if a run is still in progress
    pub fn try_begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                running: Arc::clone(&self.running),
            })
    }

    /// Fire `job` on every tick until stopped. The first tick is immediate.
    /// A tick that arrives while the previous run is still going is skipped.
    /// Returns only once the last launched run has finished.
    pub async fn run<F, Fut>(&self, job: F) -> PeriodicStats
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut launched = 0;
        let mut skipped = 0;
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(guard) = self.try_begin() else {
                        warn!("Previous scan still running, skipping this tick");
                        skipped += 1;
                        continue;
                    };
                    launched += 1;
                    info!("Starting scheduled scan #{}", launched);
                    let run = job();
                    in_flight = Some(tokio::spawn(async move {
                        let _guard = guard;
                        run.await;
                    }));
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                info!("Waiting for the running scan to finish");
            }
            if let Err(e) = handle.await {
                warn!("Scheduled scan task failed: {}", e);
            }
        }

        info!("Periodic scan stopped");
        PeriodicStats { launched, skipped }
    }
}
