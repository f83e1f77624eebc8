//! Periodic queue maintenance.
//!
//! Runs the timeout reaper and then the retry manager on a fixed interval,
//! so jobs abandoned by a crashed worker are failed and, retries
//! permitting, put back into the queue. A broadcast channel triggers an
//! immediate pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::QueueError;
use crate::queue::reaper::TimeoutReaper;
use crate::queue::retry::RetryManager;

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenancePass {
    pub timed_out: u64,
    pub retried: u64,
}

pub struct MaintenanceScheduler {
    reaper: Arc<TimeoutReaper>,
    retry: Arc<RetryManager>,
    interval: Duration,
    timeout_after: Duration,
    shutdown: Arc<AtomicBool>,
}

impl MaintenanceScheduler {
    pub fn new(
        reaper: Arc<TimeoutReaper>,
        retry: Arc<RetryManager>,
        interval: Duration,
        timeout_after: Duration,
    ) -> Self {
        Self {
            reaper,
            retry,
            interval,
            timeout_after,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Reaps timed-out jobs, then resets retryable failures.
    pub fn run_once(&self) -> Result<MaintenancePass, QueueError> {
        run_pass(&self.reaper, &self.retry, self.timeout_after)
    }

    /// Start the maintenance loop in a background thread.
    /// Accepts a trigger receiver for manual passes.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reaper = Arc::clone(&self.reaper);
        let retry = Arc::clone(&self.retry);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;
        let timeout_after = self.timeout_after;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start maintenance runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual maintenance pass triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match run_pass(&reaper, &retry, timeout_after) {
                        Ok(pass) if pass.timed_out > 0 || pass.retried > 0 => {
                            log::info!(
                                "Maintenance: {} timed out, {} retried",
                                pass.timed_out,
                                pass.retried
                            );
                        }
                        Err(e) => log::error!("Maintenance pass failed: {}", e),
                        _ => {}
                    }
                }
            });

            log::debug!("Maintenance scheduler stopped");
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn run_pass(
    reaper: &TimeoutReaper,
    retry: &RetryManager,
    timeout_after: Duration,
) -> Result<MaintenancePass, QueueError> {
    let timed_out = reaper.reap_timeouts(timeout_after)?;
    let retried = retry.retry_failed()?;
    Ok(MaintenancePass { timed_out, retried })
}
