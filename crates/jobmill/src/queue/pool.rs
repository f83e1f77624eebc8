use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::QueueError;
use crate::queue::worker::JobWorker;

/// Extra wait after a failed batch, on top of the poll interval.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Settings for a pool of polling workers.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    pub batch_size: u64,
    /// Sleep after a fetch that found nothing pending.
    pub poll_interval: Duration,
    /// Worker ids are `{id_prefix}-{n}`.
    pub id_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            id_prefix: "worker".to_string(),
        }
    }
}

/// Summary of one batch in which at least one job succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: String,
    pub succeeded: u64,
}

/// Threads that each process batches until none is pending, then sleep and poll again.
pub struct WorkerPool {
    report_receiver: Receiver<WorkerReport>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    /// Dropping this wakes every sleeping worker.
    stop_sender: Option<Sender<()>>,
}

impl WorkerPool {
    pub fn start(worker: Arc<JobWorker>, config: &PoolConfig) -> Result<Self, QueueError> {
        if config.worker_count == 0 {
            return Err(QueueError::InvalidWorkerCount);
        }
        if config.batch_size == 0 {
            return Err(QueueError::InvalidBatchSize);
        }

        let (report_sender, report_receiver) = bounded::<WorkerReport>(config.worker_count * 2);
        let (stop_sender, stop_receiver) = bounded::<()>(0);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);

        for n in 0..config.worker_count {
            let worker_id = format!("{}-{}", config.id_prefix, n);
            let ctx = WorkerContext {
                worker: Arc::clone(&worker),
                report_sender: report_sender.clone(),
                stop_receiver: stop_receiver.clone(),
                shutdown: Arc::clone(&shutdown),
                batch_size: config.batch_size,
                poll_interval: config.poll_interval,
            };

            let handle = thread::Builder::new()
                .name(worker_id.clone())
                .spawn(move || run_worker(worker_id, ctx))
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", config.worker_count);

        Ok(Self {
            report_receiver,
            workers,
            shutdown,
            stop_sender: Some(stop_sender),
        })
    }

    pub fn try_recv_report(&self) -> Option<WorkerReport> {
        self.report_receiver.try_recv().ok()
    }

    pub fn recv_report_timeout(&self, timeout: Duration) -> Option<WorkerReport> {
        self.report_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Release);
        self.stop_sender.take();
    }

    pub fn wait(mut self) {
        self.shutdown();

        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

struct WorkerContext {
    worker: Arc<JobWorker>,
    report_sender: Sender<WorkerReport>,
    stop_receiver: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    batch_size: u64,
    poll_interval: Duration,
}

fn run_worker(worker_id: String, ctx: WorkerContext) {
    debug!("Worker {} started", worker_id);

    loop {
        if ctx.shutdown.load(Ordering::Acquire) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        // One batch per iteration so shutdown is seen between batches.
        let wait = match ctx.worker.run_batch(&worker_id, ctx.batch_size) {
            Ok(None) => ctx.poll_interval,
            Ok(Some(0)) => continue,
            Ok(Some(succeeded)) => {
                let report = WorkerReport {
                    worker_id: worker_id.clone(),
                    succeeded,
                };
                // Reports are best effort; a full channel means nobody reads them.
                let _ = ctx.report_sender.try_send(report);
                continue;
            }
            Err(e) => {
                error!("Worker {} batch failed: {}", worker_id, e);
                ctx.poll_interval + ERROR_BACKOFF
            }
        };

        match ctx.stop_receiver.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} stop channel closed", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
