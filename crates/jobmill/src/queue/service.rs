//! One-stop handle over the queue components sharing a database.

use std::sync::Arc;
use std::time::Duration;

use crate::db::{Database, SourceSelector, SourceStore, SqliteSourceStore};
use crate::error::QueueError;
use crate::queue::job::JobId;
use crate::queue::maintenance::MaintenanceScheduler;
use crate::queue::producer::{JobDefaults, JobProducer};
use crate::queue::reaper::TimeoutReaper;
use crate::queue::reporter::{StatusReporter, StatusSummary};
use crate::queue::retry::RetryManager;
use crate::queue::strategy::ProcessingStrategy;
use crate::queue::worker::JobWorker;

/// Bundles producer, worker, retry manager, reaper and reporter.
///
/// Cloning shares the same components.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    producer: Arc<JobProducer>,
    worker: Arc<JobWorker>,
    retry: Arc<RetryManager>,
    reaper: Arc<TimeoutReaper>,
    reporter: Arc<StatusReporter>,
}

impl JobQueue {
    pub fn new(
        db: Database,
        sources: Arc<dyn SourceStore>,
        strategy: Arc<dyn ProcessingStrategy>,
        defaults: JobDefaults,
    ) -> Self {
        Self {
            producer: Arc::new(JobProducer::with_defaults(
                db.clone(),
                Arc::clone(&sources),
                defaults,
            )),
            worker: Arc::new(JobWorker::new(db.clone(), sources, strategy)),
            retry: Arc::new(RetryManager::new(db.clone())),
            reaper: Arc::new(TimeoutReaper::new(db.clone())),
            reporter: Arc::new(StatusReporter::new(db.clone())),
            db,
        }
    }

    /// Queue whose source records live in the same database.
    pub fn with_sqlite_sources(
        db: Database,
        strategy: Arc<dyn ProcessingStrategy>,
        defaults: JobDefaults,
    ) -> Self {
        let sources = Arc::new(SqliteSourceStore::new(db.clone()));
        Self::new(db, sources, strategy, defaults)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn create_jobs(
        &self,
        selector: &SourceSelector,
        job_type: &str,
    ) -> Result<Vec<JobId>, QueueError> {
        self.producer.create_jobs(selector, job_type)
    }

    pub fn create_jobs_with(
        &self,
        selector: &SourceSelector,
        job_type: &str,
        defaults: &JobDefaults,
    ) -> Result<Vec<JobId>, QueueError> {
        self.producer.create_jobs_with(selector, job_type, defaults)
    }

    pub fn run_worker(&self, worker_id: &str, batch_size: u64) -> Result<u64, QueueError> {
        self.worker.run(worker_id, batch_size)
    }

    pub fn retry_failed(&self) -> Result<u64, QueueError> {
        self.retry.retry_failed()
    }

    pub fn reap_timeouts(&self, timeout_after: Duration) -> Result<u64, QueueError> {
        self.reaper.reap_timeouts(timeout_after)
    }

    pub fn summary(&self) -> Result<StatusSummary, QueueError> {
        self.reporter.summary()
    }

    /// Shared worker, for running a [`WorkerPool`](crate::queue::WorkerPool).
    pub fn worker(&self) -> Arc<JobWorker> {
        Arc::clone(&self.worker)
    }

    pub fn maintenance(&self, interval: Duration, timeout_after: Duration) -> MaintenanceScheduler {
        MaintenanceScheduler::new(
            Arc::clone(&self.reaper),
            Arc::clone(&self.retry),
            interval,
            timeout_after,
        )
    }
}
