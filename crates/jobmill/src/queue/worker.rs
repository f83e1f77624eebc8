//! Claims pending jobs and runs them through the processing strategy.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn};

use crate::db::{job_repo, Database, JobUpdate, SourceStore};
use crate::error::QueueError;
use crate::queue::job::{ErrorCode, Job, JobId, JobStatus, DATA_NOT_FOUND_MESSAGE};
use crate::queue::strategy::ProcessingStrategy;

/// Terminal result of one processing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Success(serde_json::Value),
    Failure { code: ErrorCode, message: String },
}

impl JobOutcome {
    fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Success(_) => JobStatus::Success,
            JobOutcome::Failure { .. } => JobStatus::Failed,
        }
    }
}

/// Pulls pending jobs in batches, claims each one atomically and records
/// its outcome.
///
/// Any number of workers may share one store. The claim is the only
/// coordination between them.
pub struct JobWorker {
    db: Database,
    sources: Arc<dyn SourceStore>,
    strategy: Arc<dyn ProcessingStrategy>,
}

impl JobWorker {
    pub fn new(
        db: Database,
        sources: Arc<dyn SourceStore>,
        strategy: Arc<dyn ProcessingStrategy>,
    ) -> Self {
        Self {
            db,
            sources,
            strategy,
        }
    }

    /// Processes pending jobs until a fetch comes back empty.
    ///
    /// Returns how many jobs reached `success`. Per-job failures are
    /// recorded on the job and do not stop the loop; store failures do.
    pub fn run(&self, worker_id: &str, batch_size: u64) -> Result<u64, QueueError> {
        if batch_size == 0 {
            return Err(QueueError::InvalidBatchSize);
        }

        let mut succeeded = 0;
        while let Some(batch_succeeded) = self.run_batch(worker_id, batch_size)? {
            succeeded += batch_succeeded;
        }

        info!(worker_id, "Worker finished: {} jobs succeeded", succeeded);
        Ok(succeeded)
    }

    /// Fetches and processes a single batch.
    ///
    /// Returns `None` when nothing was pending, otherwise how many jobs of
    /// the batch reached `success`.
    pub fn run_batch(&self, worker_id: &str, batch_size: u64) -> Result<Option<u64>, QueueError> {
        if batch_size == 0 {
            return Err(QueueError::InvalidBatchSize);
        }

        let batch = job_repo::find_batch(&self.db, JobStatus::Pending, batch_size)?;
        if batch.is_empty() {
            return Ok(None);
        }

        debug!(worker_id, "Processing {} jobs", batch.len());
        let mut succeeded = 0;
        for job in &batch {
            if let Some(JobStatus::Success) = self.process_job(job, worker_id)? {
                succeeded += 1;
            }
        }
        Ok(Some(succeeded))
    }

    /// Claims and processes a single fetched job.
    ///
    /// Returns `None` when another worker claimed it first, otherwise the
    /// terminal status that was recorded.
    pub fn process_job(&self, job: &Job, worker_id: &str) -> Result<Option<JobStatus>, QueueError> {
        let span = info_span!("job",
            job_id = job.id,
            source_ref = %job.source_ref,
            worker_id = %worker_id,
        );
        let _enter = span.enter();

        if !job_repo::claim(&self.db, job.id, worker_id, &Utc::now())? {
            debug!("Job already claimed by another worker");
            return Ok(None);
        }

        // An unreadable record fails only its own job.
        let outcome = match self.sources.get(&job.source_ref) {
            Ok(None) => JobOutcome::failure(ErrorCode::DataNotFound, DATA_NOT_FOUND_MESSAGE),
            Ok(Some(record)) => match self.strategy.process(&record) {
                Ok(result) => JobOutcome::Success(result),
                Err(e) => JobOutcome::failure(ErrorCode::ProcessingError, e.to_string()),
            },
            Err(e) if e.is_systemic() => return Err(e.into()),
            Err(e) => JobOutcome::failure(ErrorCode::ProcessingError, e.to_string()),
        };

        if let JobOutcome::Failure { code, message } = &outcome {
            warn!(error_code = %code, "Job failed: {}", message);
        }

        let status = outcome.status();
        self.complete(job.id, outcome)?;
        Ok(Some(status))
    }

    /// Records a terminal outcome for a job this worker holds.
    ///
    /// Plain update: only the claiming worker gets here.
    fn complete(&self, job_id: JobId, outcome: JobOutcome) -> Result<(), QueueError> {
        let now = Utc::now();
        let Some(job) = job_repo::find_by_id(&self.db, job_id)? else {
            warn!(job_id, "Job disappeared before completion");
            return Ok(());
        };

        let duration_ms = job
            .started_at
            .map(|started| (now - started).num_milliseconds());

        let update = JobUpdate::new()
            .status(outcome.status())
            .is_completed(outcome.status() == JobStatus::Success)
            .processed_at(Some(&now))
            .updated_at(&now)
            .processing_duration_ms(duration_ms);

        let update = match &outcome {
            JobOutcome::Success(result) => update.result(Some(result)).error(None, None),
            JobOutcome::Failure { code, message } => update.error(Some(*code), Some(message)),
        };

        job_repo::update(&self.db, job_id, &update)?;
        debug!(job_id, status = %outcome.status(), ?duration_ms, "Job completed");
        Ok(())
    }
}
