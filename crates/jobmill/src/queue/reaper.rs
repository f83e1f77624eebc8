//! Fails jobs that have been stuck in `processing` too long.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;

use crate::db::{job_repo, Database, JobFilter, JobUpdate};
use crate::error::QueueError;
use crate::queue::job::{ErrorCode, JobStatus, TIMEOUT_MESSAGE};

/// Recovers jobs whose worker crashed or hung after claiming them.
///
/// Recovery is reactive: in-flight strategy calls are not cancelled, their
/// jobs are just marked `failed` so the retry manager can pick them up.
pub struct TimeoutReaper {
    db: Database,
}

impl TimeoutReaper {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fails every processing job started more than `timeout_after` ago.
    /// Returns the number of jobs failed.
    pub fn reap_timeouts(&self, timeout_after: Duration) -> Result<u64, QueueError> {
        self.reap_timeouts_as_of(Utc::now(), timeout_after)
    }

    /// Same as [`reap_timeouts`](Self::reap_timeouts) with an explicit "now".
    pub fn reap_timeouts_as_of(
        &self,
        now: DateTime<Utc>,
        timeout_after: Duration,
    ) -> Result<u64, QueueError> {
        let grace = chrono::Duration::from_std(timeout_after)
            .map_err(|_| QueueError::InvalidTimeout(timeout_after))?;
        let cutoff = now
            .checked_sub_signed(grace)
            .ok_or(QueueError::InvalidTimeout(timeout_after))?;

        let filter = JobFilter {
            started_before: Some(cutoff),
            ..JobFilter::status(JobStatus::Processing)
        };
        let update = JobUpdate::new()
            .status(JobStatus::Failed)
            .error(Some(ErrorCode::Timeout), Some(TIMEOUT_MESSAGE))
            .updated_at(&now);

        let failed = job_repo::update_many(&self.db, &filter, &update)?;
        info!("Marked {} jobs as failed due to timeout", failed);
        Ok(failed)
    }
}
