//! Moves failed jobs with retries left back to `pending`.

use chrono::Utc;
use log::info;

use crate::db::{job_repo, Database, JobFilter, JobUpdate};
use crate::error::QueueError;
use crate::queue::job::JobStatus;

/// Resets retry-eligible failed jobs in one set-based update.
///
/// Eligibility uses each job's own `max_retries`. Jobs that have used up
/// their retries stay `failed` until someone intervenes.
pub struct RetryManager {
    db: Database,
}

impl RetryManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the number of jobs reset to `pending`.
    pub fn retry_failed(&self) -> Result<u64, QueueError> {
        let filter = JobFilter {
            retries_remaining: true,
            ..JobFilter::status(JobStatus::Failed)
        };
        let update = JobUpdate::new()
            .status(JobStatus::Pending)
            .updated_at(&Utc::now())
            .increment_retry_count();

        let reset = job_repo::update_many(&self.db, &filter, &update)?;
        info!("Reset {} failed jobs for retry", reset);
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::{JobId, NewJob};

    fn failed_job(db: &Database, source_ref: &str, retry_count: u32, max_retries: u32) -> JobId {
        let job = NewJob::new(source_ref, "ingest").with_max_retries(max_retries);
        let id = job_repo::insert_if_absent(db, &job).unwrap().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET status = 'failed', retry_count = ?1 WHERE id = ?2",
                rusqlite::params![retry_count, id],
            )?;
            Ok(())
        })
        .unwrap();
        id
    }

    #[test]
    fn test_retry_resets_eligible_jobs() {
        let db = Database::open_in_memory().unwrap();
        let id = failed_job(&db, "a", 2, 3);
        let manager = RetryManager::new(db.clone());

        assert_eq!(manager.retry_failed().unwrap(), 1);

        let job = job_repo::find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 3);
        assert!(!job.is_completed);
    }

    #[test]
    fn test_retry_leaves_exhausted_jobs_failed() {
        let db = Database::open_in_memory().unwrap();
        let id = failed_job(&db, "a", 3, 3);
        let manager = RetryManager::new(db.clone());

        assert_eq!(manager.retry_failed().unwrap(), 0);

        let job = job_repo::find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
    }

    #[test]
    fn test_retry_uses_per_job_bound() {
        let db = Database::open_in_memory().unwrap();
        let generous = failed_job(&db, "generous", 5, 10);
        let strict = failed_job(&db, "strict", 1, 1);
        let manager = RetryManager::new(db.clone());

        assert_eq!(manager.retry_failed().unwrap(), 1);
        assert_eq!(
            job_repo::find_by_id(&db, generous).unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            job_repo::find_by_id(&db, strict).unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[test]
    fn test_retry_ignores_other_statuses() {
        let db = Database::open_in_memory().unwrap();
        job_repo::insert_if_absent(&db, &NewJob::new("pending", "ingest")).unwrap();
        let manager = RetryManager::new(db.clone());

        assert_eq!(manager.retry_failed().unwrap(), 0);
        assert_eq!(job_repo::count_by_status(&db, JobStatus::Pending).unwrap(), 1);
    }
}
