//! Materializes jobs from a selection over the source store.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use crate::db::{job_repo, Database, SourceSelector, SourceStore};
use crate::error::QueueError;
use crate::queue::job::{JobId, NewJob, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};

/// Values stamped on every job a producer creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDefaults {
    pub priority: i32,
    pub max_retries: u32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Creates one pending job per selected source record.
///
/// Re-running the same selection is safe: records that already have a job
/// are skipped by the store's insert-if-absent, so the job count converges.
pub struct JobProducer {
    db: Database,
    sources: Arc<dyn SourceStore>,
    defaults: JobDefaults,
}

impl JobProducer {
    pub fn new(db: Database, sources: Arc<dyn SourceStore>) -> Self {
        Self::with_defaults(db, sources, JobDefaults::default())
    }

    pub fn with_defaults(db: Database, sources: Arc<dyn SourceStore>, defaults: JobDefaults) -> Self {
        Self {
            db,
            sources,
            defaults,
        }
    }

    /// Creates jobs for every record `selector` yields, returning the ids of
    /// the jobs that were newly inserted.
    pub fn create_jobs(
        &self,
        selector: &SourceSelector,
        job_type: &str,
    ) -> Result<Vec<JobId>, QueueError> {
        self.create_jobs_with(selector, job_type, &self.defaults)
    }

    /// Like [`create_jobs`](Self::create_jobs) with explicit defaults for
    /// this batch.
    ///
    /// A failed insert for one record is logged and skipped. Failures that
    /// mean the store itself is unusable abort the batch.
    pub fn create_jobs_with(
        &self,
        selector: &SourceSelector,
        job_type: &str,
        defaults: &JobDefaults,
    ) -> Result<Vec<JobId>, QueueError> {
        let candidates = self.sources.query(selector)?;
        debug!(
            "Selection returned {} candidate records for job type '{}'",
            candidates.len(),
            job_type
        );

        let mut created = Vec::new();
        for record in &candidates {
            let job = NewJob::new(record.id.as_str(), job_type)
                .with_priority(defaults.priority)
                .with_max_retries(defaults.max_retries)
                .created_at(Utc::now());

            match job_repo::insert_if_absent(&self.db, &job) {
                Ok(Some(id)) => created.push(id),
                Ok(None) => {}
                Err(e) if e.is_systemic() => return Err(e.into()),
                Err(e) => warn!("Failed to create job for {}: {}", record.id, e),
            }
        }

        info!(
            "Created {} {} jobs from {} candidates",
            created.len(),
            job_type,
            candidates.len()
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{source_repo, SourceRecord, SqliteSourceStore};
    use crate::queue::job::JobStatus;
    use serde_json::json;

    fn setup(records: &[(&str, serde_json::Value)]) -> (Database, JobProducer) {
        let db = Database::open_in_memory().unwrap();
        for (id, payload) in records {
            source_repo::upsert(&db, &SourceRecord::new(*id, "raw", payload.clone())).unwrap();
        }
        let sources = Arc::new(SqliteSourceStore::new(db.clone()));
        let producer = JobProducer::new(db.clone(), sources);
        (db, producer)
    }

    #[test]
    fn test_create_jobs_for_each_record() {
        let (db, producer) = setup(&[("a", json!({})), ("b", json!({})), ("c", json!({}))]);

        let ids = producer.create_jobs(&SourceSelector::all(), "ingest").unwrap();
        assert_eq!(ids.len(), 3);

        for id in ids {
            let job = job_repo::find_by_id(&db, id).unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.job_type, "ingest");
            assert_eq!(job.retry_count, 0);
            assert_eq!(job.priority, DEFAULT_PRIORITY);
            assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
        }
    }

    #[test]
    fn test_create_jobs_is_idempotent() {
        let (db, producer) = setup(&[("a", json!({})), ("b", json!({}))]);

        let first = producer.create_jobs(&SourceSelector::all(), "ingest").unwrap();
        let second = producer.create_jobs(&SourceSelector::all(), "ingest").unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(job_repo::count_all(&db).unwrap(), 2);
    }

    #[test]
    fn test_create_jobs_only_returns_new_ids() {
        let (db, producer) = setup(&[("a", json!({}))]);
        producer.create_jobs(&SourceSelector::all(), "ingest").unwrap();

        source_repo::upsert(&db, &SourceRecord::new("b", "raw", json!({}))).unwrap();
        let ids = producer.create_jobs(&SourceSelector::all(), "ingest").unwrap();

        assert_eq!(ids.len(), 1);
        let job = job_repo::find_by_id(&db, ids[0]).unwrap().unwrap();
        assert_eq!(job.source_ref, "b");
    }

    #[test]
    fn test_create_jobs_respects_selector() {
        let (_db, producer) = setup(&[
            ("a", json!({ "status": "need_processing" })),
            ("b", json!({ "status": "done" })),
        ]);

        let selector = SourceSelector::all().with_match("status", json!("need_processing"));
        let ids = producer.create_jobs(&selector, "ingest").unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_failed_insert_skips_only_that_record() {
        let (db, producer) = setup(&[("a", json!({})), ("b", json!({})), ("c", json!({}))]);
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_b BEFORE INSERT ON jobs
                 WHEN NEW.source_ref = 'b'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        let ids = producer.create_jobs(&SourceSelector::all(), "ingest").unwrap();

        assert_eq!(ids.len(), 2);
        assert!(job_repo::find_by_source_ref(&db, "a").unwrap().is_some());
        assert!(job_repo::find_by_source_ref(&db, "b").unwrap().is_none());
        assert!(job_repo::find_by_source_ref(&db, "c").unwrap().is_some());
    }

    #[test]
    fn test_read_only_store_aborts_batch() {
        let (db, producer) = setup(&[("a", json!({})), ("b", json!({}))]);
        db.with_conn(|conn| {
            conn.execute_batch("PRAGMA query_only = ON;")?;
            Ok(())
        })
        .unwrap();

        let err = producer
            .create_jobs(&SourceSelector::all(), "ingest")
            .unwrap_err();
        assert!(matches!(err, QueueError::Database(ref e) if e.is_systemic()));
        assert_eq!(job_repo::count_all(&db).unwrap(), 0);
    }

    #[test]
    fn test_create_jobs_with_custom_defaults() {
        let (db, producer) = setup(&[("a", json!({}))]);
        let defaults = JobDefaults {
            priority: 1,
            max_retries: 7,
        };

        let ids = producer
            .create_jobs_with(&SourceSelector::all(), "urgent", &defaults)
            .unwrap();
        let job = job_repo::find_by_id(&db, ids[0]).unwrap().unwrap();
        assert_eq!(job.priority, 1);
        assert_eq!(job.max_retries, 7);
    }
}
