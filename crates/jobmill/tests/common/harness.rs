//! Test harness backed by a temporary database file.
//!
//! Using a real file rather than `:memory:` lets tests open a second,
//! independent connection and exercise the same locking a second worker
//! process would see.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use jobmill::db::{job_repo, source_repo, Database, SourceRecord};
use jobmill::queue::{Job, JobDefaults, JobId, JobQueue, JobStatus, ProcessingStrategy};

pub struct TestHarness {
    /// Keeps the directory alive for the lifetime of the harness.
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("jobmill.db");
        let db = Database::open(&db_path).expect("Failed to open test database");

        Self {
            temp_dir,
            db_path,
            db,
        }
    }

    /// A separate handle on the same file, as another process would have.
    pub fn second_connection(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open second connection")
    }

    /// Inserts records with the given ids into the `raw` collection.
    pub fn seed_records(&self, ids: &[&str]) {
        for id in ids {
            self.put_record(id);
        }
    }

    pub fn put_record(&self, id: &str) {
        let record = SourceRecord::new(id, "raw", json!({ "id": id, "status": "need_processing" }));
        source_repo::upsert(&self.db, &record).expect("Failed to insert source record");
    }

    pub fn queue(&self, strategy: Arc<dyn ProcessingStrategy>) -> JobQueue {
        JobQueue::with_sqlite_sources(self.db.clone(), strategy, JobDefaults::default())
    }

    pub fn job(&self, id: JobId) -> Job {
        job_repo::find_by_id(&self.db, id)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    pub fn job_for(&self, source_ref: &str) -> Job {
        job_repo::find_by_source_ref(&self.db, source_ref)
            .expect("Failed to read job")
            .expect("Job not found")
    }

    pub fn count(&self, status: JobStatus) -> u64 {
        job_repo::count_by_status(&self.db, status).expect("Failed to count jobs")
    }

    pub fn total_jobs(&self) -> u64 {
        job_repo::count_all(&self.db).expect("Failed to count jobs")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
