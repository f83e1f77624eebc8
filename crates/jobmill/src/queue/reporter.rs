//! Read-only job counts for observability.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::db::{job_repo, Database};
use crate::error::QueueError;
use crate::queue::job::JobStatus;

/// Job counts keyed by status. Statuses with no jobs are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StatusSummary {
    counts: BTreeMap<JobStatus, u64>,
}

impl StatusSummary {
    pub fn from_counts(counts: BTreeMap<JobStatus, u64>) -> Self {
        Self { counts }
    }

    /// Count for one status, zero when absent.
    pub fn get(&self, status: JobStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobStatus, u64)> + '_ {
        self.counts.iter().map(|(status, count)| (*status, *count))
    }

    pub fn into_map(self) -> BTreeMap<JobStatus, u64> {
        self.counts
    }
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return f.write_str("no jobs");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(status, count)| format!("{}={}", status, count))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Aggregates job counts straight from the store on every call.
pub struct StatusReporter {
    db: Database,
}

impl StatusReporter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn summary(&self) -> Result<StatusSummary, QueueError> {
        let counts = job_repo::count_grouped_by_status(&self.db)?;
        Ok(StatusSummary::from_counts(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::JobUpdate;
    use crate::queue::job::NewJob;

    #[test]
    fn test_summary_of_empty_store() {
        let reporter = StatusReporter::new(Database::open_in_memory().unwrap());
        let summary = reporter.summary().unwrap();
        assert!(summary.is_empty());
        assert_eq!(summary.total(), 0);
        assert_eq!(summary.to_string(), "no jobs");
    }

    #[test]
    fn test_summary_counts_match_rows() {
        let db = Database::open_in_memory().unwrap();
        for source_ref in ["a", "b", "c", "d"] {
            job_repo::insert_if_absent(&db, &NewJob::new(source_ref, "ingest")).unwrap();
        }
        let done = JobUpdate::new().status(JobStatus::Success).is_completed(true);
        job_repo::update(&db, 1, &done).unwrap();
        job_repo::update(&db, 2, &JobUpdate::new().status(JobStatus::Failed)).unwrap();

        let summary = StatusReporter::new(db.clone()).summary().unwrap();
        assert_eq!(summary.get(JobStatus::Pending), 2);
        assert_eq!(summary.get(JobStatus::Success), 1);
        assert_eq!(summary.get(JobStatus::Failed), 1);
        assert_eq!(summary.get(JobStatus::Processing), 0);
        assert_eq!(summary.total(), job_repo::count_all(&db).unwrap());
        assert_eq!(summary.to_string(), "pending=2 success=1 failed=1");
    }

    #[test]
    fn test_summary_serializes_as_status_map() {
        let mut counts = BTreeMap::new();
        counts.insert(JobStatus::Success, 2);
        counts.insert(JobStatus::Failed, 1);
        let json = serde_json::to_value(StatusSummary::from_counts(counts)).unwrap();
        assert_eq!(json, serde_json::json!({ "success": 2, "failed": 1 }));
    }
}
