//! Job repository: queue operations on the `jobs` table.
//!
//! Every function is a single SQL statement, so each one is atomic on its
//! own. The claim is a compare-and-set on `status`; nothing here spans a
//! transaction across statements.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::queue::job::{ErrorCode, Job, JobId, JobStatus, NewJob};

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: i64,
    source_ref: String,
    job_type: String,
    status: String,
    is_completed: bool,
    priority: i32,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    processed_at: Option<String>,
    processing_duration_ms: Option<i64>,
    retry_count: u32,
    max_retries: u32,
    processor_id: Option<String>,
    result: Option<String>,
    error_message: Option<String>,
    error_code: Option<String>,
    metadata: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_ref: row.get("source_ref")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            is_completed: row.get("is_completed")?,
            priority: row.get("priority")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            processed_at: row.get("processed_at")?,
            processing_duration_ms: row.get("processing_duration_ms")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            processor_id: row.get("processor_id")?,
            result: row.get("result")?,
            error_message: row.get("error_message")?,
            error_code: row.get("error_code")?,
            metadata: row.get("metadata")?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        let status = self
            .status
            .parse::<JobStatus>()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "status",
                value: self.status.clone(),
            })?;
        let error_code = self
            .error_code
            .map(|raw| {
                raw.parse::<ErrorCode>()
                    .map_err(|_| DatabaseError::InvalidValue {
                        column: "error_code",
                        value: raw,
                    })
            })
            .transpose()?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(Job {
            id: self.id,
            source_ref: self.source_ref,
            job_type: self.job_type,
            status,
            is_completed: self.is_completed,
            priority: self.priority,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            started_at: self
                .started_at
                .as_deref()
                .map(|raw| parse_timestamp("started_at", raw))
                .transpose()?,
            processed_at: self
                .processed_at
                .as_deref()
                .map(|raw| parse_timestamp("processed_at", raw))
                .transpose()?,
            processing_duration_ms: self.processing_duration_ms,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            processor_id: self.processor_id,
            result,
            error_message: self.error_message,
            error_code,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}

/// Row filter for bulk updates and listings. Unset fields match everything.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    /// Only jobs whose `started_at` is strictly before this instant.
    pub started_before: Option<DateTime<Utc>>,
    /// Only jobs with `retry_count < max_retries`.
    pub retries_remaining: bool,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn where_clause(&self, params: &mut Vec<Value>) -> String {
        let mut conditions = Vec::new();

        if let Some(status) = self.status {
            params.push(Value::Text(status.as_str().to_string()));
            conditions.push(format!("status = ?{}", params.len()));
        }
        if let Some(ref job_type) = self.job_type {
            params.push(Value::Text(job_type.clone()));
            conditions.push(format!("job_type = ?{}", params.len()));
        }
        if let Some(ref before) = self.started_before {
            params.push(Value::Text(format_timestamp(before)));
            conditions.push(format!(
                "started_at IS NOT NULL AND started_at < ?{}",
                params.len()
            ));
        }
        if self.retries_remaining {
            conditions.push("retry_count < max_retries".to_string());
        }

        if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        }
    }
}

/// Column assignments for an update, built up fluently.
///
/// Only the columns named through the builder are written.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    assignments: Vec<(&'static str, Value)>,
    increment_retry_count: bool,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(mut self, column: &'static str, value: Value) -> Self {
        self.assignments.retain(|(c, _)| *c != column);
        self.assignments.push((column, value));
        self
    }

    fn text(value: Option<impl Into<String>>) -> Value {
        value.map_or(Value::Null, |v| Value::Text(v.into()))
    }

    fn timestamp(value: Option<&DateTime<Utc>>) -> Value {
        value.map_or(Value::Null, |ts| Value::Text(format_timestamp(ts)))
    }

    pub fn status(self, status: JobStatus) -> Self {
        self.set("status", Value::Text(status.as_str().to_string()))
    }

    pub fn is_completed(self, completed: bool) -> Self {
        self.set("is_completed", Value::Integer(completed as i64))
    }

    pub fn updated_at(self, ts: &DateTime<Utc>) -> Self {
        self.set("updated_at", Self::timestamp(Some(ts)))
    }

    pub fn started_at(self, ts: Option<&DateTime<Utc>>) -> Self {
        self.set("started_at", Self::timestamp(ts))
    }

    pub fn processed_at(self, ts: Option<&DateTime<Utc>>) -> Self {
        self.set("processed_at", Self::timestamp(ts))
    }

    pub fn processing_duration_ms(self, duration: Option<i64>) -> Self {
        self.set(
            "processing_duration_ms",
            duration.map_or(Value::Null, Value::Integer),
        )
    }

    pub fn processor_id(self, worker_id: Option<&str>) -> Self {
        self.set("processor_id", Self::text(worker_id))
    }

    pub fn result(self, result: Option<&serde_json::Value>) -> Self {
        self.set("result", Self::text(result.map(|v| v.to_string())))
    }

    pub fn error(self, code: Option<ErrorCode>, message: Option<&str>) -> Self {
        self.set("error_code", Self::text(code.map(|c| c.as_str())))
            .set("error_message", Self::text(message))
    }

    /// Adds one to `retry_count` as part of the same statement.
    pub fn increment_retry_count(mut self) -> Self {
        self.increment_retry_count = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && !self.increment_retry_count
    }

    fn set_clause(&self, params: &mut Vec<Value>) -> String {
        let mut sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!("{} = ?{}", column, params.len())
            })
            .collect();
        if self.increment_retry_count {
            sets.push("retry_count = retry_count + 1".to_string());
        }
        sets.join(", ")
    }
}

/// Inserts a pending job unless one already exists for its `source_ref`.
///
/// Returns the new id, or `None` when a job for that source record was
/// already present. One statement, so concurrent producers cannot both
/// insert.
pub fn insert_if_absent(db: &Database, job: &NewJob) -> Result<Option<JobId>, DatabaseError> {
    let created_at = format_timestamp(&job.created_at);
    let metadata = serde_json::to_string(&job.metadata)?;

    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT INTO jobs (source_ref, job_type, status, is_completed, priority,
             created_at, updated_at, retry_count, max_retries, metadata)
             VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, 0, ?5, ?6)
             ON CONFLICT(source_ref) DO NOTHING",
            params![
                job.source_ref,
                job.job_type,
                job.priority,
                created_at,
                job.max_retries,
                metadata,
            ],
        )?;

        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: JobId) -> Result<Option<Job>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(JobRow::into_job).transpose()
}

/// Finds the job created for a source record, if any.
pub fn find_by_source_ref(db: &Database, source_ref: &str) -> Result<Option<Job>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE source_ref = ?1")?;
        let mut rows = stmt.query_map(params![source_ref], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    row.map(JobRow::into_job).transpose()
}

/// Fetches up to `limit` jobs in `status`, lowest priority value first,
/// then oldest first.
pub fn find_batch(db: &Database, status: JobStatus, limit: u64) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = ?1
             ORDER BY priority ASC, created_at ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status.as_str(), limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Lists jobs matching `filter`, oldest first.
pub fn list(db: &Database, filter: &JobFilter, limit: u64) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut param_values = Vec::new();
        let where_clause = filter.where_clause(&mut param_values);
        param_values.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at ASC, id ASC LIMIT ?{}",
            where_clause,
            param_values.len()
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(param_values.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Applies `update` to job `id` only if its stored status still equals
/// `expected`. Returns whether the row matched.
///
/// The comparison and the write happen in one `UPDATE`, so two callers
/// racing on the same row cannot both see a match.
pub fn conditional_update(
    db: &Database,
    id: JobId,
    expected: JobStatus,
    update: &JobUpdate,
) -> Result<bool, DatabaseError> {
    if update.is_empty() {
        return Ok(false);
    }

    db.with_conn(|conn| {
        let mut param_values = Vec::new();
        let set_clause = update.set_clause(&mut param_values);
        param_values.push(Value::Integer(id));
        let id_param = param_values.len();
        param_values.push(Value::Text(expected.as_str().to_string()));
        let sql = format!(
            "UPDATE jobs SET {} WHERE id = ?{} AND status = ?{}",
            set_clause,
            id_param,
            param_values.len()
        );

        let matched = conn.execute(&sql, params_from_iter(param_values.iter()))?;
        Ok(matched == 1)
    })
}

/// Claims a pending job for `worker_id`: pending -> processing.
///
/// Returns false when another worker got there first.
pub fn claim(
    db: &Database,
    id: JobId,
    worker_id: &str,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let update = JobUpdate::new()
        .status(JobStatus::Processing)
        .processor_id(Some(worker_id))
        .started_at(Some(now))
        .updated_at(now);
    conditional_update(db, id, JobStatus::Pending, &update)
}

/// Applies `update` to job `id` unconditionally. Returns whether it existed.
pub fn update(db: &Database, id: JobId, update: &JobUpdate) -> Result<bool, DatabaseError> {
    if update.is_empty() {
        return Ok(false);
    }

    db.with_conn(|conn| {
        let mut param_values = Vec::new();
        let set_clause = update.set_clause(&mut param_values);
        param_values.push(Value::Integer(id));
        let sql = format!(
            "UPDATE jobs SET {} WHERE id = ?{}",
            set_clause,
            param_values.len()
        );

        let matched = conn.execute(&sql, params_from_iter(param_values.iter()))?;
        Ok(matched == 1)
    })
}

/// Applies `update` to every job matching `filter` in one statement.
/// Returns the number of rows changed.
pub fn update_many(
    db: &Database,
    filter: &JobFilter,
    update: &JobUpdate,
) -> Result<u64, DatabaseError> {
    if update.is_empty() {
        return Ok(0);
    }

    db.with_conn(|conn| {
        let mut param_values = Vec::new();
        let set_clause = update.set_clause(&mut param_values);
        let where_clause = filter.where_clause(&mut param_values);
        let sql = format!("UPDATE jobs SET {} {}", set_clause, where_clause);

        let changed = conn.execute(&sql, params_from_iter(param_values.iter()))?;
        Ok(changed as u64)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Counts every job row.
pub fn count_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
        Ok(count)
    })
}

/// Counts jobs grouped by status. Statuses with no jobs are absent.
pub fn count_grouped_by_status(db: &Database) -> Result<BTreeMap<JobStatus, u64>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter()
        .map(|(raw, count)| {
            raw.parse::<JobStatus>()
                .map(|status| (status, count))
                .map_err(|_| DatabaseError::InvalidValue {
                    column: "status",
                    value: raw,
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap()
    }

    fn insert(db: &Database, source_ref: &str) -> JobId {
        insert_if_absent(db, &NewJob::new(source_ref, "ingest").created_at(at(0)))
            .unwrap()
            .expect("job should be new")
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let id = insert(&db, "rec-1");

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.source_ref, "rec-1");
        assert_eq!(job.job_type, "ingest");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.is_completed);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.created_at, at(0));
        assert_eq!(job.updated_at, at(0));
        assert!(job.started_at.is_none());
        assert!(job.metadata.is_empty());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 42).unwrap().is_none());
        assert!(find_by_source_ref(&db, "nope").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent_skips_existing_source_ref() {
        let db = test_db();
        let first = insert(&db, "rec-1");

        let again = insert_if_absent(&db, &NewJob::new("rec-1", "other-type")).unwrap();
        assert!(again.is_none());
        assert_eq!(count_all(&db).unwrap(), 1);

        let job = find_by_source_ref(&db, "rec-1").unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.job_type, "ingest");
    }

    #[test]
    fn test_find_batch_orders_by_priority_then_age() {
        let db = test_db();
        let old_low = NewJob::new("a", "ingest").with_priority(5).created_at(at(0));
        let new_high = NewJob::new("b", "ingest").with_priority(1).created_at(at(10));
        let old_high = NewJob::new("c", "ingest").with_priority(1).created_at(at(5));
        for job in [&old_low, &new_high, &old_high] {
            insert_if_absent(&db, job).unwrap();
        }

        let batch = find_batch(&db, JobStatus::Pending, 10).unwrap();
        let refs: Vec<_> = batch.iter().map(|j| j.source_ref.as_str()).collect();
        assert_eq!(refs, ["c", "b", "a"]);

        let limited = find_batch(&db, JobStatus::Pending, 2).unwrap();
        assert_eq!(limited.len(), 2);
        assert!(find_batch(&db, JobStatus::Failed, 10).unwrap().is_empty());
    }

    #[test]
    fn test_claim_is_compare_and_set() {
        let db = test_db();
        let id = insert(&db, "rec-1");

        assert!(claim(&db, id, "w1", &at(1)).unwrap());
        assert!(!claim(&db, id, "w2", &at(2)).unwrap());

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.processor_id.as_deref(), Some("w1"));
        assert_eq!(job.started_at, Some(at(1)));
        assert_eq!(job.updated_at, at(1));
    }

    #[test]
    fn test_conditional_update_on_missing_job() {
        let db = test_db();
        let update = JobUpdate::new().status(JobStatus::Failed);
        assert!(!conditional_update(&db, 99, JobStatus::Pending, &update).unwrap());
    }

    #[test]
    fn test_empty_update_is_a_no_op() {
        let db = test_db();
        let id = insert(&db, "rec-1");
        assert!(!update(&db, id, &JobUpdate::new()).unwrap());
        assert_eq!(
            update_many(&db, &JobFilter::default(), &JobUpdate::new()).unwrap(),
            0
        );
    }

    #[test]
    fn test_update_writes_result_and_errors() {
        let db = test_db();
        let id = insert(&db, "rec-1");
        let payload = serde_json::json!({ "fields": 4 });

        let done = JobUpdate::new()
            .status(JobStatus::Success)
            .is_completed(true)
            .processed_at(Some(&at(3)))
            .processing_duration_ms(Some(1500))
            .result(Some(&payload))
            .error(None, None);
        assert!(update(&db, id, &done).unwrap());

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert!(job.is_completed);
        assert_eq!(job.result, Some(payload));
        assert_eq!(job.processing_duration_ms, Some(1500));
        assert!(job.error_code.is_none());

        let failed = JobUpdate::new()
            .status(JobStatus::Failed)
            .error(Some(ErrorCode::ProcessingError), Some("boom"));
        assert!(update(&db, id, &failed).unwrap());
        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.error_code, Some(ErrorCode::ProcessingError));
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_update_many_with_retry_filter() {
        let db = test_db();
        let fresh = insert(&db, "fresh");
        let exhausted = insert_if_absent(&db, &NewJob::new("exhausted", "ingest").with_max_retries(0))
            .unwrap()
            .unwrap();
        let mark_failed = JobUpdate::new().status(JobStatus::Failed);
        update(&db, fresh, &mark_failed).unwrap();
        update(&db, exhausted, &mark_failed).unwrap();

        let filter = JobFilter {
            retries_remaining: true,
            ..JobFilter::status(JobStatus::Failed)
        };
        let reset = JobUpdate::new()
            .status(JobStatus::Pending)
            .increment_retry_count();
        assert_eq!(update_many(&db, &filter, &reset).unwrap(), 1);

        let job = find_by_id(&db, fresh).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        let job = find_by_id(&db, exhausted).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_update_many_started_before() {
        let db = test_db();
        let stale = insert(&db, "stale");
        let recent = insert(&db, "recent");
        claim(&db, stale, "w1", &at(0)).unwrap();
        claim(&db, recent, "w1", &at(30)).unwrap();

        let filter = JobFilter {
            started_before: Some(at(30) - Duration::minutes(10)),
            ..JobFilter::status(JobStatus::Processing)
        };
        let fail = JobUpdate::new().status(JobStatus::Failed);
        assert_eq!(update_many(&db, &filter, &fail).unwrap(), 1);
        assert_eq!(
            find_by_id(&db, stale).unwrap().unwrap().status,
            JobStatus::Failed
        );
        assert_eq!(
            find_by_id(&db, recent).unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[test]
    fn test_list_with_filter() {
        let db = test_db();
        insert(&db, "a");
        insert_if_absent(&db, &NewJob::new("b", "export").created_at(at(1))).unwrap();

        let all = list(&db, &JobFilter::default(), 100).unwrap();
        assert_eq!(all.len(), 2);

        let exports = list(
            &db,
            &JobFilter {
                job_type: Some("export".to_string()),
                ..Default::default()
            },
            100,
        )
        .unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].source_ref, "b");
    }

    #[test]
    fn test_counts() {
        let db = test_db();
        let a = insert(&db, "a");
        insert(&db, "b");
        insert(&db, "c");
        claim(&db, a, "w1", &at(1)).unwrap();

        assert_eq!(count_by_status(&db, JobStatus::Pending).unwrap(), 2);
        assert_eq!(count_by_status(&db, JobStatus::Processing).unwrap(), 1);
        assert_eq!(count_by_status(&db, JobStatus::Success).unwrap(), 0);
        assert_eq!(count_all(&db).unwrap(), 3);

        let grouped = count_grouped_by_status(&db).unwrap();
        assert_eq!(grouped.get(&JobStatus::Pending), Some(&2));
        assert_eq!(grouped.get(&JobStatus::Processing), Some(&1));
        assert!(!grouped.contains_key(&JobStatus::Failed));
    }
}
