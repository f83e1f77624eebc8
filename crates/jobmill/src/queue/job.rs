use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned job identifier.
pub type JobId = i64;

/// Priority given to new jobs when the caller does not choose one.
pub const DEFAULT_PRIORITY: i32 = 3;

/// Retry bound given to new jobs when the caller does not choose one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Message recorded when the reaper fails a stuck job.
pub const TIMEOUT_MESSAGE: &str = "Processing timeout";

/// Message recorded when a job's source record no longer exists.
pub const DATA_NOT_FOUND_MESSAGE: &str = "Data not found";

/// Lifecycle state of a job.
///
/// `pending -> processing -> success | failed`, and `failed -> pending`
/// only through the retry manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Success,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Why a job ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The source record vanished between job creation and processing.
    DataNotFound,
    /// The processing strategy returned an error.
    ProcessingError,
    /// The job sat in `processing` past the reaper's grace period.
    Timeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DataNotFound => "DATA_NOT_FOUND",
            ErrorCode::ProcessingError => "PROCESSING_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ErrorCode::DataNotFound,
            ErrorCode::ProcessingError,
            ErrorCode::Timeout,
        ]
        .into_iter()
        .find(|code| code.as_str() == s)
        .ok_or_else(|| format!("unknown error code '{}'", s))
    }
}

/// A queued unit of work wrapping one source record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: JobId,
    /// Id of the source record this job processes. Unique across jobs.
    pub source_ref: String,
    pub job_type: String,
    pub status: JobStatus,
    /// True only once the job reached `success`.
    pub is_completed: bool,
    /// Lower values are served first.
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the current or last claim happened.
    pub started_at: Option<DateTime<Utc>>,
    /// When the last terminal outcome was recorded.
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_duration_ms: Option<i64>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Worker that last claimed the job.
    pub processor_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Job {
    /// Whether the retry manager may still move this job back to `pending`.
    pub fn can_retry(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }
}

/// Values for a job that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_ref: String,
    pub job_type: String,
    pub priority: i32,
    pub max_retries: u32,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(source_ref: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            job_type: job_type.into(),
            priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
