use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobmillError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },
}

/// Failures that abort a queue operation as a whole.
///
/// Per-job problems never surface here; they are recorded on the job.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("Worker count must be greater than zero")]
    InvalidWorkerCount,

    #[error("Timeout of {0:?} is out of range")]
    InvalidTimeout(Duration),

    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(String),
}

/// Error returned by a processing strategy for a single record.
///
/// Its message is stored verbatim on the failed job.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("{0}")]
    Failed(String),

    #[error("Record '{id}' is not processable: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrategyError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

pub type Result<T> = std::result::Result<T, JobmillError>;
