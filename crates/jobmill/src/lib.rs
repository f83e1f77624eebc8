pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod telemetry;

pub use config::{load_config, Config};
pub use db::{Database, DatabaseError, SourceRecord, SourceSelector, SourceStore, SqliteSourceStore};
pub use error::{ConfigError, JobmillError, LoggingError, QueueError, Result, StrategyError};
pub use queue::{
    ErrorCode, FieldCountStrategy, Job, JobDefaults, JobId, JobProducer, JobQueue, JobStatus,
    JobWorker, MaintenanceScheduler, ProcessingStrategy, RetryManager, StatusReporter,
    StatusSummary, TimeoutReaper, WorkerPool,
};
pub use telemetry::{init_logging, LogFormat};
