pub mod job;
pub mod maintenance;
pub mod pool;
pub mod producer;
pub mod reaper;
pub mod reporter;
pub mod retry;
pub mod service;
pub mod strategy;
pub mod worker;

pub use crate::error::{QueueError, StrategyError};
pub use job::{ErrorCode, Job, JobId, JobStatus, NewJob};
pub use maintenance::{MaintenancePass, MaintenanceScheduler};
pub use pool::{PoolConfig, WorkerPool, WorkerReport};
pub use producer::{JobDefaults, JobProducer};
pub use reaper::TimeoutReaper;
pub use reporter::{StatusReporter, StatusSummary};
pub use retry::RetryManager;
pub use service::JobQueue;
pub use strategy::{FieldCountStrategy, ProcessingStrategy};
pub use worker::{JobOutcome, JobWorker};
