use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::job::{DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
use crate::queue::{JobDefaults, PoolConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// `~/` is expanded against the home directory.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            database_path: None,
            jobs: JobsConfig::default(),
            worker: WorkerConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl Config {
    /// Resolved database location, falling back to the per-user default.
    pub fn database_path(&self) -> Option<PathBuf> {
        match self.database_path.as_deref() {
            Some(raw) => Some(expand_home(raw)),
            None => crate::db::default_database_path(),
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_priority")]
    pub default_priority: i32,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    #[serde(default = "default_job_type")]
    pub job_type: String,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_job_type() -> String {
    "data_processing".to_string()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            default_max_retries: default_max_retries(),
            job_type: default_job_type(),
        }
    }
}

impl JobsConfig {
    pub fn defaults(&self) -> JobDefaults {
        JobDefaults {
            priority: self.default_priority,
            max_retries: self.default_max_retries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_batch_size() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_id_prefix() -> String {
    "worker".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl WorkerConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            id_prefix: self.id_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_timeout_minutes() -> u64 {
    30
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_minutes: default_timeout_minutes(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// How long a job may stay `processing` before it is reaped.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}
