use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let positive = [
        ("worker.worker_count", config.worker.worker_count as u64),
        ("worker.batch_size", config.worker.batch_size),
        ("worker.poll_interval_ms", config.worker.poll_interval_ms),
        ("maintenance.interval_secs", config.maintenance.interval_secs),
        ("maintenance.timeout_minutes", config.maintenance.timeout_minutes),
    ];
    for (name, value) in positive {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than zero", name),
            });
        }
    }

    if config.jobs.job_type.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "jobs.job_type must not be empty".to_string(),
        });
    }

    if config.worker.id_prefix.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "worker.id_prefix must not be empty".to_string(),
        });
    }

    Ok(())
}
