//! Logging setup.
//!
//! The storage layer logs through the `log` macros; the worker path emits
//! `tracing` spans and events. `tracing_log::LogTracer` routes the former
//! into the tracing subscriber so both end up in one stream, on stderr.

use std::str::FromStr;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::LoggingError;

/// Environment variable holding a filter that overrides the default.
pub const LOG_ENV_VAR: &str = "JOBMILL_LOG";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// JSON Lines with span fields.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "compact" => Ok(LogFormat::Text),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Builds the filter from `JOBMILL_LOG`, falling back to `default_filter`.
fn build_env_filter(default_filter: &str) -> Result<EnvFilter, LoggingError> {
    match std::env::var(LOG_ENV_VAR) {
        Ok(from_env) if !from_env.trim().is_empty() => parse_filter(&from_env),
        _ => parse_filter(default_filter),
    }
}

fn parse_filter(filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

/// Installs the global subscriber.
///
/// Safe to call more than once: later calls leave the first subscriber in
/// place.
pub fn init_logging(default_filter: &str, format: LogFormat) -> Result<(), LoggingError> {
    let filter = build_env_filter(default_filter)?;

    // Bridge `log` -> tracing; fails only if already installed.
    tracing_log::LogTracer::init().ok();

    let layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::NONE)
            .with_filter(filter)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Logging already initialized");
    }

    Ok(())
}
