//! The pluggable processing body applied to each claimed job.

use serde_json::json;

use crate::db::SourceRecord;
use crate::error::StrategyError;

/// Domain-specific work applied to one source record.
///
/// Calls are blocking and are not cancelled or timed out by the worker;
/// a strategy that can hang should bound itself. Jobs left behind by a hung
/// or crashed call are recovered by the timeout reaper.
pub trait ProcessingStrategy: Send + Sync {
    fn process(&self, record: &SourceRecord) -> Result<serde_json::Value, StrategyError>;
}

impl<F> ProcessingStrategy for F
where
    F: Fn(&SourceRecord) -> Result<serde_json::Value, StrategyError> + Send + Sync,
{
    fn process(&self, record: &SourceRecord) -> Result<serde_json::Value, StrategyError> {
        self(record)
    }
}

/// Reports how many top-level fields a record's payload carries.
///
/// Used by the CLI when no domain strategy is linked in.
#[derive(Debug, Default, Clone, Copy)]
pub struct FieldCountStrategy;

impl ProcessingStrategy for FieldCountStrategy {
    fn process(&self, record: &SourceRecord) -> Result<serde_json::Value, StrategyError> {
        let fields = record
            .payload
            .as_object()
            .ok_or_else(|| StrategyError::InvalidRecord {
                id: record.id.clone(),
                reason: "payload is not a JSON object".to_string(),
            })?
            .len();

        Ok(json!({
            "status": "completed",
            "processed_fields": fields,
            "result": "success",
        }))
    }
}
