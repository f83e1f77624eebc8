//! Fake processing strategies.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::json;

use jobmill::db::SourceRecord;
use jobmill::queue::{ProcessingStrategy, StrategyError};

/// Succeeds for every record and counts calls.
#[derive(Default)]
pub struct CountingStrategy {
    pub calls: AtomicUsize,
}

impl CountingStrategy {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProcessingStrategy for CountingStrategy {
    fn process(&self, record: &SourceRecord) -> Result<serde_json::Value, StrategyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "processed": record.id }))
    }
}

/// Fails records whose id is in the set; the set can change between runs.
#[derive(Default)]
pub struct FailingStrategy {
    failing: Mutex<HashSet<String>>,
}

impl FailingStrategy {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn heal(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }
}

impl ProcessingStrategy for FailingStrategy {
    fn process(&self, record: &SourceRecord) -> Result<serde_json::Value, StrategyError> {
        if self.failing.lock().unwrap().contains(&record.id) {
            Err(StrategyError::failed(format!("cannot process {}", record.id)))
        } else {
            Ok(json!({ "ok": true }))
        }
    }
}
