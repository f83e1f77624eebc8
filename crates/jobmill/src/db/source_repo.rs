//! Source record store: the records jobs are created from.
//!
//! The queue only reads through [`SourceStore`]. The SQLite implementation
//! keeps records in the `source_records` table of the job database, with a
//! JSON payload that selectors filter on via `json_extract`.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Row};
use serde::Serialize;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// A domain record identified by the id that jobs reference as `source_ref`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub id: String,
    pub collection: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(
        id: impl Into<String>,
        collection: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// Builds a record from a JSON object carrying its own `id`.
    ///
    /// String and integer ids are accepted; the whole object becomes the
    /// payload.
    pub fn from_json(collection: &str, payload: serde_json::Value) -> Result<Self, DatabaseError> {
        let id = match payload.get("id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
            other => {
                return Err(DatabaseError::InvalidValue {
                    column: "id",
                    value: other.map(|v| v.to_string()).unwrap_or_default(),
                })
            }
        };
        Ok(Self::new(id, collection, payload))
    }

    fn from_row(row: &Row<'_>) -> Result<(String, String, String, String), rusqlite::Error> {
        Ok((
            row.get("id")?,
            row.get("collection")?,
            row.get("payload")?,
            row.get("created_at")?,
        ))
    }

    fn from_raw(raw: (String, String, String, String)) -> Result<Self, DatabaseError> {
        let (id, collection, payload, created_at) = raw;
        Ok(Self {
            id,
            collection,
            payload: serde_json::from_str(&payload)?,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}

/// Equality test on one payload field, e.g. `status = "need_processing"`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMatch {
    /// Dotted path into the payload object.
    pub path: String,
    pub value: serde_json::Value,
}

impl FieldMatch {
    pub fn new(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

impl FromStr for FieldMatch {
    type Err = String;

    /// Parses `path=value`. The value is read as JSON when it parses,
    /// otherwise kept as a plain string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(format!("empty field name in '{}'", s));
        }
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        Ok(Self::new(path, value))
    }
}

/// Which source records a producer run should turn into jobs.
///
/// Results come back oldest first.
#[derive(Debug, Default, Clone)]
pub struct SourceSelector {
    pub collection: Option<String>,
    pub matches: Vec<FieldMatch>,
    /// Payload fields that must be absent.
    pub missing: Vec<String>,
    pub limit: Option<u64>,
}

impl SourceSelector {
    /// Selects every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_match(mut self, path: impl Into<String>, value: serde_json::Value) -> Self {
        self.matches.push(FieldMatch::new(path, value));
        self
    }

    pub fn with_missing(mut self, path: impl Into<String>) -> Self {
        self.missing.push(path.into());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Read access to source records, as consumed by the producer and worker.
pub trait SourceStore: Send + Sync {
    /// Runs a selection, yielding candidate records.
    fn query(&self, selector: &SourceSelector) -> Result<Vec<SourceRecord>, DatabaseError>;

    /// Looks up a single record by id.
    fn get(&self, id: &str) -> Result<Option<SourceRecord>, DatabaseError>;
}

/// Converts a dotted field path into a SQLite JSON path (`a.b` -> `$.a.b`).
fn json_path(path: &str) -> Result<String, DatabaseError> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if !valid {
        return Err(DatabaseError::InvalidValue {
            column: "payload",
            value: path.to_string(),
        });
    }
    Ok(format!("$.{}", path))
}

/// Inserts a record or replaces the one with the same id.
pub fn upsert(db: &Database, record: &SourceRecord) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(&record.payload)?;
    let created_at = format_timestamp(&record.created_at);

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO source_records (id, collection, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET collection = excluded.collection,
               payload = excluded.payload",
            params![record.id, record.collection, payload, created_at],
        )?;
        Ok(())
    })
}

/// Upserts every record of a JSON-lines file into `collection`.
///
/// Blank lines are skipped. All lines are parsed before anything is
/// written, so a malformed file leaves the store untouched. Returns the
/// number of records written.
pub fn import_jsonl(db: &Database, collection: &str, path: &Path) -> Result<usize, DatabaseError> {
    let content = std::fs::read_to_string(path).map_err(|e| DatabaseError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let records = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let payload = serde_json::from_str::<serde_json::Value>(line)?;
            SourceRecord::from_json(collection, payload)
        })
        .collect::<Result<Vec<_>, _>>()?;

    for record in &records {
        upsert(db, record)?;
    }

    log::info!(
        "Imported {} records into '{}' from {}",
        records.len(),
        collection,
        path.display()
    );
    Ok(records.len())
}

/// Deletes a record. Returns whether it existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute("DELETE FROM source_records WHERE id = ?1", params![id])?;
        Ok(deleted == 1)
    })
}

/// Finds a record by id.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<SourceRecord>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM source_records WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], SourceRecord::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })?;
    raw.map(SourceRecord::from_raw).transpose()
}

/// Runs a selector against the `source_records` table.
pub fn query(db: &Database, selector: &SourceSelector) -> Result<Vec<SourceRecord>, DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Value> = Vec::new();

    if let Some(ref collection) = selector.collection {
        param_values.push(Value::Text(collection.clone()));
        conditions.push(format!("collection = ?{}", param_values.len()));
    }
    for field in &selector.matches {
        param_values.push(Value::Text(json_path(&field.path)?));
        let path_param = param_values.len();
        if field.value.is_null() {
            conditions.push(format!("json_type(payload, ?{}) = 'null'", path_param));
        } else {
            param_values.push(Value::Text(field.value.to_string()));
            conditions.push(format!(
                "json_extract(payload, ?{}) = json_extract(?{}, '$')",
                path_param,
                param_values.len()
            ));
        }
    }
    for path in &selector.missing {
        param_values.push(Value::Text(json_path(path)?));
        conditions.push(format!("json_type(payload, ?{}) IS NULL", param_values.len()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let limit_clause = match selector.limit {
        Some(limit) => {
            param_values.push(Value::Integer(limit as i64));
            format!("LIMIT ?{}", param_values.len())
        }
        None => String::new(),
    };
    let sql = format!(
        "SELECT * FROM source_records {} ORDER BY created_at ASC, id ASC {}",
        where_clause, limit_clause
    );

    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(param_values.iter()), SourceRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(SourceRecord::from_raw).collect()
}

/// [`SourceStore`] backed by the `source_records` table.
#[derive(Clone)]
pub struct SqliteSourceStore {
    db: Database,
}

impl SqliteSourceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl SourceStore for SqliteSourceStore {
    fn query(&self, selector: &SourceSelector) -> Result<Vec<SourceRecord>, DatabaseError> {
        query(&self.db, selector)
    }

    fn get(&self, id: &str) -> Result<Option<SourceRecord>, DatabaseError> {
        find_by_id(&self.db, id)
    }
}
