//! Schema versioning for the queue database.
//!
//! Applied versions are recorded in `_migrations`; anything newer is
//! applied in order, one `BEGIN IMMEDIATE` transaction per version.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// Schema history, oldest first.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        description: "create_source_records_table",
        sql: include_str!("sql/002_create_source_records.sql"),
    },
    Migration {
        version: 3,
        description: "create_queue_indexes",
        sql: include_str!("sql/003_create_queue_indexes.sql"),
    },
];

/// Brings `conn` up to the latest schema version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        // Migration SQL only uses IF NOT EXISTS statements, so a second
        // process racing on a fresh file re-applies it as a no-op.
        let batch = format!(
            "BEGIN IMMEDIATE;\n{}\nINSERT OR IGNORE INTO _migrations (version, description) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.description
        );

        if let Err(e) = conn.execute_batch(&batch) {
            let _ = conn.execute_batch("ROLLBACK;");
            return Err(DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}
