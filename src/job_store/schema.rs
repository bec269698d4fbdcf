//! SQLite schema for the job database.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::Connection;

// =============================================================================
// Version 1 - Recurring check jobs
// =============================================================================

/// One row per job. `pending_delete` is the tombstone set when a running job
/// is deleted; the row goes away when the run is released.
const JOBS_TABLE_V1: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!("query", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!(
            "device",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'desktop'")
        ),
        sqlite_column!("interval_minutes", &SqlType::Integer, non_null = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!(
            "state",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'idle'")
        ),
        sqlite_column!(
            "pending_delete",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_result", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_jobs_due", "state, next_run_at")],
};

// =============================================================================
// Version 2 - Per-job alert target
// =============================================================================

/// `notify_chat_id` overrides the configured chat for this job's ads alerts.
const JOBS_TABLE_V2: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!("query", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!(
            "device",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'desktop'")
        ),
        sqlite_column!("interval_minutes", &SqlType::Integer, non_null = true),
        sqlite_column!("next_run_at", &SqlType::Text, non_null = true),
        sqlite_column!(
            "state",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'idle'")
        ),
        sqlite_column!(
            "pending_delete",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_result", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("notify_chat_id", &SqlType::Text),
    ],
    indices: &[("idx_jobs_due", "state, next_run_at")],
};

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute("ALTER TABLE jobs ADD COLUMN notify_chat_id TEXT", [])?;
    Ok(())
}

pub const JOBS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOBS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[JOBS_TABLE_V2],
        migration: Some(migrate_v1_to_v2),
    },
];
