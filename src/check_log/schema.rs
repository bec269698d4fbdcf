use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::Connection;

/// Check log table - one row per successful on-demand check
const CHECK_LOG_TABLE_V1: Table = Table {
    name: "check_log",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!("query", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!("device", &SqlType::Text, non_null = true),
        sqlite_column!("has_ads", &SqlType::Integer, non_null = true),
        sqlite_column!("ads_count", &SqlType::Integer, non_null = true),
        sqlite_column!("latency_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("checked_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_check_log_checked_at", "checked_at DESC")],
};

/// V2 adds the ad types found and the market (gl/hl) the search ran in
const CHECK_LOG_TABLE_V2: Table = Table {
    name: "check_log",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!("query", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text),
        sqlite_column!("device", &SqlType::Text, non_null = true),
        sqlite_column!("has_ads", &SqlType::Integer, non_null = true),
        sqlite_column!("ads_count", &SqlType::Integer, non_null = true),
        sqlite_column!("latency_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("checked_at", &SqlType::Text, non_null = true),
        sqlite_column!(
            "ad_types",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("gl", &SqlType::Text),
        sqlite_column!("hl", &SqlType::Text),
    ],
    indices: &[("idx_check_log_checked_at", "checked_at DESC")],
};

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "ALTER TABLE check_log ADD COLUMN ad_types TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    conn.execute("ALTER TABLE check_log ADD COLUMN gl TEXT", [])?;
    conn.execute("ALTER TABLE check_log ADD COLUMN hl TEXT", [])?;
    Ok(())
}

pub const CHECK_LOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[CHECK_LOG_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[CHECK_LOG_TABLE_V2],
        migration: Some(migrate_v1_to_v2),
    },
];
