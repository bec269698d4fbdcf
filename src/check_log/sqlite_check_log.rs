use super::schema::CHECK_LOG_VERSIONED_SCHEMAS;
use super::{CheckLog, CheckLogEntry};
use crate::check_client::{AdType, CheckRequest, CheckResult, Device};
use crate::sqlite_persistence::{
    conversion_error, format_timestamp, open_versioned, parse_timestamp,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct SqliteCheckLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckLog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), CHECK_LOG_VERSIONED_SCHEMAS, "check log")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CheckLogEntry> {
        let device_str: String = row.get("device")?;
        let ad_types_str: String = row.get("ad_types")?;
        let checked_at_str: String = row.get("checked_at")?;

        Ok(CheckLogEntry {
            id: row.get("id")?,
            query: row.get("query")?,
            location: row.get("location")?,
            device: Device::parse(&device_str)
                .ok_or_else(|| conversion_error(row, "device", "unknown device"))?,
            has_ads: row.get::<_, i64>("has_ads")? != 0,
            ads_count: row.get("ads_count")?,
            ad_types: parse_ad_types(&ad_types_str)
                .ok_or_else(|| conversion_error(row, "ad_types", "unknown ad type"))?,
            gl: row.get("gl")?,
            hl: row.get("hl")?,
            latency_ms: row.get("latency_ms")?,
            checked_at: parse_timestamp(&checked_at_str)
                .map_err(|e| conversion_error(row, "checked_at", e))?,
        })
    }
}

/// Ad types are stored comma separated, e.g. `search,shopping`.
fn format_ad_types(types: &[AdType]) -> String {
    types
        .iter()
        .map(AdType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_ad_types(s: &str) -> Option<Vec<AdType>> {
    s.split(',')
        .filter(|part| !part.is_empty())
        .map(AdType::parse)
        .collect()
}

impl CheckLog for SqliteCheckLog {
    fn record(
        &self,
        request: &CheckRequest,
        result: &CheckResult,
        latency: Duration,
        checked_at: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO check_log (query, location, device, has_ads, ads_count, latency_ms,
                                    checked_at, ad_types, gl, hl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                request.query,
                request.location,
                request.device.as_str(),
                result.has_ads,
                result.ads_count,
                latency.as_millis() as i64,
                format_timestamp(&checked_at),
                format_ad_types(&result.ad_types),
                result.gl,
                result.hl
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn recent(&self, limit: usize) -> Result<Vec<CheckLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, query, location, device, has_ads, ads_count, ad_types, gl, hl,
                    latency_ms, checked_at
             FROM check_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check_client::AdEntry;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_list_recent() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteCheckLog::new(temp_dir.path().join("check_log.db")).unwrap();
        let checked_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let flights = CheckRequest::new("flights", Some("Izmir".to_string()), Device::Mobile);
        let mut with_ads = CheckResult::from_ads(
            "flights",
            vec![AdEntry {
                title: "Cheap Flights".to_string(),
                url: "https://flights.example".to_string(),
            }],
        );
        with_ads.ad_types.push(AdType::Shopping);
        with_ads.gl = Some("tr".to_string());
        with_ads.hl = Some("en".to_string());
        let shoes = CheckRequest::new("shoes", None, Device::Desktop);
        let without_ads = CheckResult::from_ads("shoes", vec![]);

        log.record(&flights, &with_ads, Duration::from_millis(850), checked_at)
            .unwrap();
        log.record(&shoes, &without_ads, Duration::from_millis(120), checked_at)
            .unwrap();

        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "shoes");
        assert!(!entries[0].has_ads);
        assert!(entries[0].ad_types.is_empty());
        assert!(entries[0].gl.is_none());
        assert_eq!(entries[1].query, "flights");
        assert_eq!(entries[1].location.as_deref(), Some("Izmir"));
        assert_eq!(entries[1].device, Device::Mobile);
        assert!(entries[1].has_ads);
        assert_eq!(entries[1].ads_count, 1);
        assert_eq!(entries[1].ad_types, vec![AdType::Search, AdType::Shopping]);
        assert_eq!(entries[1].gl.as_deref(), Some("tr"));
        assert_eq!(entries[1].hl.as_deref(), Some("en"));
        assert_eq!(entries[1].latency_ms, 850);
        assert_eq!(entries[1].checked_at, checked_at);

        assert_eq!(log.recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("check_log.db");
        {
            let log = SqliteCheckLog::new(&path).unwrap();
            log.record(
                &CheckRequest::new("shoes", None, Device::Desktop),
                &CheckResult::from_ads("shoes", vec![]),
                Duration::from_millis(10),
                Utc::now(),
            )
            .unwrap();
        }
        let log = SqliteCheckLog::new(&path).unwrap();
        assert_eq!(log.recent(10).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_rows_are_reported() {
        let temp_dir = TempDir::new().unwrap();
        let log = SqliteCheckLog::new(temp_dir.path().join("check_log.db")).unwrap();
        let checked_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        log.record(
            &CheckRequest::new("shoes", None, Device::Desktop),
            &CheckResult::from_ads("shoes", vec![]),
            Duration::from_millis(10),
            checked_at,
        )
        .unwrap();

        let set = |sql: &str| {
            log.conn.lock().unwrap().execute(sql, []).unwrap();
        };

        set("UPDATE check_log SET device = 'tablet'");
        let err = log.recent(10).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<rusqlite::Error>(),
            Some(rusqlite::Error::FromSqlConversionFailure(..))
        ));

        set("UPDATE check_log SET device = 'desktop', checked_at = 'yesterday'");
        assert!(log.recent(10).is_err());

        set("UPDATE check_log SET checked_at = '2025-03-01T12:00:00.000Z', ad_types = 'video'");
        assert!(log.recent(10).is_err());
    }

    #[test]
    fn test_migrates_v1_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("check_log.db");
        {
            let conn = Connection::open(&path).unwrap();
            CHECK_LOG_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
            conn.execute(
                "INSERT INTO check_log (query, location, device, has_ads, ads_count, latency_ms, checked_at)
                 VALUES ('shoes', NULL, 'mobile', 1, 2, 300, '2025-03-01T12:00:00.000Z')",
                [],
            )
            .unwrap();
        }

        let log = SqliteCheckLog::new(&path).unwrap();
        let entries = log.recent(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].device, Device::Mobile);
        assert!(entries[0].ad_types.is_empty());
        assert!(entries[0].gl.is_none());
    }
}
