//! Analytic read path: every query here reads only aggregate tables, never
//! `telemetry_events`.

use rusqlite::params;
use serde::Serialize;

use crate::{Result, TelemetryStore};

#[derive(Debug, Serialize, Default)]
pub struct Analytics {
    pub event_counts: Vec<(String, i64)>,
    pub class_counts: Vec<(String, i64)>,
    pub total_events: i64,
    pub min_timestamp: Option<i64>,
    pub max_timestamp: Option<i64>,
    pub recent_events_24h: i64,
}

#[derive(Debug, Serialize)]
pub struct TimeSeriesRow {
    pub timestamp: i64,
    pub event_type: String,
    pub class_name: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DwellTimeRow {
    pub track_id: u32,
    pub class_name: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub dwell_time_ms: i64,
    pub detection_count: i64,
}

pub(crate) fn get_analytics(store: &TelemetryStore) -> Result<Analytics> {
    let conn = store.conn.lock();

    let mut event_counts = Vec::new();
    let mut total_events = 0i64;
    let mut recent_events_24h = 0i64;
    {
        let mut stmt = conn.prepare(
            "SELECT event_type, total, recent_24h FROM event_type_counts WHERE camera_id = ?1",
        )?;
        let mut rows = stmt.query(params![store.camera_id])?;
        while let Some(row) = rows.next()? {
            let event_type: String = row.get(0)?;
            let total: i64 = row.get(1)?;
            let recent_24h: i64 = row.get(2)?;
            total_events += total;
            recent_events_24h += recent_24h;
            event_counts.push((event_type, total));
        }
    }

    let mut class_counts = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT class_name, SUM(total) FROM class_distribution
             WHERE camera_id = ?1 GROUP BY class_name ORDER BY SUM(total) DESC LIMIT 25",
        )?;
        let mut rows = stmt.query(params![store.camera_id])?;
        while let Some(row) = rows.next()? {
            class_counts.push((row.get(0)?, row.get(1)?));
        }
    }

    let (min_timestamp, max_timestamp): (Option<i64>, Option<i64>) = conn
        .query_row(
            "SELECT MIN(first_seen), MAX(last_seen) FROM dwell_times WHERE camera_id = ?1",
            params![store.camera_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap_or((None, None));

    Ok(Analytics {
        event_counts,
        class_counts,
        total_events,
        min_timestamp,
        max_timestamp,
        recent_events_24h,
    })
}

/// Bucket size is picked from the range span, per the documented policy:
/// `<=1h -> 1m, <=24h -> 5m, <=7d -> 1h, else 1d`.
fn bucket_size_for_range(start_ms: i64, end_ms: i64) -> &'static str {
    let span = (end_ms - start_ms).max(0);
    const HOUR: i64 = 3_600_000;
    const DAY: i64 = 86_400_000;
    const WEEK: i64 = 7 * DAY;
    if span <= HOUR {
        "1m"
    } else if span <= DAY {
        "5m"
    } else if span <= WEEK {
        "1h"
    } else {
        "1d"
    }
}

pub(crate) fn get_time_series(store: &TelemetryStore, start_ms: i64, end_ms: i64) -> Result<Vec<TimeSeriesRow>> {
    let bucket_size = bucket_size_for_range(start_ms, end_ms);
    let conn = store.conn.lock();
    let mut stmt = conn.prepare(
        "SELECT bucket_ts, event_type, class_name, count FROM time_series_buckets
         WHERE camera_id = ?1 AND bucket_size = ?2 AND bucket_ts >= ?3 AND bucket_ts <= ?4
         ORDER BY bucket_ts ASC",
    )?;
    let rows = stmt
        .query_map(params![store.camera_id, bucket_size, start_ms, end_ms], |row| {
            Ok(TimeSeriesRow {
                timestamp: row.get(0)?,
                event_type: row.get(1)?,
                class_name: row.get(2)?,
                count: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn get_dwell_times(store: &TelemetryStore, start_ms: i64, end_ms: i64) -> Result<Vec<DwellTimeRow>> {
    let conn = store.conn.lock();
    let mut stmt = conn.prepare(
        "SELECT track_id, class_name, first_seen, last_seen, detection_count FROM dwell_times
         WHERE camera_id = ?1 AND last_seen >= ?2 AND first_seen <= ?3
         ORDER BY (last_seen - first_seen) DESC",
    )?;
    let rows = stmt
        .query_map(params![store.camera_id, start_ms, end_ms], |row| {
            let first_seen: i64 = row.get(2)?;
            let last_seen: i64 = row.get(3)?;
            Ok(DwellTimeRow {
                track_id: row.get::<_, i64>(0)? as u32,
                class_name: row.get(1)?,
                first_seen,
                last_seen,
                dwell_time_ms: last_seen - first_seen,
                detection_count: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
