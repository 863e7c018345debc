//! Periodic retention: age out the raw log and thumbnails past
//! `retention_days`, age out high-resolution aggregate buckets sooner than
//! low-resolution ones, reset stale 24h windows, and reclaim space.

use rusqlite::params;

use crate::{Result, TelemetryStore};

const DAY_MS: i64 = 86_400_000;

#[derive(Clone, Copy, Debug)]
pub struct RetentionPolicy {
    pub retention_days: u32,
}

pub(crate) fn run(store: &TelemetryStore, policy: &RetentionPolicy, now_ms: i64) -> Result<()> {
    let conn = store.conn.lock();
    let raw_cutoff = now_ms - policy.retention_days as i64 * DAY_MS;

    conn.execute(
        "DELETE FROM telemetry_events WHERE camera_id = ?1 AND timestamp < ?2",
        params![store.camera_id, raw_cutoff],
    )?;
    conn.execute(
        "DELETE FROM frames WHERE camera_id = ?1 AND timestamp < ?2",
        params![store.camera_id, raw_cutoff],
    )?;

    // High-resolution buckets age out first, in decreasing order of
    // resolution; daily buckets share the raw retention window.
    let five_min_cutoff = now_ms - 7 * DAY_MS;
    let hourly_cutoff = now_ms - 30 * DAY_MS;
    conn.execute(
        "DELETE FROM time_series_buckets WHERE camera_id = ?1 AND bucket_size = '5m' AND bucket_ts < ?2",
        params![store.camera_id, five_min_cutoff],
    )?;
    conn.execute(
        "DELETE FROM time_series_buckets WHERE camera_id = ?1 AND bucket_size = '1h' AND bucket_ts < ?2",
        params![store.camera_id, hourly_cutoff],
    )?;
    conn.execute(
        "DELETE FROM time_series_buckets WHERE camera_id = ?1 AND bucket_size = '1d' AND bucket_ts < ?2",
        params![store.camera_id, raw_cutoff],
    )?;
    // 1-minute buckets are the finest resolution and only useful for very
    // recent activity; age them out with the hourly tier's own rule would
    // keep too much, so they share the 5-minute cutoff.
    conn.execute(
        "DELETE FROM time_series_buckets WHERE camera_id = ?1 AND bucket_size = '1m' AND bucket_ts < ?2",
        params![store.camera_id, five_min_cutoff],
    )?;

    conn.execute(
        "UPDATE event_type_counts SET recent_24h = 0 WHERE camera_id = ?1 AND last_24h_updated < ?2",
        params![store.camera_id, now_ms - DAY_MS],
    )?;

    conn.execute_batch("PRAGMA incremental_vacuum;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TelemetryStore, WriteFlags};
    use vision_frame::{Event, EventType};

    #[test]
    fn retention_deletes_events_older_than_window() {
        let store = TelemetryStore::open_in_memory("cam1", WriteFlags::default()).unwrap();
        let old_event = Event::new(EventType::Detection, "cam1", "det", 0, serde_json::json!({}));
        store.process_telemetry(&[old_event], None).unwrap();

        let now_ms = 100 * DAY_MS;
        store.run_retention(&RetentionPolicy { retention_days: 30 }, now_ms).unwrap();

        let count: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM telemetry_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
