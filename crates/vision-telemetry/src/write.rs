//! The single write path: one transaction per frame covering the event log
//! insert and every aggregate upsert it triggers.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use vision_frame::{Event, EventType};

use crate::{sanitize_utf8_bytes, Result, TelemetryStore};

const BUCKET_SIZES: [(&str, i64); 4] = [("1m", 60_000), ("5m", 300_000), ("1h", 3_600_000), ("1d", 86_400_000)];
const DAY_MS: i64 = 86_400_000;
const SUMMARY_THROTTLE_MS: i64 = 30_000;

fn passes_write_gate(flags: &crate::WriteFlags, event_type: EventType) -> bool {
    match event_type {
        EventType::Detection => flags.store_detection_events,
        EventType::Tracking => flags.store_tracking_events,
        EventType::Crossing => flags.store_counting_events,
        EventType::Classification | EventType::Custom => true,
    }
}

pub(crate) fn process_telemetry(
    store: &TelemetryStore,
    events: &[Event],
    thumbnail: Option<(&[u8], u32, u32)>,
) -> Result<()> {
    let mut conn = store.conn.lock();
    let tx = conn.transaction()?;
    let now_ms = Utc::now().timestamp_millis();

    let frame_id: Option<i64> = match thumbnail {
        Some((bytes, width, height)) => {
            tx.execute(
                "INSERT INTO frames (camera_id, timestamp, thumbnail_blob, width, height, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![store.camera_id, now_ms, bytes, width, height, now_ms],
            )?;
            Some(tx.last_insert_rowid())
        }
        None => None,
    };

    for event in events {
        if !passes_write_gate(&store.flags, event.event_type) {
            continue;
        }

        let camera_id = sanitize_utf8_bytes(store.camera_id.as_bytes());
        let source_id = sanitize_utf8_bytes(event.source_id.as_bytes());
        let properties_json = serde_json::to_string(&event.properties).unwrap_or_else(|_| {
            serde_json::to_string(&serde_json::json!({"_parse_error": true, "raw_data": ""}))
                .expect("static fallback serializes")
        });

        tx.execute(
            "INSERT INTO telemetry_events
                (camera_id, timestamp, event_type, source_id, properties_json, frame_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                camera_id,
                event.timestamp_ms,
                event.event_type.as_str(),
                source_id,
                properties_json,
                frame_id,
                now_ms,
            ],
        )?;

        update_event_type_counts(&tx, &camera_id, event.event_type.as_str(), event.timestamp_ms, now_ms)?;

        let class_name = event.class_name().map(sanitize_str_field);
        if let Some(class_name) = &class_name {
            update_class_distribution(&tx, &camera_id, class_name, event.event_type.as_str())?;
        }

        for (tag, size_ms) in BUCKET_SIZES {
            let bucket_ts = (event.timestamp_ms / size_ms) * size_ms;
            update_time_series_bucket(
                &tx,
                &camera_id,
                bucket_ts,
                tag,
                event.event_type.as_str(),
                class_name.as_deref().unwrap_or(""),
            )?;
        }

        if let (Some(track_id), Some(class_name)) = (event.track_id(), &class_name) {
            update_dwell_time(&tx, &camera_id, track_id, class_name, event.timestamp_ms)?;
        }
    }

    maybe_write_summary(&tx, store, now_ms)?;

    tx.commit()?;
    Ok(())
}

fn sanitize_str_field(s: &str) -> String {
    sanitize_utf8_bytes(s.as_bytes())
}

fn update_event_type_counts(
    tx: &rusqlite::Transaction,
    camera_id: &str,
    event_type: &str,
    event_ts: i64,
    now_ms: i64,
) -> rusqlite::Result<()> {
    let existing: Option<(i64, i64)> = tx
        .query_row(
            "SELECT recent_24h, last_24h_updated FROM event_type_counts WHERE camera_id = ?1 AND event_type = ?2",
            params![camera_id, event_type],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (recent_24h, last_24h_updated) = match existing {
        Some((recent, last_updated)) if now_ms - last_updated < DAY_MS => (recent + 1, last_updated),
        _ => (1, now_ms),
    };

    tx.execute(
        "INSERT INTO event_type_counts (camera_id, event_type, total, recent_24h, last_updated, last_24h_updated)
         VALUES (?1, ?2, 1, ?3, ?4, ?5)
         ON CONFLICT(camera_id, event_type) DO UPDATE SET
             total = total + 1,
             recent_24h = ?3,
             last_updated = ?4,
             last_24h_updated = ?5",
        params![camera_id, event_type, recent_24h, now_ms, last_24h_updated],
    )?;
    let _ = event_ts;
    Ok(())
}

fn update_class_distribution(
    tx: &rusqlite::Transaction,
    camera_id: &str,
    class_name: &str,
    event_type: &str,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO class_distribution (camera_id, class_name, event_type, total)
         VALUES (?1, ?2, ?3, 1)
         ON CONFLICT(camera_id, class_name, event_type) DO UPDATE SET total = total + 1",
        params![camera_id, class_name, event_type],
    )?;
    Ok(())
}

fn update_time_series_bucket(
    tx: &rusqlite::Transaction,
    camera_id: &str,
    bucket_ts: i64,
    bucket_size: &str,
    event_type: &str,
    class_name: &str,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO time_series_buckets (camera_id, bucket_ts, bucket_size, event_type, class_name, count)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)
         ON CONFLICT(camera_id, bucket_ts, bucket_size, event_type, class_name) DO UPDATE SET count = count + 1",
        params![camera_id, bucket_ts, bucket_size, event_type, class_name],
    )?;
    Ok(())
}

fn update_dwell_time(
    tx: &rusqlite::Transaction,
    camera_id: &str,
    track_id: u32,
    class_name: &str,
    ts: i64,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO dwell_times (camera_id, track_id, class_name, first_seen, last_seen, detection_count)
         VALUES (?1, ?2, ?3, ?4, ?4, 1)
         ON CONFLICT(camera_id, track_id, class_name) DO UPDATE SET
             first_seen = MIN(first_seen, ?4),
             last_seen = MAX(last_seen, ?4),
             detection_count = detection_count + 1",
        params![camera_id, track_id, class_name, ts],
    )?;
    Ok(())
}

fn maybe_write_summary(tx: &rusqlite::Transaction, store: &TelemetryStore, now_ms: i64) -> rusqlite::Result<()> {
    let mut last = store.last_summary_write_ms.lock();
    if now_ms - *last < SUMMARY_THROTTLE_MS {
        return Ok(());
    }
    *last = now_ms;

    let total_events: i64 = tx.query_row(
        "SELECT COALESCE(SUM(total), 0) FROM event_type_counts WHERE camera_id = ?1",
        params![store.camera_id],
        |row| row.get(0),
    )?;
    let summary = serde_json::json!({ "total_events": total_events, "updated_at": now_ms });
    tx.execute(
        "INSERT INTO analytics_summary (camera_id, key, value_json, updated_at)
         VALUES (?1, 'recent_activity', ?2, ?3)
         ON CONFLICT(camera_id, key) DO UPDATE SET value_json = ?2, updated_at = ?3",
        params![store.camera_id, summary.to_string(), now_ms],
    )?;
    Ok(())
}
