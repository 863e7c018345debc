//! Table and index definitions. `bucket_size` is stored as a short text tag
//! (`1m`/`5m`/`1h`/`1d`); `class_name` columns use `''` rather than `NULL`
//! as the sentinel for "no class" because SQLite primary keys treat every
//! `NULL` as distinct, which would defeat the upsert.

use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS telemetry_events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            camera_id       TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            event_type      TEXT NOT NULL,
            source_id       TEXT NOT NULL,
            properties_json TEXT NOT NULL,
            frame_id        INTEGER,
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_camera_ts
            ON telemetry_events(camera_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_events_camera_type_ts
            ON telemetry_events(camera_id, event_type, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_events_covering
            ON telemetry_events(camera_id, timestamp DESC, event_type, source_id);
        CREATE INDEX IF NOT EXISTS idx_events_class_name
            ON telemetry_events(json_extract(properties_json, '$.class_name'));

        CREATE TABLE IF NOT EXISTS frames (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            camera_id       TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            thumbnail_blob  BLOB,
            width           INTEGER NOT NULL,
            height          INTEGER NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS event_type_counts (
            camera_id        TEXT NOT NULL,
            event_type       TEXT NOT NULL,
            total            INTEGER NOT NULL DEFAULT 0,
            recent_24h       INTEGER NOT NULL DEFAULT 0,
            last_updated     INTEGER NOT NULL,
            last_24h_updated INTEGER NOT NULL,
            PRIMARY KEY (camera_id, event_type)
        );

        CREATE TABLE IF NOT EXISTS class_distribution (
            camera_id  TEXT NOT NULL,
            class_name TEXT NOT NULL,
            event_type TEXT NOT NULL,
            total      INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (camera_id, class_name, event_type)
        );

        CREATE TABLE IF NOT EXISTS time_series_buckets (
            camera_id   TEXT NOT NULL,
            bucket_ts   INTEGER NOT NULL,
            bucket_size TEXT NOT NULL,
            event_type  TEXT NOT NULL,
            class_name  TEXT NOT NULL DEFAULT '',
            count       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (camera_id, bucket_ts, bucket_size, event_type, class_name)
        );

        CREATE INDEX IF NOT EXISTS idx_time_series_lookup
            ON time_series_buckets(camera_id, bucket_size, bucket_ts DESC);

        CREATE TABLE IF NOT EXISTS dwell_times (
            camera_id       TEXT NOT NULL,
            track_id        INTEGER NOT NULL,
            class_name      TEXT NOT NULL,
            first_seen      INTEGER NOT NULL,
            last_seen       INTEGER NOT NULL,
            detection_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (camera_id, track_id, class_name)
        );

        CREATE INDEX IF NOT EXISTS idx_dwell_times_range
            ON dwell_times(camera_id, last_seen DESC);

        CREATE TABLE IF NOT EXISTS analytics_summary (
            camera_id  TEXT NOT NULL,
            key        TEXT NOT NULL,
            value_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (camera_id, key)
        );
        "#,
    )
}
