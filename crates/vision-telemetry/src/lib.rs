//! Telemetry store (component C5): one SQLite database per camera, storing
//! an append-only event log plus five real-time aggregate tables so
//! analytics reads stay O(result size) regardless of log size.
//!
//! Writes go through a single mutex per database handle and one
//! transaction per frame: either every event of the frame and its
//! aggregate upserts land, or the frame is reported failed. Reads never
//! scan `telemetry_events`; they only ever read the aggregate tables.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::Connection;
use vision_frame::Event;

mod read;
mod retention;
mod schema;
mod write;

pub use read::{Analytics, DwellTimeRow, TimeSeriesRow};
pub use retention::RetentionPolicy;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Per-sink write gates, checked before an event is persisted. Event types
/// outside these three categories (classification, custom) are always
/// stored.
#[derive(Clone, Copy, Debug)]
pub struct WriteFlags {
    pub store_detection_events: bool,
    pub store_tracking_events: bool,
    pub store_counting_events: bool,
}

impl Default for WriteFlags {
    fn default() -> Self {
        Self {
            store_detection_events: true,
            store_tracking_events: true,
            store_counting_events: true,
        }
    }
}

pub struct TelemetryStore {
    camera_id: String,
    path: PathBuf,
    conn: Mutex<Connection>,
    flags: WriteFlags,
    last_summary_write_ms: Mutex<i64>,
}

impl TelemetryStore {
    pub fn open(path: impl AsRef<Path>, camera_id: impl Into<String>, flags: WriteFlags) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        schema::create_schema(&conn)?;
        Ok(Self {
            camera_id: camera_id.into(),
            path,
            conn: Mutex::new(conn),
            flags,
            last_summary_write_ms: Mutex::new(0),
        })
    }

    #[cfg(test)]
    fn open_in_memory(camera_id: impl Into<String>, flags: WriteFlags) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_schema(&conn)?;
        Ok(Self {
            camera_id: camera_id.into(),
            path: PathBuf::new(),
            conn: Mutex::new(conn),
            flags,
            last_summary_write_ms: Mutex::new(0),
        })
    }

    /// Insert every event from one frame, fanning each out to the real-time
    /// aggregates, in a single transaction. `thumbnail` is an optional
    /// (bytes, width, height) row for the `frames` table.
    pub fn process_telemetry(
        &self,
        events: &[Event],
        thumbnail: Option<(&[u8], u32, u32)>,
    ) -> Result<()> {
        write::process_telemetry(self, events, thumbnail)
    }

    pub fn get_analytics(&self) -> Result<Analytics> {
        read::get_analytics(self)
    }

    pub fn get_time_series(&self, start_ms: i64, end_ms: i64) -> Result<Vec<TimeSeriesRow>> {
        read::get_time_series(self, start_ms, end_ms)
    }

    pub fn get_dwell_times(&self, start_ms: i64, end_ms: i64) -> Result<Vec<DwellTimeRow>> {
        read::get_dwell_times(self, start_ms, end_ms)
    }

    pub fn run_retention(&self, policy: &RetentionPolicy, now_ms: i64) -> Result<()> {
        retention::run(self, policy, now_ms)
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }
}

/// `delete_data_for_camera`: close the handle, remove the database file and
/// its WAL/SHM companions. Idempotent — a missing file is success.
pub fn delete_data_for_camera(store: TelemetryStore) -> Result<()> {
    let path = store.path.clone();
    drop(store);
    for suffix in ["", "-wal", "-shm"] {
        let candidate = PathBuf::from(format!("{}{suffix}", path.display()));
        match std::fs::remove_file(&candidate) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Replace malformed byte sequences with U+FFFD, per the UTF-8 discipline
/// required at every string-bearing field before storage.
pub fn sanitize_utf8_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse `raw` as JSON; on failure, wrap it in the documented fallback
/// shape instead of rejecting the write.
pub fn parse_properties_or_fallback(raw: &[u8]) -> serde_json::Value {
    match serde_json::from_slice::<serde_json::Value>(raw) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "_parse_error": true,
            "raw_data": sanitize_utf8_bytes(raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_invalid_utf8_with_replacement_character() {
        let bytes = b"valid_\xFF_tail";
        let sanitized = sanitize_utf8_bytes(bytes);
        assert!(sanitized.contains('\u{FFFD}'));
        assert!(String::from_utf8(sanitized.into_bytes()).is_ok());
    }

    #[test]
    fn malformed_json_properties_fall_back() {
        let value = parse_properties_or_fallback(b"{not json");
        assert_eq!(value["_parse_error"], true);
    }

    #[test]
    fn delete_data_for_camera_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("vision-telemetry-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_path = dir.join("cam-delete-test.sqlite3");
        let store = TelemetryStore::open(&db_path, "cam1", WriteFlags::default()).unwrap();
        drop(store);
        assert!(db_path.exists());

        let store2 = TelemetryStore::open(&db_path, "cam1", WriteFlags::default()).unwrap();
        delete_data_for_camera(store2).unwrap();
        assert!(!db_path.exists());

        // Second deletion on an already-open-then-closed store: missing
        // file is success, not an error.
        // Re-creating and deleting again over the same path must still
        // succeed even though nothing is left on disk from the first round.
        let store3 = TelemetryStore::open(&db_path, "cam1", WriteFlags::default()).unwrap();
        delete_data_for_camera(store3).unwrap();
        assert!(!db_path.exists());
    }
}
