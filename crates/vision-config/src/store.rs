//! The persisted configuration database: a flat key-value table plus one
//! JSON blob per camera. This is the "out of scope" on-disk configuration
//! storage collaborator from the system overview, specified here only
//! through the contract the rest of the workspace depends on.

use std::path::Path;

use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, StoreError>;

/// One row of `camera_config`, decoded.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraConfigRow {
    pub camera_id: String,
    pub config: serde_json::Value,
    pub updated_at: i64,
}

pub struct ConfigStore {
    conn: Connection,
}

impl ConfigStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS camera_config (
                camera_id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE camera_config (
                camera_id TEXT PRIMARY KEY,
                config TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn set_value<T: Serialize>(&self, key: &str, value: &T, now_ms: i64) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, json, now_ms],
        )?;
        Ok(())
    }

    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut stmt = self.conn.prepare("SELECT value FROM config WHERE key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        if let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&raw)?))
        } else {
            Ok(None)
        }
    }

    pub fn put_camera_config(
        &self,
        camera_id: &str,
        config: &serde_json::Value,
        now_ms: i64,
    ) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT INTO camera_config (camera_id, config, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(camera_id) DO UPDATE SET config = excluded.config, updated_at = excluded.updated_at",
            params![camera_id, json, now_ms],
        )?;
        Ok(())
    }

    pub fn get_camera_config(&self, camera_id: &str) -> Result<Option<CameraConfigRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT camera_id, config, updated_at FROM camera_config WHERE camera_id = ?1")?;
        let mut rows = stmt.query(params![camera_id])?;
        if let Some(row) = rows.next()? {
            let camera_id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let updated_at: i64 = row.get(2)?;
            Ok(Some(CameraConfigRow {
                camera_id,
                config: serde_json::from_str(&raw)?,
                updated_at,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn list_camera_configs(&self) -> Result<Vec<CameraConfigRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT camera_id, config, updated_at FROM camera_config ORDER BY camera_id")?;
        let rows = stmt.query_map([], |row| {
            let camera_id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let updated_at: i64 = row.get(2)?;
            Ok((camera_id, raw, updated_at))
        })?;
        let mut out = vec![];
        for row in rows {
            let (camera_id, raw, updated_at) = row?;
            out.push(CameraConfigRow {
                camera_id,
                config: serde_json::from_str(&raw)?,
                updated_at,
            });
        }
        Ok(out)
    }

    pub fn delete_camera_config(&self, camera_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM camera_config WHERE camera_id = ?1", params![camera_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip_camera_config() {
        let store = ConfigStore::open_in_memory().unwrap();
        let cfg = json!({"id": "cam1", "type": "rtsp", "config": {"url": "rtsp://x"}});
        store.put_camera_config("cam1", &cfg, 1000).unwrap();

        let row = store.get_camera_config("cam1").unwrap().unwrap();
        assert_eq!(row.config, cfg);
        assert_eq!(row.updated_at, 1000);
    }

    #[test]
    fn update_overwrites_existing_row() {
        let store = ConfigStore::open_in_memory().unwrap();
        store.put_camera_config("cam1", &json!({"v": 1}), 1).unwrap();
        store.put_camera_config("cam1", &json!({"v": 2}), 2).unwrap();
        let row = store.get_camera_config("cam1").unwrap().unwrap();
        assert_eq!(row.config, json!({"v": 2}));
        assert_eq!(store.list_camera_configs().unwrap().len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = ConfigStore::open_in_memory().unwrap();
        store.delete_camera_config("missing").unwrap();
        store.put_camera_config("cam1", &json!({}), 1).unwrap();
        store.delete_camera_config("cam1").unwrap();
        store.delete_camera_config("cam1").unwrap();
        assert!(store.get_camera_config("cam1").unwrap().is_none());
    }

    #[test]
    fn generic_kv_roundtrip() {
        let store = ConfigStore::open_in_memory().unwrap();
        store.set_value("server_url", &"http://x".to_string(), 5).unwrap();
        let v: Option<String> = store.get_value("server_url").unwrap();
        assert_eq!(v.as_deref(), Some("http://x"));
    }
}
