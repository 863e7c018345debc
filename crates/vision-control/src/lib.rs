//! Control plane: the semantic operations behind the HTTP control API
//! (`list_cameras`, `create_camera`, `attach_source`, `get_frame`, ...).
//! This crate stops at the operation boundary — serving them over HTTP,
//! authentication and request parsing are an external collaborator's job.
//!
//! A camera's lifecycle is: created stopped with no components, components
//! attached one at a time through the registries in [`vision_registry`],
//! then started (spawns a [`vision_scheduler::CameraWorker`]) or stopped
//! (joins it back). The file-video sink is a scoped, single-use writer —
//! stopping a camera finishes it, so a restart needs a fresh `attach_sink`.

mod camera;
mod jpeg;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

use vision_config::{ConfigStore, Entitlements, GlobalConfigHandle};
use vision_registry::{InferenceRegistry, ProcessorRegistry, SinkRegistry, SourceRegistry, SourceTypeTag};
use vision_scheduler::{CameraWorker, Snapshot};
use vision_sink_video::Encoder;
use vision_source::Decoder;
use vision_telemetry::{Analytics, DwellTimeRow, TelemetryStore, TimeSeriesRow, WriteFlags};

pub use camera::{CameraSummary, ComponentCounts};

#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("component not permitted: {0}")]
    ComponentNotPermitted(String),
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ControlError>;

impl From<vision_registry::RegistryError> for ControlError {
    fn from(e: vision_registry::RegistryError) -> Self {
        use vision_registry::RegistryError::*;
        match e {
            UnknownType(msg) => ControlError::ConfigInvalid(format!("unknown component type: {msg}")),
            Entitlement(msg) => ControlError::ComponentNotPermitted(msg),
            Dependency(msg) => ControlError::ConfigInvalid(msg),
            Config(msg) => ControlError::ConfigInvalid(msg),
        }
    }
}

impl From<vision_config::StoreError> for ControlError {
    fn from(e: vision_config::StoreError) -> Self {
        ControlError::Internal(e.to_string())
    }
}

impl From<vision_telemetry::TelemetryError> for ControlError {
    fn from(e: vision_telemetry::TelemetryError) -> Self {
        ControlError::Internal(e.to_string())
    }
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

/// Builds the decoder for a given source type tag. Supplied by the caller
/// at startup — the registry only validates; it cannot manufacture a real
/// GStreamer/v4l2/file decoder itself.
pub type DecoderFactory = Arc<dyn Fn(SourceTypeTag) -> Box<dyn Decoder> + Send + Sync>;

/// Builds a fresh encoder for a new file-video sink attach.
pub type EncoderFactory = Arc<dyn Fn() -> Box<dyn Encoder> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CameraStatus {
    Ok,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind")]
pub enum DeleteOutcome {
    Sync { status: CameraStatus },
    Async { task_id: String },
}

#[derive(Clone, Debug, Serialize)]
pub enum TaskStatus {
    Running,
    Completed,
    Failed(String),
}

/// The full set of semantic operations behind the control-plane HTTP API.
/// One instance serves every camera; per-camera state lives behind the
/// `cameras` map, guarded by a single mutex — attach/start/stop are
/// infrequent relative to the per-frame work happening in worker threads,
/// so a coarse lock here adds no meaningful contention.
pub struct ControlPlane {
    config_store: Arc<Mutex<ConfigStore>>,
    global_config: GlobalConfigHandle,
    entitlements: Entitlements,
    telemetry_dir: PathBuf,
    decoder_factory: DecoderFactory,
    encoder_factory: EncoderFactory,
    cameras: Mutex<HashMap<String, camera::CameraEntry>>,
    tasks: Mutex<HashMap<String, Arc<Mutex<TaskStatus>>>>,
}

impl ControlPlane {
    pub fn new(
        config_store: ConfigStore,
        global_config: GlobalConfigHandle,
        entitlements: Entitlements,
        telemetry_dir: PathBuf,
        decoder_factory: DecoderFactory,
        encoder_factory: EncoderFactory,
    ) -> Self {
        Self {
            config_store: Arc::new(Mutex::new(config_store)),
            global_config,
            entitlements,
            telemetry_dir,
            decoder_factory,
            encoder_factory,
            cameras: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn list_cameras(&self) -> Vec<CameraSummary> {
        let cameras = self.cameras.lock();
        let mut out: Vec<_> = cameras.iter().map(|(id, entry)| entry.summary(id)).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Rebuilds every camera from its persisted definition: name, then
    /// source, then processors in attach order, then sinks. Replaying the
    /// same attach calls used the first time is what keeps a reloaded
    /// camera's attached components matching its persisted config, rather
    /// than requiring a hand-kept sync between the two.
    ///
    /// Reloaded cameras always come back stopped; a crashed or restarted
    /// process should not silently resume pulling from hardware sources.
    pub fn reload(&self) -> Result<()> {
        let rows = self.config_store.lock().list_camera_configs()?;
        for row in rows {
            let persisted: camera::PersistedCamera = serde_json::from_value(row.config)
                .map_err(|e| ControlError::Internal(format!("corrupt camera config for '{}': {e}", row.camera_id)))?;

            self.cameras
                .lock()
                .insert(row.camera_id.clone(), camera::CameraEntry::new(persisted.name));

            if let Some(src) = &persisted.source {
                self.attach_source(&row.camera_id, &src.type_tag, src.config.clone())?;
            }
            for proc in &persisted.processors {
                self.attach_processor(&row.camera_id, &proc.type_tag, proc.config.clone())?;
            }
            for sink in &persisted.sinks {
                self.attach_sink(&row.camera_id, &sink.type_tag, sink.config.clone())?;
            }
        }
        Ok(())
    }

    pub fn create_camera(&self, id: Option<String>, name: Option<String>) -> Result<CameraSummary> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut cameras = self.cameras.lock();
        if cameras.contains_key(&id) {
            return Err(ControlError::ConfigInvalid(format!("camera '{id}' already exists")));
        }
        let name = name.unwrap_or_else(|| id.clone());
        let entry = camera::CameraEntry::new(name);
        let summary = entry.summary(&id);
        let persisted = entry.persisted();

        self.config_store.lock().put_camera_config(&id, &serde_json::to_value(&persisted).unwrap(), now_ms())?;
        cameras.insert(id, entry);
        Ok(summary)
    }

    pub fn update_camera(&self, id: &str, name: Option<String>, running: Option<bool>) -> Result<CameraStatus> {
        let mut cameras = self.cameras.lock();
        let entry = cameras
            .get_mut(id)
            .ok_or_else(|| ControlError::NotFound(format!("camera '{id}' not found")))?;

        if let Some(name) = name {
            entry.name = name;
        }

        if let Some(running) = running {
            if running && !entry.is_running() {
                let source = entry
                    .source
                    .take()
                    .ok_or_else(|| ControlError::SourceUnavailable(format!("camera '{id}' has no source attached")))?;
                let chain = std::mem::take(&mut entry.chain);
                let sinks = entry.sinks_for_start();
                entry.worker = Some(CameraWorker::start(id, source, chain, sinks));
            } else if !running {
                if let Some(mut worker) = entry.worker.take() {
                    if let Ok((source, chain, _sinks)) = worker.stop() {
                        entry.source = Some(source);
                        entry.chain = chain;
                    }
                }
            }
        }

        let persisted = entry.persisted();
        self.config_store.lock().put_camera_config(id, &serde_json::to_value(&persisted).unwrap(), now_ms())?;
        Ok(CameraStatus::Ok)
    }

    pub fn delete_camera(&self, id: &str, async_delete: bool) -> Result<DeleteOutcome> {
        let mut cameras = self.cameras.lock();
        let mut entry = cameras
            .remove(id)
            .ok_or_else(|| ControlError::NotFound(format!("camera '{id}' not found")))?;
        drop(cameras);

        if let Some(mut worker) = entry.worker.take() {
            let _ = worker.stop();
        }

        let config_store = self.config_store.clone();
        let telemetry_path = self.telemetry_dir.join(format!("{id}.sqlite3"));
        let id_owned = id.to_string();

        let delete_data = move || -> Result<()> {
            config_store.lock().delete_camera_config(&id_owned)?;
            if telemetry_path.exists() {
                std::fs::remove_file(&telemetry_path).map_err(|e| ControlError::Internal(e.to_string()))?;
            }
            Ok(())
        };

        if async_delete {
            let task_id = uuid::Uuid::new_v4().to_string();
            let status = Arc::new(Mutex::new(TaskStatus::Running));
            self.tasks.lock().insert(task_id.clone(), status.clone());
            std::thread::spawn(move || {
                let result = delete_data();
                *status.lock() = match result {
                    Ok(()) => TaskStatus::Completed,
                    Err(e) => TaskStatus::Failed(e.to_string()),
                };
            });
            Ok(DeleteOutcome::Async { task_id })
        } else {
            delete_data()?;
            Ok(DeleteOutcome::Sync { status: CameraStatus::Ok })
        }
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.lock().get(task_id).map(|s| s.lock().clone())
    }

    pub fn attach_source(&self, camera_id: &str, type_tag: &str, config: serde_json::Value) -> Result<()> {
        let mut cameras = self.cameras.lock();
        let entry = self.entry_mut(&mut cameras, camera_id)?;
        self.reject_if_running(entry, camera_id)?;

        let tag = SourceTypeTag::from_tag(type_tag)
            .ok_or_else(|| ControlError::ConfigInvalid(format!("unknown source type '{type_tag}'")))?;
        let decoder = (self.decoder_factory)(tag);
        let source = SourceRegistry::build(type_tag, config.clone(), &self.entitlements, decoder)?;
        entry.source = Some(source);
        entry.source_def = Some(camera::ComponentDef { type_tag: type_tag.to_string(), config });
        self.persist(camera_id, entry)?;
        Ok(())
    }

    pub fn attach_processor(&self, camera_id: &str, type_tag: &str, config: serde_json::Value) -> Result<()> {
        let mut cameras = self.cameras.lock();
        let entry = self.entry_mut(&mut cameras, camera_id)?;
        self.reject_if_running(entry, camera_id)?;

        let global_config = self.global_config.current();
        let stage = ProcessorRegistry::build(type_tag, config.clone(), &global_config, &self.entitlements, &entry.attached_stages)?;
        let kind = vision_registry::StageKind::from_tag(stage.kind())
            .expect("registry only builds stages for its own recognized tags");
        entry.chain.push(stage);
        entry.attached_stages.push(kind);
        entry.processor_defs.push(camera::ComponentDef { type_tag: type_tag.to_string(), config });
        self.persist(camera_id, entry)?;
        Ok(())
    }

    pub fn attach_sink(&self, camera_id: &str, type_tag: &str, config: serde_json::Value) -> Result<()> {
        let mut cameras = self.cameras.lock();
        let entry = self.entry_mut(&mut cameras, camera_id)?;
        self.reject_if_running(entry, camera_id)?;

        match type_tag {
            "file_video" => {
                let encoder = (self.encoder_factory)();
                let sink = SinkRegistry::build_file_video(type_tag, config.clone(), &self.entitlements, encoder)?;
                entry.video_sink = Some(sink);
            }
            "telemetry" => {
                std::fs::create_dir_all(&self.telemetry_dir).map_err(|e| ControlError::Internal(e.to_string()))?;
                let path = self.telemetry_dir.join(format!("{camera_id}.sqlite3"));
                let store = TelemetryStore::open(path, camera_id, WriteFlags::default())?;
                entry.telemetry = Some(Arc::new(store));
            }
            other => return Err(ControlError::ConfigInvalid(format!("unknown sink type '{other}'"))),
        }
        entry.sink_defs.push(camera::ComponentDef { type_tag: type_tag.to_string(), config });
        self.persist(camera_id, entry)?;
        Ok(())
    }

    pub fn get_frame(&self, camera_id: &str, quality: u8) -> Result<Vec<u8>> {
        let snapshot = self.snapshot(camera_id)?;
        jpeg::encode_jpeg(&snapshot.annotated, quality)
    }

    pub fn get_raw_frame(&self, camera_id: &str, quality: u8) -> Result<Vec<u8>> {
        let snapshot = self.snapshot(camera_id)?;
        jpeg::encode_jpeg(&snapshot.raw, quality)
    }

    pub fn analytics(&self, camera_id: &str) -> Result<Analytics> {
        Ok(self.telemetry_handle(camera_id)?.get_analytics()?)
    }

    /// `async_query` does not change the result shape: the aggregate read
    /// path is already O(result size), so there is no separate background
    /// path worth building. The flag is accepted only so callers keeping
    /// parity with the external API surface have somewhere to put it.
    pub fn time_series(&self, camera_id: &str, start_ms: Option<i64>, end_ms: Option<i64>, _async_query: bool) -> Result<Vec<TimeSeriesRow>> {
        let store = self.telemetry_handle(camera_id)?;
        Ok(store.get_time_series(start_ms.unwrap_or(0), end_ms.unwrap_or_else(now_ms))?)
    }

    pub fn dwell_time(&self, camera_id: &str, start_ms: Option<i64>, end_ms: Option<i64>) -> Result<Vec<DwellTimeRow>> {
        let store = self.telemetry_handle(camera_id)?;
        Ok(store.get_dwell_times(start_ms.unwrap_or(0), end_ms.unwrap_or_else(now_ms))?)
    }

    fn persist(&self, camera_id: &str, entry: &camera::CameraEntry) -> Result<()> {
        let persisted = serde_json::to_value(entry.persisted()).unwrap();
        self.config_store.lock().put_camera_config(camera_id, &persisted, now_ms())?;
        Ok(())
    }

    fn entry_mut<'a>(
        &self,
        cameras: &'a mut HashMap<String, camera::CameraEntry>,
        camera_id: &str,
    ) -> Result<&'a mut camera::CameraEntry> {
        cameras
            .get_mut(camera_id)
            .ok_or_else(|| ControlError::NotFound(format!("camera '{camera_id}' not found")))
    }

    fn reject_if_running(&self, entry: &camera::CameraEntry, camera_id: &str) -> Result<()> {
        if entry.is_running() {
            Err(ControlError::ConfigInvalid(format!(
                "camera '{camera_id}' must be stopped before attaching components"
            )))
        } else {
            Ok(())
        }
    }

    fn snapshot(&self, camera_id: &str) -> Result<Snapshot> {
        let cameras = self.cameras.lock();
        let entry = cameras
            .get(camera_id)
            .ok_or_else(|| ControlError::NotFound(format!("camera '{camera_id}' not found")))?;
        let worker = entry
            .worker
            .as_ref()
            .ok_or_else(|| ControlError::ConfigInvalid(format!("camera '{camera_id}' is not running")))?;
        worker
            .snapshot()
            .ok_or_else(|| ControlError::NotFound(format!("camera '{camera_id}' has not produced a frame yet")))
    }

    fn telemetry_handle(&self, camera_id: &str) -> Result<Arc<TelemetryStore>> {
        let cameras = self.cameras.lock();
        let entry = cameras
            .get(camera_id)
            .ok_or_else(|| ControlError::NotFound(format!("camera '{camera_id}' not found")))?;
        entry
            .telemetry
            .clone()
            .ok_or_else(|| ControlError::ConfigInvalid(format!("camera '{camera_id}' has no telemetry sink attached")))
    }
}

/// Validates an inference transport against entitlement without connecting
/// — used by a config-validation endpoint before a processor referencing
/// that transport is actually attached.
pub fn validate_inference_transport(
    transport: vision_inference::Transport,
    global_config: &vision_config::GlobalConfig,
    entitlements: &Entitlements,
) -> Result<()> {
    InferenceRegistry::build(transport, global_config, entitlements)
        .map(|_client| ())
        .map_err(ControlError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_source::SyntheticDecoder;

    fn plane() -> ControlPlane {
        let config_store = ConfigStore::open_in_memory().unwrap();
        let global_config = GlobalConfigHandle::new(vision_config::GlobalConfig {
            inference_server_url: "http://localhost:8000".into(),
            use_shared_memory: false,
            triton_server_url: None,
        });
        let dir = std::env::temp_dir().join(format!("vision-control-test-{}", uuid::Uuid::new_v4()));
        ControlPlane::new(
            config_store,
            global_config,
            Entitlements::new(vision_config::LicenseTier::Enterprise, vec!["age_gender".into()]),
            dir,
            Arc::new(|_tag| Box::new(SyntheticDecoder::new(16, 12, 3)) as Box<dyn Decoder>),
            Arc::new(|| Box::new(vision_sink_video::SyntheticEncoder::new()) as Box<dyn Encoder>),
        )
    }

    #[test]
    fn create_list_and_delete_camera() {
        let plane = plane();
        let summary = plane.create_camera(Some("cam1".into()), Some("Lobby".into())).unwrap();
        assert_eq!(summary.id, "cam1");
        assert!(!summary.running);
        assert_eq!(plane.list_cameras().len(), 1);

        let outcome = plane.delete_camera("cam1", false).unwrap();
        assert!(matches!(outcome, DeleteOutcome::Sync { .. }));
        assert_eq!(plane.list_cameras().len(), 0);
    }

    #[test]
    fn start_requires_a_source() {
        let plane = plane();
        plane.create_camera(Some("cam1".into()), None).unwrap();
        let err = plane.update_camera("cam1", None, Some(true)).unwrap_err();
        assert!(matches!(err, ControlError::SourceUnavailable(_)));
    }

    #[test]
    fn attach_source_then_start_produces_frames() {
        let plane = plane();
        plane.create_camera(Some("cam1".into()), None).unwrap();
        plane
            .attach_source(
                "cam1",
                "file",
                serde_json::json!({
                    "url": "/tmp/clip.mp4", "width": 16, "height": 12, "target_fps": 30.0,
                    "format": "Raw", "hw_accel": "None", "transport": "Tcp",
                    "latency_ms": 0, "max_consecutive_failures": 3
                }),
            )
            .unwrap();
        plane.update_camera("cam1", None, Some(true)).unwrap();

        let mut jpeg = None;
        for _ in 0..50 {
            if let Ok(bytes) = plane.get_frame("cam1", 80) {
                jpeg = Some(bytes);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(jpeg.unwrap().starts_with(&[0xFF, 0xD8]));
        plane.update_camera("cam1", None, Some(false)).unwrap();
    }

    #[test]
    fn attaching_components_while_running_is_rejected() {
        let plane = plane();
        plane.create_camera(Some("cam1".into()), None).unwrap();
        plane
            .attach_source(
                "cam1",
                "file",
                serde_json::json!({
                    "url": "/tmp/clip.mp4", "width": 16, "height": 12, "target_fps": 30.0,
                    "format": "Raw", "hw_accel": "None", "transport": "Tcp",
                    "latency_ms": 0, "max_consecutive_failures": 3
                }),
            )
            .unwrap();
        plane.update_camera("cam1", None, Some(true)).unwrap();
        let err = plane
            .attach_processor("cam1", "detector", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, ControlError::ConfigInvalid(_)));
        plane.update_camera("cam1", None, Some(false)).unwrap();
    }

    #[test]
    fn async_delete_reports_completion() {
        let plane = plane();
        plane.create_camera(Some("cam1".into()), None).unwrap();
        let outcome = plane.delete_camera("cam1", true).unwrap();
        let DeleteOutcome::Async { task_id } = outcome else {
            panic!("expected async outcome");
        };
        let mut status = None;
        for _ in 0..50 {
            match plane.task_status(&task_id) {
                Some(TaskStatus::Running) | None => std::thread::sleep(std::time::Duration::from_millis(10)),
                other => {
                    status = other;
                    break;
                }
            }
        }
        assert!(matches!(status, Some(TaskStatus::Completed)));
    }
}
