//! Per-camera bookkeeping: the components attached while stopped, and the
//! running worker once started. Nothing here is exposed outside the crate
//! directly — [`crate::ControlPlane`] is the only public surface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vision_registry::StageKind;
use vision_scheduler::{CameraWorker, Sinks};
use vision_sink_video::VideoSink;
use vision_source::Source;
use vision_telemetry::TelemetryStore;
use vision_tracking::ProcessorChain;

#[derive(Clone, Debug, Default, Serialize)]
pub struct ComponentCounts {
    pub sources: u32,
    pub processors: u32,
    pub sinks: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct CameraSummary {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub component_counts: ComponentCounts,
}

/// A `(type_tag, config)` pair, persisted verbatim so a reload can rebuild
/// the same component through the same registry call that built it the
/// first time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentDef {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub config: serde_json::Value,
}

/// What gets written to `camera_config`. Definitions, not live objects —
/// a reload replays each definition through the same attach path used the
/// first time, so persisted config and attached components stay in lockstep
/// by construction rather than by a separate sync step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedCamera {
    pub name: String,
    pub source: Option<ComponentDef>,
    #[serde(default)]
    pub processors: Vec<ComponentDef>,
    #[serde(default)]
    pub sinks: Vec<ComponentDef>,
}

pub(crate) struct CameraEntry {
    pub name: String,
    pub source: Option<Source>,
    pub source_def: Option<ComponentDef>,
    pub chain: ProcessorChain,
    pub attached_stages: Vec<StageKind>,
    pub processor_defs: Vec<ComponentDef>,
    pub video_sink: Option<VideoSink>,
    pub telemetry: Option<Arc<TelemetryStore>>,
    pub sink_defs: Vec<ComponentDef>,
    pub worker: Option<CameraWorker>,
}

impl CameraEntry {
    pub fn new(name: String) -> Self {
        Self {
            name,
            source: None,
            source_def: None,
            chain: ProcessorChain::new(),
            attached_stages: Vec::new(),
            processor_defs: Vec::new(),
            video_sink: None,
            telemetry: None,
            sink_defs: Vec::new(),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Counts are derived from the persisted definitions, not the live
    /// handles — a running camera's `source`/`video_sink` fields are
    /// temporarily moved into the worker, but the component is still
    /// attached.
    pub fn component_counts(&self) -> ComponentCounts {
        ComponentCounts {
            sources: self.source_def.is_some() as u32,
            processors: self.processor_defs.len() as u32,
            sinks: self.sink_defs.len() as u32,
        }
    }

    pub fn summary(&self, id: &str) -> CameraSummary {
        CameraSummary {
            id: id.to_string(),
            name: self.name.clone(),
            running: self.is_running(),
            component_counts: self.component_counts(),
        }
    }

    pub fn persisted(&self) -> PersistedCamera {
        PersistedCamera {
            name: self.name.clone(),
            source: self.source_def.clone(),
            processors: self.processor_defs.clone(),
            sinks: self.sink_defs.clone(),
        }
    }

    /// Moves the attached video sink into a fresh [`Sinks`] for a worker
    /// about to start; the sink is a scoped, single-use container writer,
    /// so a subsequent restart requires attaching a new one. The
    /// telemetry `Arc` is cloned rather than moved, so analytics reads
    /// keep working against `self.telemetry` while the camera runs.
    pub fn sinks_for_start(&mut self) -> Sinks {
        Sinks {
            video: self.video_sink.take(),
            telemetry: self.telemetry.clone(),
        }
    }
}
