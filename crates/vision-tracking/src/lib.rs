//! Processor chain (component C3): a fixed-order pipeline of optional
//! stages — Detector, Tracker, LineZones, PolygonZones, Classification,
//! AgeGender — each receiving the annotated frame produced by the one
//! before it.
//!
//! Per-frame failure never aborts the chain: a stage that cannot produce a
//! result (inference server down, no frame to classify) returns an empty
//! result and logs. The only thing that can fail a *camera* is resource
//! acquisition, handled one level up in the registry/scheduler.

use serde::{Deserialize, Serialize};
use vision_frame::{Detection, Event, Frame, Track};

pub mod classify;
pub mod detector;
pub mod tracker;
pub mod zones;

pub use classify::{ClassifierConfig, ClassifierStage};
pub use detector::{Detector, DetectorConfig};
pub use tracker::{Tracker, TrackerConfig};
pub use zones::{LineZoneStage, PolygonZoneStage};

#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("inference client unavailable: {0}")]
    Unavailable(String),
}

/// Per-frame scratch state threaded through the chain. Each stage reads
/// what the previous stages left here and appends its own output.
pub struct FrameMeta {
    pub camera_id: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub timestamp_ms: i64,
    pub detections: Vec<Detection>,
    pub tracks: Vec<Track>,
    pub events: Vec<Event>,
}

impl FrameMeta {
    pub fn new(camera_id: impl Into<String>, frame: &Frame) -> Self {
        Self {
            camera_id: camera_id.into(),
            frame_width: frame.width,
            frame_height: frame.height,
            timestamp_ms: frame.timestamp_ms,
            detections: Vec::new(),
            tracks: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// The narrow per-category contract every stage implements. `process`
/// never returns an error: a stage that cannot do its job leaves `meta`
/// untouched (empty detections/tracks/events) and returns the frame
/// unannotated.
pub trait ChainStage {
    fn initialize(&mut self) {}
    fn process(&mut self, frame: Frame, meta: &mut FrameMeta) -> Frame;
    fn stop(&mut self) {}
}

/// A tagged variant per stage category, in the fixed pipeline order. Bounded,
/// explicit polymorphism instead of a trait-object inheritance tree.
pub enum Stage {
    Detector(Detector),
    Tracker(Tracker),
    LineZones(LineZoneStage),
    PolygonZones(PolygonZoneStage),
    Classification(ClassifierStage),
    AgeGender(ClassifierStage),
}

impl Stage {
    /// The processor-registry type tag for this variant, e.g. `"tracker"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Detector(_) => "detector",
            Stage::Tracker(_) => "tracker",
            Stage::LineZones(_) => "line_zones",
            Stage::PolygonZones(_) => "polygon_zones",
            Stage::Classification(_) => "classification",
            Stage::AgeGender(_) => "age_gender",
        }
    }

    fn initialize(&mut self) {
        match self {
            Stage::Detector(s) => s.initialize(),
            Stage::Tracker(s) => s.initialize(),
            Stage::LineZones(s) => s.initialize(),
            Stage::PolygonZones(s) => s.initialize(),
            Stage::Classification(s) => s.initialize(),
            Stage::AgeGender(s) => s.initialize(),
        }
    }

    fn process(&mut self, frame: Frame, meta: &mut FrameMeta) -> Frame {
        match self {
            Stage::Detector(s) => s.process(frame, meta),
            Stage::Tracker(s) => s.process(frame, meta),
            Stage::LineZones(s) => s.process(frame, meta),
            Stage::PolygonZones(s) => s.process(frame, meta),
            Stage::Classification(s) => s.process(frame, meta),
            Stage::AgeGender(s) => s.process(frame, meta),
        }
    }

    fn stop(&mut self) {
        match self {
            Stage::Detector(s) => s.stop(),
            Stage::Tracker(s) => s.stop(),
            Stage::LineZones(s) => s.stop(),
            Stage::PolygonZones(s) => s.stop(),
            Stage::Classification(s) => s.stop(),
            Stage::AgeGender(s) => s.stop(),
        }
    }
}

/// The ordered, optional-stage pipeline. Stages present are whatever the
/// registry attached; the order among present stages is always
/// Detector -> Tracker -> LineZones -> PolygonZones -> Classification ->
/// AgeGender regardless of attach order, enforced by [`ProcessorChain::push`].
#[derive(Default)]
pub struct ProcessorChain {
    stages: Vec<Stage>,
}

fn rank(stage: &Stage) -> u8 {
    match stage {
        Stage::Detector(_) => 0,
        Stage::Tracker(_) => 1,
        Stage::LineZones(_) => 2,
        Stage::PolygonZones(_) => 3,
        Stage::Classification(_) => 4,
        Stage::AgeGender(_) => 5,
    }
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
        self.stages.sort_by_key(rank);
    }

    pub fn initialize_all(&mut self) {
        for stage in &mut self.stages {
            log::debug!("initializing stage {}", stage.kind());
            stage.initialize();
        }
    }

    /// Reverse dependency order: sinks are stopped by the caller before this
    /// is invoked; here we stop processors in reverse pipeline order.
    pub fn stop_all(&mut self) {
        for stage in self.stages.iter_mut().rev() {
            stage.stop();
        }
    }

    pub fn process(&mut self, frame: Frame, camera_id: &str) -> (Frame, FrameMeta) {
        let mut meta = FrameMeta::new(camera_id, &frame);
        let mut annotated = frame;
        for stage in &mut self.stages {
            annotated = stage.process(annotated, &mut meta);
        }
        (annotated, meta)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// A small fixed palette, cycled by class-name hash, so the same class
/// always draws in the same color within one detector instance.
pub(crate) fn color_for_class(class_name: &str) -> Rgb {
    const PALETTE: [Rgb; 8] = [
        Rgb(230, 25, 75),
        Rgb(60, 180, 75),
        Rgb(255, 225, 25),
        Rgb(0, 130, 200),
        Rgb(245, 130, 48),
        Rgb(145, 30, 180),
        Rgb(70, 240, 240),
        Rgb(240, 50, 230),
    ];
    let hash = class_name.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    PALETTE[hash as usize % PALETTE.len()]
}

/// Draws a rectangle outline directly into the frame's raw buffer. Shared by
/// detector-box and track-marker visualization.
pub(crate) fn draw_rect(frame: &mut Frame, x: i32, y: i32, w: i32, h: i32, color: Rgb, thickness: i32) {
    let channels = frame.channels as i32;
    let width = frame.width as i32;
    let height = frame.height as i32;
    let mut put = |px: i32, py: i32| {
        if px < 0 || py < 0 || px >= width || py >= height {
            return;
        }
        let idx = ((py * width + px) * channels) as usize;
        if idx + 2 < frame.data.len() {
            frame.data[idx] = color.0;
            frame.data[idx + 1] = color.1;
            frame.data[idx + 2] = color.2;
        }
    };
    for t in 0..thickness {
        for px in x..x + w {
            put(px, y + t);
            put(px, y + h - t);
        }
        for py in y..y + h {
            put(x + t, py);
            put(x + w - t, py);
        }
    }
}

pub(crate) fn draw_dot(frame: &mut Frame, cx: i32, cy: i32, radius: i32, color: Rgb) {
    draw_rect(frame, cx - radius, cy - radius, radius * 2, radius * 2, color, radius.max(1));
}
