//! Core data types shared by every stage of the pipeline: the decoded
//! [`Frame`], the ephemeral [`Detection`], the persistent [`Track`], the
//! [`Zone`] geometry primitives and the append-only [`Event`] record.
//!
//! None of these types know how they are produced or consumed; they are the
//! vocabulary the rest of the workspace shares.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub mod event;
pub mod zone;

pub use event::{Event, EventType};
pub use zone::{LineZone, PolygonZone, Point};

/// A decoded image plus the metadata needed to route and timestamp it.
///
/// Owned by the scheduler for the duration of one processing iteration; a
/// [`Frame`] is never shared behind a reference across iterations. Whoever
/// needs to retain pixels across frames (the snapshot buffer, a zone's
/// membership test) copies out the fields it needs.
#[derive(Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// 1 for greyscale, 3 for RGB/BGR, 4 for RGBA.
    pub channels: u8,
    /// Contiguous, row-major pixel buffer of length `width * height * channels`.
    pub data: Vec<u8>,
    /// Monotonic capture timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>, timestamp_ms: i64) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * channels as usize);
        Self {
            width,
            height,
            channels,
            data,
            timestamp_ms,
        }
    }

    pub fn zeros(width: u32, height: u32, channels: u8, timestamp_ms: i64) -> Self {
        let data = vec![0u8; width as usize * height as usize * channels as usize];
        Self::new(width, height, channels, data, timestamp_ms)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame {{ {}x{}x{} @ {} }}",
            self.width, self.height, self.channels, self.timestamp_ms
        )
    }
}

/// A pixel-space bounding box: top-left corner plus width and height.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn centroid(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Bottom-center point, the default anchor used by zone geometry.
    pub fn bottom_center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h)
    }

    pub fn area(&self) -> f32 {
        (self.w.max(0.0)) * (self.h.max(0.0))
    }

    /// Intersection-over-union of two boxes.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ax2 = self.x + self.w;
        let ay2 = self.y + self.h;
        let bx2 = other.x + other.w;
        let by2 = other.y + other.h;

        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = ax2.min(bx2);
        let iy2 = ay2.min(by2);

        let iw = (ix2 - ix1).max(0.0);
        let ih = (iy2 - iy1).max(0.0);
        let inter = iw * ih;
        if inter <= 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One object localization produced by the detector stage. Ephemeral: it
/// exists for exactly one frame and is consumed by the tracker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

/// A persistent identity across frames, produced and owned by the tracker.
///
/// Invariants (see crate `vision-tracking` for the code that upholds them):
/// `track_id` is stable while the object stays associated; `class_name` is
/// fixed at first association; `trajectory` never exceeds its configured
/// cap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub track_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub age_frames: u32,
    pub trajectory: VecDeque<Point>,
}

impl Track {
    pub fn centroid(&self) -> Point {
        let (x, y) = self.bbox.centroid();
        Point { x, y }
    }

    pub fn anchor(&self) -> Point {
        let (x, y) = self.bbox.bottom_center();
        Point { x, y }
    }
}
