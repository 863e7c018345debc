//! ByteTrack-style two-stage IoU tracker.
//!
//! Stage 1 matches high-confidence detections against active tracks;
//! stage 2 matches the remainder of low-confidence detections against
//! whatever tracks stage 1 left unmatched. Unmatched detections seed new
//! tracks; unmatched tracks accumulate a lost-frame counter and are
//! retired once it exceeds `track_buffer`.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use vision_frame::{BBox, Detection, Event, EventType, Frame, Point, Track};

use crate::{color_for_class, draw_dot, draw_rect, ChainStage, FrameMeta};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub high_thresh: f32,
    pub match_thresh: f32,
    pub track_buffer: u32,
    pub trajectory_max_length: usize,
    /// A centroid jump farther than this fraction of the frame width
    /// resets the trajectory instead of extending it.
    pub max_allowed_distance_ratio: f32,
    pub trajectory_cleanup_threshold: u32,
    pub draw_annotations: bool,
}

struct TrackState {
    track: Track,
    disappeared_frames: u32,
}

pub struct Tracker {
    config: TrackerConfig,
    next_id: u32,
    tracks: HashMap<u32, TrackState>,
    /// Assigned on first association, never overwritten.
    track_class_map: HashMap<u32, String>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            tracks: HashMap::new(),
            track_class_map: HashMap::new(),
        }
    }

    fn spawn_track(&mut self, detection: &Detection) -> u32 {
        let track_id = self.next_id;
        self.next_id += 1;
        self.track_class_map.insert(track_id, detection.class_name.clone());
        let mut trajectory = VecDeque::new();
        trajectory.push_back(centroid(&detection.bbox));
        self.tracks.insert(
            track_id,
            TrackState {
                track: Track {
                    track_id,
                    class_name: detection.class_name.clone(),
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                    age_frames: 1,
                    trajectory,
                },
                disappeared_frames: 0,
            },
        );
        track_id
    }

    fn update_track(&mut self, track_id: u32, detection: &Detection, frame_width: u32) {
        let state = self.tracks.get_mut(&track_id).expect("matched id exists");
        let new_point = centroid(&detection.bbox);
        let last_point = state.track.trajectory.back().copied();

        if let Some(last) = last_point {
            let jump_limit = self.config.max_allowed_distance_ratio * frame_width as f32;
            if last.distance(&new_point) > jump_limit {
                // Jump indicates ID reuse upstream; the current point
                // becomes the new trajectory head.
                state.track.trajectory.clear();
            }
        }

        state.track.trajectory.push_back(new_point);
        while state.track.trajectory.len() > self.config.trajectory_max_length {
            state.track.trajectory.pop_front();
        }

        state.track.bbox = detection.bbox;
        state.track.confidence = detection.confidence;
        // class_name stays fixed at first association, per track_class_map.
        state.track.class_name = self
            .track_class_map
            .get(&track_id)
            .cloned()
            .unwrap_or_else(|| detection.class_name.clone());
        state.track.age_frames += 1;
        state.disappeared_frames = 0;
    }

    fn annotate(&self, frame: &mut Frame) {
        for state in self.tracks.values() {
            let track = &state.track;
            let color = color_for_class(&track.class_name);
            draw_rect(
                frame,
                track.bbox.x as i32,
                track.bbox.y as i32,
                track.bbox.w as i32,
                track.bbox.h as i32,
                color,
                1,
            );
            let mut prev: Option<Point> = None;
            for point in &track.trajectory {
                if let Some(p) = prev {
                    draw_line(frame, p, *point, color);
                }
                prev = Some(*point);
            }
            let (cx, cy) = track.bbox.centroid();
            draw_dot(frame, cx as i32, cy as i32, 3, color);
        }
    }
}

fn centroid(bbox: &BBox) -> Point {
    let (x, y) = bbox.centroid();
    Point { x, y }
}

fn draw_line(frame: &mut Frame, a: Point, b: Point, color: crate::Rgb) {
    let steps = a.distance(&b).ceil().max(1.0) as i32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = a.x + (b.x - a.x) * t;
        let y = a.y + (b.y - a.y) * t;
        draw_rect(frame, x as i32, y as i32, 1, 1, color, 1);
    }
}

/// Greedy assignment: highest-IoU pair first, each side used at most once.
/// Returns (matched pairs as (detection_idx, track_id), unmatched
/// detection indices, unmatched track ids).
fn greedy_match(
    detections: &[(usize, &Detection)],
    candidate_tracks: &[(u32, BBox)],
    match_thresh: f32,
) -> (Vec<(usize, u32)>, Vec<usize>, Vec<u32>) {
    let mut scored: Vec<(f32, usize, u32)> = Vec::new();
    for &(det_idx, det) in detections {
        for &(track_id, track_bbox) in candidate_tracks {
            let iou = det.bbox.iou(&track_bbox);
            if iou > 0.0 {
                scored.push((iou, det_idx, track_id));
            }
        }
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

    let mut used_dets = std::collections::HashSet::new();
    let mut used_tracks = std::collections::HashSet::new();
    let mut matches = Vec::new();
    for (iou, det_idx, track_id) in scored {
        if iou < match_thresh {
            break;
        }
        if used_dets.contains(&det_idx) || used_tracks.contains(&track_id) {
            continue;
        }
        used_dets.insert(det_idx);
        used_tracks.insert(track_id);
        matches.push((det_idx, track_id));
    }

    let unmatched_dets = detections
        .iter()
        .map(|&(i, _)| i)
        .filter(|i| !used_dets.contains(i))
        .collect();
    let unmatched_tracks = candidate_tracks
        .iter()
        .map(|&(id, _)| id)
        .filter(|id| !used_tracks.contains(id))
        .collect();

    (matches, unmatched_dets, unmatched_tracks)
}

impl ChainStage for Tracker {
    fn process(&mut self, mut frame: Frame, meta: &mut FrameMeta) -> Frame {
        let frame_width = meta.frame_width;
        let detections = std::mem::take(&mut meta.detections);

        let high_conf: Vec<(usize, &Detection)> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| d.confidence >= self.config.high_thresh)
            .collect();
        let low_conf: Vec<(usize, &Detection)> = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| d.confidence < self.config.high_thresh)
            .collect();

        let active_tracks: Vec<(u32, BBox)> = self
            .tracks
            .iter()
            .map(|(&id, s)| (id, s.track.bbox))
            .collect();

        let (stage1_matches, stage1_unmatched_dets, stage1_unmatched_tracks) =
            greedy_match(&high_conf, &active_tracks, self.config.match_thresh);

        let remaining_tracks: Vec<(u32, BBox)> = stage1_unmatched_tracks
            .iter()
            .map(|&id| (id, self.tracks[&id].track.bbox))
            .collect();
        let (stage2_matches, _stage2_unmatched_low, stage2_unmatched_tracks) =
            greedy_match(&low_conf, &remaining_tracks, self.config.match_thresh);

        for (det_idx, track_id) in stage1_matches.iter().chain(stage2_matches.iter()) {
            self.update_track(*track_id, &detections[*det_idx], frame_width);
        }

        let matched_det_indices: std::collections::HashSet<usize> = stage1_matches
            .iter()
            .chain(stage2_matches.iter())
            .map(|(i, _)| *i)
            .collect();

        for (det_idx, det) in stage1_unmatched_dets
            .iter()
            .filter(|i| !matched_det_indices.contains(i))
            .map(|&i| (i, &detections[i]))
        {
            let _ = det_idx;
            self.spawn_track(det);
        }

        for &track_id in &stage2_unmatched_tracks {
            if let Some(state) = self.tracks.get_mut(&track_id) {
                state.disappeared_frames += 1;
            }
        }

        let cleanup_threshold = self.config.trajectory_cleanup_threshold;
        let track_buffer = self.config.track_buffer;
        self.tracks.retain(|&track_id, state| {
            let keep = state.disappeared_frames <= track_buffer
                && state.disappeared_frames <= cleanup_threshold;
            if !keep {
                self.track_class_map.remove(&track_id);
            }
            keep
        });

        meta.tracks = self
            .tracks
            .values()
            .map(|state| state.track.clone())
            .collect();

        // One tracking event per live track per frame — the forensic log
        // entry the aggregate `event_type_counts` row for `tracking` counts.
        for track in &meta.tracks {
            meta.events.push(Event::new(
                EventType::Tracking,
                meta.camera_id.clone(),
                track.track_id.to_string(),
                meta.timestamp_ms,
                serde_json::json!({
                    "track_id": track.track_id,
                    "class_name": track.class_name,
                    "confidence": track.confidence,
                    "bbox": {
                        "x": track.bbox.x, "y": track.bbox.y,
                        "w": track.bbox.w, "h": track.bbox.h,
                    },
                }),
            ));
        }

        if self.config.draw_annotations {
            self.annotate(&mut frame);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_frame::BBox;

    fn det(class: &str, conf: f32, x: f32) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence: conf,
            bbox: BBox { x, y: 0.0, w: 20.0, h: 20.0 },
        }
    }

    fn cfg() -> TrackerConfig {
        TrackerConfig {
            high_thresh: 0.6,
            match_thresh: 0.3,
            track_buffer: 5,
            trajectory_max_length: 10,
            max_allowed_distance_ratio: 0.5,
            trajectory_cleanup_threshold: 5,
            draw_annotations: false,
        }
    }

    #[test]
    fn stable_track_id_across_frames() {
        let mut tracker = Tracker::new(cfg());
        let frame = Frame::zeros(640, 480, 3, 0);

        let mut meta = FrameMeta::new("cam", &frame);
        meta.detections = vec![det("person", 0.9, 100.0)];
        tracker.process(frame.clone(), &mut meta);
        assert_eq!(meta.tracks.len(), 1);
        let id = meta.tracks[0].track_id;

        let mut meta2 = FrameMeta::new("cam", &frame);
        meta2.detections = vec![det("person", 0.9, 103.0)];
        tracker.process(frame.clone(), &mut meta2);
        assert_eq!(meta2.tracks.len(), 1);
        assert_eq!(meta2.tracks[0].track_id, id);
    }

    #[test]
    fn class_name_fixed_after_first_association() {
        let mut tracker = Tracker::new(cfg());
        let frame = Frame::zeros(640, 480, 3, 0);

        let mut meta = FrameMeta::new("cam", &frame);
        meta.detections = vec![det("person", 0.9, 100.0)];
        tracker.process(frame.clone(), &mut meta);
        let id = meta.tracks[0].track_id;

        // A later misclassification of the same spatial track must not
        // change the assigned class.
        let mut meta2 = FrameMeta::new("cam", &frame);
        meta2.detections = vec![det("bicycle", 0.9, 101.0)];
        tracker.process(frame.clone(), &mut meta2);
        let track = meta2.tracks.iter().find(|t| t.track_id == id).unwrap();
        assert_eq!(track.class_name, "person");
    }

    #[test]
    fn trajectory_caps_at_configured_length() {
        let mut tracker = Tracker::new(cfg());
        let frame = Frame::zeros(640, 480, 3, 0);

        let mut last_track_id = 0;
        for i in 0..20 {
            let mut meta = FrameMeta::new("cam", &frame);
            meta.detections = vec![det("person", 0.9, 100.0 + i as f32)];
            tracker.process(frame.clone(), &mut meta);
            last_track_id = meta.tracks[0].track_id;
            assert!(meta.tracks[0].trajectory.len() <= cfg().trajectory_max_length);
        }
        assert_ne!(last_track_id, 0);
    }

    #[test]
    fn unmatched_track_retired_after_track_buffer_frames() {
        let mut tracker = Tracker::new(cfg());
        let frame = Frame::zeros(640, 480, 3, 0);

        let mut meta = FrameMeta::new("cam", &frame);
        meta.detections = vec![det("person", 0.9, 100.0)];
        tracker.process(frame.clone(), &mut meta);
        assert_eq!(meta.tracks.len(), 1);

        for _ in 0..(cfg().track_buffer + 1) {
            let mut meta = FrameMeta::new("cam", &frame);
            meta.detections = vec![];
            tracker.process(frame.clone(), &mut meta);
        }
        assert!(tracker.tracks.is_empty());
    }
}
