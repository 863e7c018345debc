//! LineZoneManager / PolygonZoneManager stages: feed each active track's
//! anchor point through the configured zones and emit a crossing event per
//! sign/membership transition.

use vision_frame::{Event, EventType, Frame, LineZone, PolygonZone};

use crate::{ChainStage, FrameMeta};

pub struct LineZoneStage {
    zones: Vec<LineZone>,
}

impl LineZoneStage {
    pub fn new(zones: Vec<LineZone>) -> Self {
        Self { zones }
    }
}

impl ChainStage for LineZoneStage {
    fn process(&mut self, frame: Frame, meta: &mut FrameMeta) -> Frame {
        let seen: std::collections::HashSet<u32> = meta.tracks.iter().map(|t| t.track_id).collect();
        for zone in &mut self.zones {
            for track in &meta.tracks {
                let anchor = track.anchor();
                if let Some(direction) = zone.update(track.track_id, anchor, meta.frame_width, meta.frame_height) {
                    meta.events.push(Event::new(
                        EventType::Crossing,
                        meta.camera_id.clone(),
                        track.track_id.to_string(),
                        meta.timestamp_ms,
                        serde_json::json!({
                            "track_id": track.track_id,
                            "zone_id": zone.id,
                            "direction": direction,
                            "class_name": track.class_name,
                            "crossing_point": {"x": anchor.x, "y": anchor.y},
                        }),
                    ));
                }
            }
        }
        // Tracks the tracker retired this frame no longer appear in
        // meta.tracks; drop their per-zone side bookkeeping so a future
        // track_id reuse starts from a clean baseline.
        for zone in &mut self.zones {
            let stale: Vec<u32> = zone
                .tracked_ids()
                .into_iter()
                .filter(|id| !seen.contains(id))
                .collect();
            for id in stale {
                zone.forget(id);
            }
        }
        frame
    }
}

pub struct PolygonZoneStage {
    zones: Vec<PolygonZone>,
}

impl PolygonZoneStage {
    pub fn new(zones: Vec<PolygonZone>) -> Self {
        Self { zones }
    }
}

impl ChainStage for PolygonZoneStage {
    fn process(&mut self, frame: Frame, meta: &mut FrameMeta) -> Frame {
        let seen: std::collections::HashSet<u32> = meta.tracks.iter().map(|t| t.track_id).collect();
        for zone in &mut self.zones {
            for track in &meta.tracks {
                let anchor = track.anchor();
                if let Some(direction) = zone.update(track.track_id, anchor, meta.frame_width, meta.frame_height) {
                    meta.events.push(Event::new(
                        EventType::Crossing,
                        meta.camera_id.clone(),
                        track.track_id.to_string(),
                        meta.timestamp_ms,
                        serde_json::json!({
                            "track_id": track.track_id,
                            "zone_id": zone.id,
                            "direction": direction,
                            "class_name": track.class_name,
                        }),
                    ));
                }
            }
            let stale: Vec<u32> = zone
                .inside
                .iter()
                .copied()
                .filter(|id| !seen.contains(id))
                .collect();
            for id in stale {
                zone.forget(id);
            }
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_frame::{BBox, Point, Track};

    #[test]
    fn line_crossing_emits_exactly_one_in_event() {
        let line = LineZone::new("gate", Point { x: 0.5, y: 0.0 }, Point { x: 0.5, y: 1.0 });
        let mut stage = LineZoneStage::new(vec![line]);
        let frame = Frame::zeros(100, 100, 3, 0);

        let mut total_crossings = 0;
        for step in 0..50 {
            let x = 0.1 + (0.9 - 0.1) * (step as f32 / 49.0);
            let mut meta = FrameMeta::new("cam", &frame);
            meta.tracks = vec![Track {
                track_id: 1,
                class_name: "person".to_string(),
                confidence: 0.9,
                bbox: BBox { x: x * 100.0 - 5.0, y: 45.0, w: 10.0, h: 10.0 },
                age_frames: step as u32 + 1,
                trajectory: Default::default(),
            }];
            stage.process(frame.clone(), &mut meta);
            total_crossings += meta.events.len();
        }

        assert_eq!(total_crossings, 1);
        assert_eq!(stage.zones[0].count_in, 1);
        assert_eq!(stage.zones[0].count_out, 0);
    }
}
