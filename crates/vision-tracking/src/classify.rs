//! Classification / AgeGender stages: same inference-client pattern as the
//! detector, but scoped to each track's current crop rather than the whole
//! frame, emitting one event per inference result above threshold.

use serde::{Deserialize, Serialize};
use vision_frame::{Event, EventType, Frame};
use vision_inference::{InferenceClient, ModelConfig};

use crate::{ChainStage, FrameMeta};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model: ModelConfig,
    pub event_type: EventType,
    pub confidence_threshold: f32,
    /// When set, the model's `class_name` is parsed as `"{gender}:{age}"`
    /// and emitted as separate `age`/`gender` properties instead of a plain
    /// `class_name`. Set by the registry for the AgeGender stage only.
    #[serde(default)]
    pub parse_age_gender: bool,
}

pub struct ClassifierStage {
    config: ClassifierConfig,
    global_config: vision_config::GlobalConfig,
    client: Option<InferenceClient>,
}

impl ClassifierStage {
    pub fn new(config: ClassifierConfig, global_config: vision_config::GlobalConfig) -> Self {
        Self {
            config,
            global_config,
            client: None,
        }
    }
}

/// Extracts the pixel region under `track.bbox` as a standalone frame so the
/// classifier's own preprocessing (letterbox to its input size) applies the
/// same way it would to a full detector frame.
fn crop(frame: &Frame, x: i32, y: i32, w: i32, h: i32) -> Frame {
    let channels = frame.channels as i32;
    let fw = frame.width as i32;
    let fh = frame.height as i32;
    let x0 = x.clamp(0, fw - 1);
    let y0 = y.clamp(0, fh - 1);
    let x1 = (x + w).clamp(x0 + 1, fw);
    let y1 = (y + h).clamp(y0 + 1, fh);
    let crop_w = (x1 - x0) as u32;
    let crop_h = (y1 - y0) as u32;

    let mut data = vec![0u8; crop_w as usize * crop_h as usize * channels as usize];
    for row in 0..crop_h {
        let src_start = (((y0 + row as i32) * fw + x0) * channels) as usize;
        let src_end = src_start + crop_w as usize * channels as usize;
        let dst_start = (row * crop_w) as usize * channels as usize;
        let dst_end = dst_start + crop_w as usize * channels as usize;
        data[dst_start..dst_end].copy_from_slice(&frame.data[src_start..src_end]);
    }
    Frame::new(crop_w, crop_h, frame.channels, data, frame.timestamp_ms)
}

/// The age/gender model's `class_name` is `"{gender}:{age}"` (e.g.
/// `"female:29"`). A name that doesn't match the convention is passed
/// through as the gender with no age, rather than dropping the event.
fn parse_age_gender(class_name: &str) -> (String, Option<u32>) {
    match class_name.split_once(':') {
        Some((gender, age)) => (gender.to_string(), age.trim().parse().ok()),
        None => (class_name.to_string(), None),
    }
}

impl ChainStage for ClassifierStage {
    fn initialize(&mut self) {
        match InferenceClient::connect(self.config.model.transport, &self.global_config) {
            Ok(client) => self.client = Some(client),
            Err(e) => {
                log::warn!("classifier: inference server unreachable at start ({e}); starting anyway");
                self.client = None;
            }
        }
    }

    fn process(&mut self, frame: Frame, meta: &mut FrameMeta) -> Frame {
        if self.client.is_none() {
            match InferenceClient::connect(self.config.model.transport, &self.global_config) {
                Ok(c) => self.client = Some(c),
                Err(_) => return frame,
            }
        }
        let client = self.client.as_ref().expect("just connected above");

        for track in &meta.tracks {
            let region = crop(
                &frame,
                track.bbox.x as i32,
                track.bbox.y as i32,
                track.bbox.w as i32,
                track.bbox.h as i32,
            );
            let result = match vision_inference::infer(client, &self.config.model, &region) {
                Ok(r) => r,
                Err(e) => {
                    log::debug!("classifier: infer failed for track {}: {e}", track.track_id);
                    continue;
                }
            };
            for detection in result.detections {
                if detection.confidence < self.config.confidence_threshold {
                    continue;
                }
                let properties = if self.config.parse_age_gender {
                    let (gender, age) = parse_age_gender(&detection.class_name);
                    serde_json::json!({
                        "track_id": track.track_id,
                        "gender": gender,
                        "age": age,
                        "confidence": detection.confidence,
                    })
                } else {
                    serde_json::json!({
                        "track_id": track.track_id,
                        "class_name": detection.class_name,
                        "confidence": detection.confidence,
                    })
                };
                meta.events.push(Event::new(
                    self.config.event_type,
                    meta.camera_id.clone(),
                    track.track_id.to_string(),
                    meta.timestamp_ms,
                    properties,
                ));
            }
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_age_gender_label() {
        assert_eq!(parse_age_gender("female:29"), ("female".to_string(), Some(29)));
    }

    #[test]
    fn falls_back_to_gender_only_on_unparseable_age() {
        assert_eq!(parse_age_gender("male:unknown"), ("male".to_string(), None));
    }

    #[test]
    fn treats_unlabeled_class_name_as_gender_with_no_age() {
        assert_eq!(parse_age_gender("adult"), ("adult".to_string(), None));
    }
}
