//! Detector stage: runs the inference client, filters by class allow-list,
//! draws boxes and labels on an annotated copy of the frame.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use vision_frame::{Event, EventType, Frame};
use vision_inference::{InferenceClient, ModelConfig};

use crate::{color_for_class, draw_rect, ChainStage, FrameMeta};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model: ModelConfig,
    /// Empty means no filtering — every detected class passes through.
    pub class_allow_list: HashSet<String>,
    pub draw_annotations: bool,
}

pub struct Detector {
    config: DetectorConfig,
    global_config: vision_config::GlobalConfig,
    client: Option<InferenceClient>,
}

impl Detector {
    pub fn new(config: DetectorConfig, global_config: vision_config::GlobalConfig) -> Self {
        Self {
            config,
            global_config,
            client: None,
        }
    }

    fn passes_allow_list(&self, class_name: &str) -> bool {
        self.config.class_allow_list.is_empty()
            || self.config.class_allow_list.contains(class_name)
    }
}

impl ChainStage for Detector {
    fn initialize(&mut self) {
        match InferenceClient::connect(self.config.model.transport, &self.global_config) {
            Ok(client) => self.client = Some(client),
            Err(e) => {
                log::warn!(
                    "detector: inference server unreachable at start ({e}); starting anyway, \
                     frames will produce 0 detections until it recovers"
                );
                self.client = None;
            }
        }
    }

    fn process(&mut self, mut frame: Frame, meta: &mut FrameMeta) -> Frame {
        if self.client.is_none() {
            // Lazily retry connecting; covers the case where initialize()
            // ran before the server was reachable.
            match InferenceClient::connect(self.config.model.transport, &self.global_config) {
                Ok(c) => self.client = Some(c),
                Err(e) => {
                    log::debug!("detector: inference server still unreachable: {e}");
                    return frame;
                }
            }
        }
        let client = self.client.as_ref().expect("just connected above");

        let result = match vision_inference::infer(client, &self.config.model, &frame) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("detector: infer failed for this frame: {e}");
                return frame;
            }
        };

        for detection in result.detections {
            if !self.passes_allow_list(&detection.class_name) {
                continue;
            }
            if self.config.draw_annotations {
                let color = color_for_class(&detection.class_name);
                draw_rect(
                    &mut frame,
                    detection.bbox.x as i32,
                    detection.bbox.y as i32,
                    detection.bbox.w as i32,
                    detection.bbox.h as i32,
                    color,
                    2,
                );
            }
            meta.events.push(Event::new(
                EventType::Detection,
                meta.camera_id.clone(),
                "detector",
                meta.timestamp_ms,
                serde_json::json!({
                    "class_name": detection.class_name,
                    "confidence": detection.confidence,
                    "bbox": {
                        "x": detection.bbox.x, "y": detection.bbox.y,
                        "w": detection.bbox.w, "h": detection.bbox.h,
                    },
                }),
            ));
            meta.detections.push(detection);
        }

        frame
    }
}
