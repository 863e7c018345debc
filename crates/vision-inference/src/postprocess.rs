//! Dequantize raw model outputs back into the original frame's coordinate
//! space, threshold on confidence, then greedy NMS per class.

use vision_frame::Detection;

use crate::preprocess::PreparedInput;
use crate::{bbox_from_xyxy, InferError, RawOutput};

pub struct PostprocessConfig {
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub class_names: Vec<String>,
}

pub(crate) fn decode(
    raw: &RawOutput,
    prepared: &PreparedInput,
    cfg: &PostprocessConfig,
) -> Result<Vec<Detection>, InferError> {
    if raw.boxes.len() != raw.scores.len() || raw.boxes.len() != raw.class_ids.len() {
        return Err(InferError::Protocol(format!(
            "ragged output: {} boxes, {} scores, {} class ids",
            raw.boxes.len(),
            raw.scores.len(),
            raw.class_ids.len()
        )));
    }

    let mut detections = Vec::new();
    for i in 0..raw.boxes.len() {
        let score = raw.scores[i];
        if score < cfg.confidence_threshold {
            continue;
        }
        let class_id = raw.class_ids[i];
        let class_name = cfg
            .class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"));

        let unpadded = dequantize(&raw.boxes[i], prepared);
        detections.push(Detection {
            class_name,
            confidence: score,
            bbox: bbox_from_xyxy(&unpadded),
        });
    }

    Ok(non_max_suppression(detections, cfg.nms_iou_threshold))
}

fn dequantize(b: &[f32; 4], prepared: &PreparedInput) -> [f32; 4] {
    let unpad = |v: f32, pad: f32| (v - pad) / prepared.scale;
    let x1 = unpad(b[0], prepared.pad_x).clamp(0.0, prepared.original_width as f32);
    let y1 = unpad(b[1], prepared.pad_y).clamp(0.0, prepared.original_height as f32);
    let x2 = unpad(b[2], prepared.pad_x).clamp(0.0, prepared.original_width as f32);
    let y2 = unpad(b[3], prepared.pad_y).clamp(0.0, prepared.original_height as f32);
    [x1, y1, x2, y2]
}

/// Sort by confidence descending; suppress any later box overlapping an
/// already-kept box of the same class above `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let mut kept: Vec<Detection> = Vec::new();
    'outer: for candidate in detections {
        for k in &kept {
            if k.class_name == candidate.class_name && k.bbox.iou(&candidate.bbox) > iou_threshold
            {
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_frame::BBox;

    fn det(class: &str, conf: f32, x: f32) -> Detection {
        Detection {
            class_name: class.to_string(),
            confidence: conf,
            bbox: BBox { x, y: 0.0, w: 10.0, h: 10.0 },
        }
    }

    #[test]
    fn nms_suppresses_overlapping_lower_confidence() {
        let dets = vec![det("person", 0.9, 0.0), det("person", 0.8, 1.0)];
        let kept = non_max_suppression(dets, 0.3);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_non_overlapping_boxes() {
        let dets = vec![det("person", 0.9, 0.0), det("person", 0.8, 100.0)];
        let kept = non_max_suppression(dets, 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let dets = vec![det("person", 0.9, 0.0), det("car", 0.8, 1.0)];
        let kept = non_max_suppression(dets, 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn decode_rejects_ragged_output() {
        let raw = RawOutput {
            boxes: vec![[0.0, 0.0, 1.0, 1.0]],
            scores: vec![0.9, 0.8],
            class_ids: vec![0],
        };
        let prepared = crate::preprocess::letterbox(
            &vision_frame::Frame::zeros(32, 32, 3, 0),
            &crate::preprocess::PreprocessConfig { input_size: 32 },
        );
        let cfg = PostprocessConfig {
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.5,
            class_names: vec!["person".to_string()],
        };
        assert!(decode(&raw, &prepared, &cfg).is_err());
    }
}
