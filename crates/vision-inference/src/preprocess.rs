//! Letterbox resize and tensor layout conversion shared by all transports.

use vision_frame::Frame;

pub struct PreprocessConfig {
    pub input_size: u32,
}

/// The result of letterboxing: the resized-and-padded square frame plus the
/// scale factor and padding offsets needed to map detections back to the
/// original frame's coordinate space.
pub struct PreparedInput {
    pub tensor: Vec<f32>,
    pub input_size: u32,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub original_width: u32,
    pub original_height: u32,
}

/// Resize preserving aspect ratio to fit inside `input_size x input_size`,
/// pad the remainder with mid-gray, then convert HWC u8 -> CHW f32 in
/// [0, 1].
pub fn letterbox(frame: &Frame, cfg: &PreprocessConfig) -> PreparedInput {
    let size = cfg.input_size as usize;
    let channels = frame.channels as usize;
    let src_w = frame.width as usize;
    let src_h = frame.height as usize;

    let scale = (size as f32 / src_w as f32).min(size as f32 / src_h as f32);
    let resized_w = ((src_w as f32 * scale).round() as usize).max(1);
    let resized_h = ((src_h as f32 * scale).round() as usize).max(1);
    let pad_x = ((size - resized_w) / 2) as f32;
    let pad_y = ((size - resized_h) / 2) as f32;

    let mut hwc = vec![114u8; size * size * channels];

    let x_ratio = src_w as f32 / resized_w as f32;
    let y_ratio = src_h as f32 / resized_h as f32;
    for dy in 0..resized_h {
        let sy = ((dy as f32 + 0.5) * y_ratio).floor().min((src_h - 1) as f32) as usize;
        for dx in 0..resized_w {
            let sx = ((dx as f32 + 0.5) * x_ratio).floor().min((src_w - 1) as f32) as usize;
            let dst_x = dx + pad_x as usize;
            let dst_y = dy + pad_y as usize;
            for c in 0..channels {
                hwc[(dst_y * size + dst_x) * channels + c] =
                    frame.data[(sy * src_w + sx) * channels + c];
            }
        }
    }

    let mut tensor = vec![0.0f32; channels * size * size];
    for y in 0..size {
        for x in 0..size {
            for c in 0..channels {
                let v = hwc[(y * size + x) * channels + c] as f32 / 255.0;
                tensor[c * size * size + y * size + x] = v;
            }
        }
    }

    PreparedInput {
        tensor,
        input_size: cfg.input_size,
        scale,
        pad_x,
        pad_y,
        original_width: frame.width,
        original_height: frame.height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_frame::Frame;

    #[test]
    fn letterbox_pads_non_square_frame() {
        let frame = Frame::zeros(64, 32, 3, 0);
        let prepared = letterbox(&frame, &PreprocessConfig { input_size: 64 });
        assert_eq!(prepared.tensor.len(), 3 * 64 * 64);
        assert!(prepared.pad_y > 0.0);
        assert_eq!(prepared.pad_x, 0.0);
        assert!((prepared.scale - 1.0).abs() < 1e-6);
    }

    #[test]
    fn letterbox_downscales_large_frame() {
        let frame = Frame::zeros(640, 640, 3, 0);
        let prepared = letterbox(&frame, &PreprocessConfig { input_size: 320 });
        assert!((prepared.scale - 0.5).abs() < 1e-6);
        assert_eq!(prepared.pad_x, 0.0);
        assert_eq!(prepared.pad_y, 0.0);
    }
}
