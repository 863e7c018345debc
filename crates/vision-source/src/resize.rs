//! Bilinear resize applied when the decoder's native output resolution
//! differs from the configured target resolution.

use vision_frame::Frame;

pub fn bilinear_resize(frame: &Frame, target_width: u32, target_height: u32) -> Frame {
    if frame.width == target_width && frame.height == target_height {
        return frame.clone();
    }

    let channels = frame.channels as usize;
    let src_w = frame.width as usize;
    let src_h = frame.height as usize;
    let dst_w = target_width as usize;
    let dst_h = target_height as usize;

    let mut out = vec![0u8; dst_w * dst_h * channels];

    let x_ratio = src_w as f32 / dst_w.max(1) as f32;
    let y_ratio = src_h as f32 / dst_h.max(1) as f32;

    for dy in 0..dst_h {
        let sy = (dy as f32 + 0.5) * y_ratio - 0.5;
        let y0 = sy.floor().max(0.0) as usize;
        let y1 = (y0 + 1).min(src_h.saturating_sub(1));
        let wy = (sy - y0 as f32).clamp(0.0, 1.0);

        for dx in 0..dst_w {
            let sx = (dx as f32 + 0.5) * x_ratio - 0.5;
            let x0 = sx.floor().max(0.0) as usize;
            let x1 = (x0 + 1).min(src_w.saturating_sub(1));
            let wx = (sx - x0 as f32).clamp(0.0, 1.0);

            for c in 0..channels {
                let p00 = frame.data[(y0 * src_w + x0) * channels + c] as f32;
                let p01 = frame.data[(y0 * src_w + x1) * channels + c] as f32;
                let p10 = frame.data[(y1 * src_w + x0) * channels + c] as f32;
                let p11 = frame.data[(y1 * src_w + x1) * channels + c] as f32;

                let top = p00 * (1.0 - wx) + p01 * wx;
                let bottom = p10 * (1.0 - wx) + p11 * wx;
                let value = top * (1.0 - wy) + bottom * wy;

                out[(dy * dst_w + dx) * channels + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Frame::new(target_width, target_height, frame.channels, out, frame.timestamp_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_preserves_dimensions_and_timestamp() {
        let frame = Frame::zeros(32, 24, 3, 1234);
        let resized = bilinear_resize(&frame, 16, 12);
        assert_eq!(resized.width, 16);
        assert_eq!(resized.height, 12);
        assert_eq!(resized.timestamp_ms, 1234);
        assert_eq!(resized.data.len(), 16 * 12 * 3);
    }

    #[test]
    fn resize_is_noop_when_dimensions_match() {
        let frame = Frame::zeros(10, 10, 3, 0);
        let resized = bilinear_resize(&frame, 10, 10);
        assert_eq!(resized.data, frame.data);
    }
}
