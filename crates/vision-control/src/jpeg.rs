//! Wire-format encode for `get_frame`/`get_raw_frame`: JPEG, quality
//! clamped to 1-100.

use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use vision_frame::Frame;

use crate::ControlError;

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, ControlError> {
    let quality = quality.clamp(1, 100);
    let color = match frame.channels {
        1 => ColorType::L8,
        3 => ColorType::Rgb8,
        4 => ColorType::Rgba8,
        n => return Err(ControlError::ConfigInvalid(format!("unsupported channel count {n}"))),
    };
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(&frame.data, frame.width, frame.height, color.into())
        .map_err(|e| ControlError::Internal(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_small_rgb_frame() {
        let frame = Frame::zeros(8, 8, 3, 0);
        let bytes = encode_jpeg(&frame, 80).unwrap();
        assert!(bytes.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn rejects_unsupported_channel_counts() {
        let frame = Frame::zeros(8, 8, 2, 0);
        assert!(matches!(encode_jpeg(&frame, 80), Err(ControlError::ConfigInvalid(_))));
    }
}
