//! Output-dimension resize and the bottom-right frame-number overlay.

use vision_frame::Frame;
use vision_source::bilinear_resize;

use crate::digits::{glyph_for, GLYPH_HEIGHT, GLYPH_WIDTH};

const SCALE: usize = 3;
const MARGIN: usize = 10;
const GLYPH_SPACING: usize = 2;

pub(crate) fn resize_to_output(frame: &Frame, width: u32, height: u32) -> Frame {
    bilinear_resize(frame, width, height)
}

/// Burns `frame_number` into the bottom-right corner, white-on-whatever.
pub(crate) fn stamp_frame_number(frame: &mut Frame, frame_number: u64) {
    let text = frame_number.to_string();
    let channels = frame.channels as usize;
    let glyph_px_w = GLYPH_WIDTH * SCALE;
    let glyph_px_h = GLYPH_HEIGHT * SCALE;
    let total_w = text.len() * (glyph_px_w + GLYPH_SPACING);

    let start_x = (frame.width as usize).saturating_sub(total_w + MARGIN);
    let start_y = (frame.height as usize).saturating_sub(glyph_px_h + MARGIN);

    for (i, c) in text.chars().enumerate() {
        let glyph = glyph_for(c);
        let gx0 = start_x + i * (glyph_px_w + GLYPH_SPACING);
        for (row, line) in glyph.iter().enumerate() {
            for (col, cell) in line.chars().enumerate() {
                if cell != '#' {
                    continue;
                }
                for sy in 0..SCALE {
                    for sx in 0..SCALE {
                        set_pixel(frame, gx0 + col * SCALE + sx, start_y + row * SCALE + sy, channels);
                    }
                }
            }
        }
    }
}

fn set_pixel(frame: &mut Frame, x: usize, y: usize, channels: usize) {
    if x >= frame.width as usize || y >= frame.height as usize {
        return;
    }
    let idx = (y * frame.width as usize + x) * channels;
    for c in 0..channels {
        frame.data[idx + c] = 255;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_writes_white_pixels_near_bottom_right() {
        let mut frame = Frame::zeros(64, 64, 3, 0);
        stamp_frame_number(&mut frame, 42);
        assert!(frame.data.iter().any(|&b| b == 255));
    }

    #[test]
    fn stamp_on_tiny_frame_does_not_panic() {
        let mut frame = Frame::zeros(4, 4, 3, 0);
        stamp_frame_number(&mut frame, 999999);
    }

    #[test]
    fn resize_changes_dimensions() {
        let frame = Frame::zeros(32, 32, 3, 0);
        let resized = resize_to_output(&frame, 16, 16);
        assert_eq!(resized.width, 16);
        assert_eq!(resized.height, 16);
    }
}
