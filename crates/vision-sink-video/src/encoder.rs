//! The [`Encoder`] boundary. Production wires in a real container
//! muxer/codec (H.264, VP8/VP9, raw) as an external collaborator;
//! [`SyntheticEncoder`] exercises the open/write/finish lifecycle in tests
//! without depending on one.

use std::path::Path;

use vision_frame::Frame;

use crate::VideoWriterConfig;

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoder not open")]
    NotOpen,
    #[error("codec error: {0}")]
    Codec(String),
}

pub trait Encoder: Send {
    fn open(&mut self, path: &Path, config: &VideoWriterConfig) -> Result<(), EncoderError>;
    fn write_frame(&mut self, frame: &Frame, frame_number: u64) -> Result<(), EncoderError>;
    fn finish(&mut self) -> Result<(), EncoderError>;
}

/// Writes a trivial length-prefixed raw-frame container. An unreleased
/// encoder leaves the file truncated and unplayable, same as a real one.
pub struct SyntheticEncoder {
    file: Option<std::fs::File>,
    frames_written: u64,
}

impl SyntheticEncoder {
    pub fn new() -> Self {
        Self {
            file: None,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Default for SyntheticEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for SyntheticEncoder {
    fn open(&mut self, path: &Path, _config: &VideoWriterConfig) -> Result<(), EncoderError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.file = Some(std::fs::File::create(path)?);
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame, _frame_number: u64) -> Result<(), EncoderError> {
        use std::io::Write;
        let file = self.file.as_mut().ok_or(EncoderError::NotOpen)?;
        file.write_all(&(frame.data.len() as u32).to_le_bytes())?;
        file.write_all(&frame.data)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), EncoderError> {
        use std::io::Write;
        let file = self.file.as_mut().ok_or(EncoderError::NotOpen)?;
        file.flush()?;
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unopened_encoder_rejects_write_and_finish() {
        let mut enc = SyntheticEncoder::new();
        let frame = Frame::zeros(4, 4, 3, 0);
        assert!(matches!(enc.write_frame(&frame, 0), Err(EncoderError::NotOpen)));
        assert!(matches!(enc.finish(), Err(EncoderError::NotOpen)));
    }
}
