//! The boundary between this crate's acquisition-mode logic and an actual
//! decode backend (GStreamer, v4l2, a container demuxer). Those backends
//! are external collaborators; this crate only defines the contract and a
//! synthetic decoder used for development and tests.

use vision_frame::Frame;

#[derive(thiserror::Error, Debug)]
pub enum DecoderError {
    #[error("end of stream")]
    EndOfStream,
    #[error("open failed: {0}")]
    OpenFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Minimal contract a decode backend must implement. `open` is called once
/// at source construction and again on live-mode reconnect; `read_frame` is
/// called once per scheduler iteration; `rewind` is only ever called in
/// file mode.
pub trait Decoder: Send {
    fn open(&mut self) -> Result<(), DecoderError>;
    fn read_frame(&mut self) -> Result<Frame, DecoderError>;
    fn rewind(&mut self) -> Result<(), DecoderError> {
        Err(DecoderError::ReadFailed("rewind not supported".into()))
    }
}

/// Emits a fixed number of solid-color synthetic frames, then reports
/// end-of-stream. Used by tests and as a stand-in when no real decode
/// backend is wired up.
pub struct SyntheticDecoder {
    width: u32,
    height: u32,
    total_frames: u64,
    emitted: u64,
    opened: bool,
}

impl SyntheticDecoder {
    pub fn new(width: u32, height: u32, total_frames: u64) -> Self {
        Self {
            width,
            height,
            total_frames,
            emitted: 0,
            opened: false,
        }
    }
}

impl Decoder for SyntheticDecoder {
    fn open(&mut self) -> Result<(), DecoderError> {
        self.opened = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, DecoderError> {
        if !self.opened {
            return Err(DecoderError::ReadFailed("not open".into()));
        }
        if self.emitted >= self.total_frames {
            return Err(DecoderError::EndOfStream);
        }
        let ts = self.emitted as i64 * 33;
        self.emitted += 1;
        Ok(Frame::zeros(self.width, self.height, 3, ts))
    }

    fn rewind(&mut self) -> Result<(), DecoderError> {
        self.emitted = 0;
        Ok(())
    }
}
