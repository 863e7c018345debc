//! File video writer (component C6): a background-thread encoder that
//! resizes each processed frame to the configured output dimensions,
//! overlays the running frame number in the bottom-right corner, and
//! writes it to a container file.
//!
//! Shaped after this workspace's live frame source: a dedicated worker
//! thread owns the stateful resource (there, a decoder; here, an
//! [`Encoder`]) and the public handle only ever exchanges messages with it.
//! The actual codec/mux (H.264, VP8/VP9, a raw container) is an external
//! collaborator behind the [`Encoder`] trait.

use std::path::PathBuf;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use vision_frame::Frame;

mod digits;
mod encoder;
mod overlay;

pub use encoder::{Encoder, EncoderError, SyntheticEncoder};

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("sink already finished")]
    AlreadyDone,
    #[error("sink worker thread disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const H264: FourCc = FourCc(*b"H264");
    pub const RAW0: FourCc = FourCc(*b"RAW0");
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoWriterConfig {
    /// `strftime`-style path template, e.g. `"cam1-%Y%m%d-%H%M%S.mp4"`.
    pub path_template: String,
    pub fourcc: FourCc,
    pub output_width: u32,
    pub output_height: u32,
    pub fps: f64,
}

enum Msg {
    Write(Frame, u64),
    Finish,
}

/// One per camera's attached file-sink component.
pub struct VideoSink {
    tx: crossbeam_channel::Sender<Msg>,
    err_rx: crossbeam_channel::Receiver<SinkError>,
    is_done: bool,
    handle: Option<JoinHandle<()>>,
}

impl VideoSink {
    pub fn new(config: VideoWriterConfig, encoder: Box<dyn Encoder>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Msg>();
        let (err_tx, err_rx) = crossbeam_channel::unbounded::<SinkError>();
        let handle = std::thread::Builder::new()
            .name(format!("video-sink-{}", config.path_template))
            .spawn(move || run(config, encoder, rx, err_tx))
            .expect("failed to spawn video sink thread");
        Self {
            tx,
            err_rx,
            is_done: false,
            handle: Some(handle),
        }
    }

    fn check_err(&self) -> Result<()> {
        if let Ok(e) = self.err_rx.try_recv() {
            return Err(e);
        }
        Ok(())
    }

    /// `frame_number` is the value burned into the bottom-right overlay;
    /// resize and overlay happen on the worker thread.
    pub fn write(&mut self, frame: Frame, frame_number: u64) -> Result<()> {
        self.check_err()?;
        if self.is_done {
            return Err(SinkError::AlreadyDone);
        }
        self.tx
            .send(Msg::Write(frame, frame_number))
            .map_err(|_| SinkError::Disconnected)
    }

    /// Release the encoder. Idempotent: an already-finished sink reports
    /// success rather than erroring, since stop must be safe to call from
    /// more than one shutdown path.
    pub fn finish(&mut self) -> Result<()> {
        self.check_err()?;
        if self.is_done {
            return Ok(());
        }
        self.is_done = true;
        self.tx.send(Msg::Finish).map_err(|_| SinkError::Disconnected)?;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for VideoSink {
    fn drop(&mut self) {
        if !self.is_done {
            let _ = self.finish();
        }
    }
}

fn run(
    config: VideoWriterConfig,
    mut encoder: Box<dyn Encoder>,
    rx: crossbeam_channel::Receiver<Msg>,
    err_tx: crossbeam_channel::Sender<SinkError>,
) {
    let mut opened = false;
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Write(frame, frame_number) => {
                if !opened {
                    let path = resolve_path(&config.path_template, frame.timestamp_ms);
                    if let Err(e) = encoder.open(&path, &config) {
                        log::warn!("video sink failed to open encoder at {}: {e}", path.display());
                        let _ = err_tx.send(SinkError::Encoder(e));
                        return;
                    }
                    opened = true;
                }
                let mut resized = overlay::resize_to_output(&frame, config.output_width, config.output_height);
                overlay::stamp_frame_number(&mut resized, frame_number);
                if let Err(e) = encoder.write_frame(&resized, frame_number) {
                    log::warn!("video sink frame write failed: {e}");
                    let _ = err_tx.send(SinkError::Encoder(e));
                    return;
                }
            }
            Msg::Finish => {
                if opened {
                    if let Err(e) = encoder.finish() {
                        log::warn!("video sink failed to release encoder: {e}");
                        let _ = err_tx.send(SinkError::Encoder(e));
                    }
                }
                return;
            }
        }
    }
}

fn resolve_path(template: &str, timestamp_ms: i64) -> PathBuf {
    let dt = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_else(chrono::Utc::now)
        .with_timezone(&chrono::Local);
    PathBuf::from(dt.format(template).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> VideoWriterConfig {
        VideoWriterConfig {
            path_template: dir.join("out-%Y%m%d%H%M%S.bin").to_string_lossy().into_owned(),
            fourcc: FourCc::RAW0,
            output_width: 16,
            output_height: 12,
            fps: 30.0,
        }
    }

    #[test]
    fn write_then_finish_releases_encoder() {
        let dir = std::env::temp_dir().join(format!("vision-sink-video-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut sink = VideoSink::new(config(&dir), Box::new(SyntheticEncoder::new()));
        for i in 0..5u64 {
            let frame = Frame::zeros(64, 48, 3, i as i64 * 33);
            sink.write(frame, i).unwrap();
        }
        sink.finish().unwrap();
        // `finish` is idempotent.
        sink.finish().unwrap();
    }

    #[test]
    fn write_after_finish_is_rejected() {
        let dir = std::env::temp_dir().join(format!("vision-sink-video-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut sink = VideoSink::new(config(&dir), Box::new(SyntheticEncoder::new()));
        sink.finish().unwrap();
        let frame = Frame::zeros(64, 48, 3, 0);
        let err = sink.write(frame, 0).unwrap_err();
        assert!(matches!(err, SinkError::AlreadyDone));
    }
}
