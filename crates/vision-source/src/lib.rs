//! Frame source (component C1): produces a lazy sequence of decoded frames
//! at requested resolution and cadence, reconnecting on failure.
//!
//! Actual decode (GStreamer, v4l2, a file demuxer) is an external
//! collaborator; this crate owns the two operating modes the scheduler
//! depends on — live drop-on-overwrite acquisition and file looping
//! playback — behind a [`Decoder`] boundary a real backend plugs into.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use vision_frame::Frame;

mod decoder;
mod resize;

pub use decoder::{Decoder, DecoderError, SyntheticDecoder};
pub use resize::bilinear_resize;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("transient read failure: {0}")]
    Transient(String),
    #[error("decoder error: {0}")]
    Decoder(#[from] DecoderError),
}

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFormat {
    H264,
    H265,
    Raw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HwAccel {
    Auto,
    Nvidia,
    Vaapi,
    Omx,
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: f64,
    pub format: VideoFormat,
    pub hw_accel: HwAccel,
    /// Only meaningful for live sources.
    pub transport: Transport,
    /// Only meaningful for live sources.
    pub latency_ms: u32,
    /// Consecutive read failures tolerated before a live source gives up and
    /// surfaces `SourceError::Transient` to the caller instead of retrying silently.
    pub max_consecutive_failures: u32,
}

/// `rtsp`/`http`/`v4l2` run the dedicated producer thread; anything else
/// (a filesystem path, `file://`) is treated as file mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatingMode {
    Live,
    File,
}

pub fn operating_mode_for_url(url: &str) -> OperatingMode {
    let scheme = url.split_once("://").map(|(s, _)| s).unwrap_or("");
    match scheme {
        "rtsp" | "http" | "https" | "v4l2" => OperatingMode::Live,
        _ => OperatingMode::File,
    }
}

/// Probe the decode toolchain once at open time; prefer the first available
/// of `{nvidia, vaapi, omx}`, falling back to software decode.
///
/// `probe` reports whether a given backend is actually usable on this host;
/// tests inject a fake probe, production wires this to the real toolchain
/// query (an external collaborator).
pub fn select_hw_accel(requested: HwAccel, probe: impl Fn(HwAccel) -> bool) -> HwAccel {
    if requested != HwAccel::Auto {
        return if requested == HwAccel::None || probe(requested) {
            requested
        } else {
            HwAccel::None
        };
    }
    for candidate in [HwAccel::Nvidia, HwAccel::Vaapi, HwAccel::Omx] {
        if probe(candidate) {
            return candidate;
        }
    }
    HwAccel::None
}

/// A mutex-protected cell holding at most one value. Writes overwrite;
/// reads clone out and release the lock immediately.
struct SingleSlot<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> SingleSlot<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn overwrite(&self, value: T) {
        *self.slot.lock() = Some(value);
    }

    fn read(&self) -> Option<T> {
        self.slot.lock().clone()
    }
}

/// Frame source contract: `open`, `next_frame`, `close`.
pub struct Source {
    config: SourceConfig,
    mode: OperatingMode,
    inner: SourceInner,
}

enum SourceInner {
    Live(LiveSource),
    File(FileSource),
}

impl Source {
    /// Open-time failure is fatal to the camera start: the decoder is
    /// constructed synchronously and any error here must propagate up to
    /// whoever is starting the camera.
    pub fn open(config: SourceConfig, decoder: Box<dyn Decoder>) -> Result<Self> {
        let mode = operating_mode_for_url(&config.url);
        let inner = match mode {
            OperatingMode::Live => SourceInner::Live(LiveSource::open(&config, decoder)?),
            OperatingMode::File => SourceInner::File(FileSource::open(decoder)?),
        };
        Ok(Self { config, mode, inner })
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Returns `Ok(None)` when no frame is currently available (the caller
    /// should sleep briefly and retry), `Ok(Some(frame))` on success, and an
    /// error once retries are exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame = match &mut self.inner {
            SourceInner::Live(live) => live.next_frame()?,
            SourceInner::File(file) => Some(file.next_frame()?),
        };
        Ok(frame.map(|f| self.maybe_resize(f)))
    }

    fn maybe_resize(&self, frame: Frame) -> Frame {
        if frame.width == self.config.width && frame.height == self.config.height {
            frame
        } else {
            bilinear_resize(&frame, self.config.width, self.config.height)
        }
    }

    pub fn close(&mut self) {
        match &mut self.inner {
            SourceInner::Live(live) => live.close(),
            SourceInner::File(_file) => {}
        }
    }
}

/// Live mode: a dedicated producer thread continuously reads the latest
/// frame into a single-slot buffer with drop-on-overwrite semantics, so
/// consumers always see the most recent image rather than a queue of stale
/// ones. On read failure the thread reopens the source, up to a small
/// bounded number of consecutive failures, before surfacing
/// [`SourceError::Transient`].
struct LiveSource {
    slot: Arc<SingleSlot<Frame>>,
    failure_count: Arc<AtomicUsize>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    max_consecutive_failures: u32,
}

impl LiveSource {
    fn open(config: &SourceConfig, mut decoder: Box<dyn Decoder>) -> Result<Self> {
        // Open-time failure is fatal.
        decoder.open()?;

        let slot = Arc::new(SingleSlot::new());
        let failure_count = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let thread_slot = slot.clone();
        let thread_failures = failure_count.clone();
        let thread_shutdown = shutdown.clone();
        let max_failures = config.max_consecutive_failures;

        let handle = std::thread::Builder::new()
            .name(format!("source-{}", config.url))
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Relaxed) {
                    match decoder.read_frame() {
                        Ok(frame) => {
                            thread_failures.store(0, Ordering::Relaxed);
                            thread_slot.overwrite(frame);
                        }
                        Err(e) => {
                            let n = thread_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            log::warn!("live source read failed ({n}/{max_failures}): {e}");
                            if n as u32 >= max_failures {
                                // Reopen; a fresh open resets the failure streak.
                                if decoder.open().is_ok() {
                                    thread_failures.store(0, Ordering::Relaxed);
                                } else {
                                    std::thread::sleep(Duration::from_millis(100));
                                }
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn source thread");

        Ok(Self {
            slot,
            failure_count,
            shutdown,
            handle: Some(handle),
            max_consecutive_failures: config.max_consecutive_failures,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.failure_count.load(Ordering::Relaxed) as u32 >= self.max_consecutive_failures {
            return Err(SourceError::Transient(
                "exceeded consecutive read failures".into(),
            ));
        }
        Ok(self.slot.read())
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// File mode: no producer thread. `next_frame` reads synchronously; on EOF
/// the source rewinds and returns the first frame again (looping playback),
/// because file timing is intrinsic to the decoder and skipping frames
/// would defeat the purpose.
struct FileSource {
    decoder: Box<dyn Decoder>,
}

impl FileSource {
    fn open(mut decoder: Box<dyn Decoder>) -> Result<Self> {
        decoder.open()?;
        Ok(Self { decoder })
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match self.decoder.read_frame() {
            Ok(frame) => Ok(frame),
            Err(DecoderError::EndOfStream) => {
                self.decoder.rewind()?;
                Ok(self.decoder.read_frame()?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(url: &str) -> SourceConfig {
        SourceConfig {
            url: url.to_string(),
            width: 64,
            height: 48,
            target_fps: 30.0,
            format: VideoFormat::Raw,
            hw_accel: HwAccel::None,
            transport: Transport::Tcp,
            latency_ms: 0,
            max_consecutive_failures: 3,
        }
    }

    #[test]
    fn scheme_selects_operating_mode() {
        assert_eq!(operating_mode_for_url("rtsp://cam/1"), OperatingMode::Live);
        assert_eq!(operating_mode_for_url("v4l2:///dev/video0"), OperatingMode::Live);
        assert_eq!(operating_mode_for_url("/tmp/video.mp4"), OperatingMode::File);
    }

    #[test]
    fn hw_accel_prefers_first_available() {
        let picked = select_hw_accel(HwAccel::Auto, |c| matches!(c, HwAccel::Vaapi));
        assert_eq!(picked, HwAccel::Vaapi);

        let none_available = select_hw_accel(HwAccel::Auto, |_| false);
        assert_eq!(none_available, HwAccel::None);
    }

    #[test]
    fn file_source_loops_on_eof() {
        let decoder = Box::new(SyntheticDecoder::new(64, 48, 3));
        let mut src = Source::open(cfg("/tmp/clip.mp4"), decoder).unwrap();
        let first = src.next_frame().unwrap().unwrap();
        let _second = src.next_frame().unwrap().unwrap();
        let _third = src.next_frame().unwrap().unwrap();
        // fourth call hits EOF internally and rewinds
        let fourth = src.next_frame().unwrap().unwrap();
        assert_eq!(fourth.timestamp_ms, first.timestamp_ms);
    }

    #[test]
    fn live_source_drops_frames_under_backpressure() {
        let decoder = Box::new(SyntheticDecoder::new(64, 48, 1_000_000));
        let mut src = Source::open(cfg("rtsp://cam/1"), decoder).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let frame = src.next_frame().unwrap();
        assert!(frame.is_some());
        src.close();
    }
}
