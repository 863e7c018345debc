//! Pipeline scheduler (component C4): one background worker thread per
//! camera running the cooperative frame loop — pull a frame, drive the
//! processor chain, fan out to sinks, update the snapshot buffer, pace
//! itself to the source kind.
//!
//! External callers never touch the worker directly; they start it, stop
//! it, or read the snapshot buffer. The worker never holds a lock across a
//! source read or an inference call — the snapshot buffer mutex is held
//! only long enough to swap in the new value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use vision_frame::{Event, Frame};
use vision_sink_video::VideoSink;
use vision_source::{OperatingMode, Source};
use vision_telemetry::TelemetryStore;
use vision_tracking::ProcessorChain;

const LIVE_CATCH_UP_THRESHOLD: Duration = Duration::from_millis(33);
const LIVE_IDLE_SLEEP: Duration = Duration::from_millis(10);
const FILE_PACING_SLEEP: Duration = Duration::from_millis(1);
const NO_FRAME_SLEEP: Duration = Duration::from_millis(10);

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("camera already stopped")]
    AlreadyStopped,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// The sink set a worker fans each frame out to. Either may be absent —
/// a camera with no file-video sink attached simply skips that fan-out.
/// `telemetry` is `Arc`-shared rather than owned outright so a control
/// plane can keep issuing analytics reads against the same handle while
/// the worker is running; `TelemetryStore` is already internally
/// mutex-guarded, so sharing it behind a reference adds no new
/// synchronization surface.
#[derive(Default)]
pub struct Sinks {
    pub video: Option<VideoSink>,
    pub telemetry: Option<Arc<TelemetryStore>>,
}

/// The latest raw/annotated frame and the events produced alongside it,
/// for on-demand reads (`get_frame`/`get_raw_frame`/the snapshot half of
/// analytics debugging).
#[derive(Clone)]
pub struct Snapshot {
    pub raw: Frame,
    pub annotated: Frame,
    pub events: Vec<Event>,
    pub frame_number: u64,
}

struct SnapshotBuffer {
    slot: Mutex<Option<Snapshot>>,
}

impl SnapshotBuffer {
    fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    fn store(&self, snapshot: Snapshot) {
        *self.slot.lock() = Some(snapshot);
    }

    fn read(&self) -> Option<Snapshot> {
        self.slot.lock().clone()
    }
}

/// Boolean-plus-condvar stop signal. The worker observes `is_running()`
/// between frames and paces itself with `wait_timeout` rather than a plain
/// sleep, so `stop` wakes it immediately instead of waiting out the pacing
/// interval.
struct RunningFlag {
    running: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl RunningFlag {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    /// Sleeps for at most `interval`, waking early if `stop` is called
    /// meanwhile. Used for pacing, never for anything that must observe a
    /// missed wakeup.
    fn wait_timeout(&self, interval: Duration) {
        let mut guard = self.mutex.lock();
        self.condvar.wait_for(&mut guard, interval);
    }
}

type WorkerOwned = (Source, ProcessorChain, Sinks);

/// One per camera. Starting a worker is fallible only through
/// `Source::open`'s own synchronous failure, which happens before this
/// type exists at all (the caller constructs `Source` first); once
/// started, the worker cannot fail to run — per-frame errors are
/// contained and logged, never propagated.
pub struct CameraWorker {
    camera_id: String,
    snapshot: Arc<SnapshotBuffer>,
    flag: Arc<RunningFlag>,
    handle: Option<std::thread::JoinHandle<WorkerOwned>>,
}

impl CameraWorker {
    /// Starts the worker thread. `source` must already be open and
    /// `chain`'s stages are `initialize()`d here, in pipeline order —
    /// a stage whose upstream is unreachable logs a warning and is still
    /// started; the per-frame retry inside `infer` handles recovery.
    pub fn start(camera_id: impl Into<String>, source: Source, mut chain: ProcessorChain, sinks: Sinks) -> Self {
        let camera_id = camera_id.into();
        chain.initialize_all();

        let flag = Arc::new(RunningFlag::new());
        let snapshot = Arc::new(SnapshotBuffer::new());
        let frame_counter = Arc::new(AtomicU64::new(0));

        let thread_camera_id = camera_id.clone();
        let thread_flag = flag.clone();
        let thread_snapshot = snapshot.clone();

        let handle = std::thread::Builder::new()
            .name(format!("camera-{camera_id}"))
            .spawn(move || run_loop(thread_camera_id, source, chain, sinks, thread_flag, thread_snapshot, frame_counter))
            .expect("failed to spawn camera worker thread");

        Self {
            camera_id,
            snapshot,
            flag,
            handle: Some(handle),
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.flag.is_running()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.snapshot.read()
    }

    /// Sets the running flag false, signals the condvar, joins the worker
    /// (bounded by one inference timeout — the worst case for the
    /// in-flight iteration to finish), then releases resources in reverse
    /// dependency order: sinks, then processors, then the source.
    ///
    /// Idempotent: a worker already stopped returns `Err(AlreadyStopped)`
    /// rather than panicking, so callers on both the normal-shutdown and
    /// startup-failure-rollback paths can call this unconditionally.
    pub fn stop(&mut self) -> Result<WorkerOwned> {
        let Some(handle) = self.handle.take() else {
            return Err(SchedulerError::AlreadyStopped);
        };
        self.flag.stop();
        let (source, mut chain, mut sinks) = handle.join().expect("camera worker thread panicked");

        if let Some(video) = sinks.video.as_mut() {
            if let Err(e) = video.finish() {
                log::warn!("camera {}: video sink failed to release cleanly: {e}", self.camera_id);
            }
        }
        chain.stop_all();
        let mut source = source;
        source.close();

        Ok((source, chain, sinks))
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_loop(
    camera_id: String,
    mut source: Source,
    mut chain: ProcessorChain,
    mut sinks: Sinks,
    flag: Arc<RunningFlag>,
    snapshot: Arc<SnapshotBuffer>,
    frame_counter: Arc<AtomicU64>,
) -> WorkerOwned {
    while flag.is_running() {
        let iteration_start = Instant::now();

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                flag.wait_timeout(NO_FRAME_SLEEP);
                continue;
            }
            Err(e) => {
                log::warn!("camera {camera_id}: source read failed: {e}");
                flag.wait_timeout(NO_FRAME_SLEEP);
                continue;
            }
        };

        let raw = frame.clone();
        let (annotated, meta) = chain.process(frame, &camera_id);
        let frame_number = frame_counter.fetch_add(1, Ordering::Relaxed);

        if let Some(video) = sinks.video.as_mut() {
            if let Err(e) = video.write(annotated.clone(), frame_number) {
                log::warn!("camera {camera_id}: video sink write failed: {e}");
            }
        }
        if let Some(telemetry) = sinks.telemetry.as_ref() {
            if let Err(e) = telemetry.process_telemetry(&meta.events, None) {
                log::warn!("camera {camera_id}: telemetry write failed: {e}");
            }
        }

        snapshot.store(Snapshot {
            raw,
            annotated,
            events: meta.events,
            frame_number,
        });

        let mode = source.mode();
        let elapsed = iteration_start.elapsed();
        match mode {
            OperatingMode::File => flag.wait_timeout(FILE_PACING_SLEEP),
            OperatingMode::Live => {
                if elapsed <= LIVE_CATCH_UP_THRESHOLD {
                    flag.wait_timeout(LIVE_IDLE_SLEEP);
                }
            }
        }
    }
    (source, chain, sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_source::{SourceConfig, SyntheticDecoder};

    fn file_source() -> Source {
        let config = SourceConfig {
            url: "/tmp/clip.mp4".into(),
            width: 16,
            height: 12,
            target_fps: 30.0,
            format: vision_source::VideoFormat::Raw,
            hw_accel: vision_source::HwAccel::None,
            transport: vision_source::Transport::Tcp,
            latency_ms: 0,
            max_consecutive_failures: 3,
        };
        Source::open(config, Box::new(SyntheticDecoder::new(16, 12, 3))).unwrap()
    }

    #[test]
    fn worker_processes_frames_into_snapshot_buffer() {
        let source = file_source();
        let chain = ProcessorChain::new();
        let mut worker = CameraWorker::start("cam1", source, chain, Sinks::default());

        let mut saw_snapshot = false;
        for _ in 0..50 {
            if worker.snapshot().is_some() {
                saw_snapshot = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(saw_snapshot, "worker never populated the snapshot buffer");
        worker.stop().unwrap();
    }

    #[test]
    fn stop_is_idempotent() {
        let source = file_source();
        let chain = ProcessorChain::new();
        let mut worker = CameraWorker::start("cam1", source, chain, Sinks::default());
        std::thread::sleep(Duration::from_millis(20));
        assert!(worker.stop().is_ok());
        assert!(matches!(worker.stop(), Err(SchedulerError::AlreadyStopped)));
    }
}
