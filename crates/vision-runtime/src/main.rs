//! Process entry point: wires the control plane to a config store and a
//! decoder/encoder backend, reloads any previously persisted cameras, then
//! idles until signaled. Serving the control operations over HTTP is an
//! external collaborator's job — this binary only owns the process
//! lifecycle and the component factories a real deployment would replace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use vision_config::{open_store, Entitlements, GlobalConfig, GlobalConfigHandle, LicenseTier};
use vision_control::ControlPlane;
use vision_sink_video::{Encoder, SyntheticEncoder};
use vision_source::{Decoder, SyntheticDecoder};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to the sqlite config/camera-config store.
    #[arg(long, default_value = "vision.sqlite3")]
    config_db: String,

    /// Directory holding one telemetry sqlite file per camera.
    #[arg(long, default_value = "telemetry")]
    telemetry_dir: String,

    /// Fallback inference server URL, used if AI_SERVER_URL/SERVER_URL are unset.
    #[arg(long, default_value = "http://localhost:8000")]
    inference_server_url: String,

    /// License tier to enforce for this process.
    #[arg(long, value_enum, default_value = "enterprise")]
    license_tier: CliLicenseTier,

    /// Comma-separated growth packs, e.g. "age_gender,shared_memory_inference".
    #[arg(long, default_value = "")]
    growth_packs: String,

    /// How often, in milliseconds, to log a heartbeat of camera states.
    #[arg(long, default_value_t = 5000)]
    heartbeat_ms: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CliLicenseTier {
    Free,
    Standard,
    Professional,
    Enterprise,
}

impl From<CliLicenseTier> for LicenseTier {
    fn from(tier: CliLicenseTier) -> Self {
        match tier {
            CliLicenseTier::Free => LicenseTier::Free,
            CliLicenseTier::Standard => LicenseTier::Standard,
            CliLicenseTier::Professional => LicenseTier::Professional,
            CliLicenseTier::Enterprise => LicenseTier::Enterprise,
        }
    }
}

/// Stand-ins for the real GStreamer/v4l2/container decode backend and the
/// real video-container encoder. A production deployment replaces these two
/// closures with ones that construct actual backends; the control plane and
/// registries never reach past the [`Decoder`]/[`Encoder`] traits.
fn decoder_factory() -> vision_control::DecoderFactory {
    Arc::new(|_tag| Box::new(SyntheticDecoder::new(1280, 720, u64::MAX)) as Box<dyn Decoder>)
}

fn encoder_factory() -> vision_control::EncoderFactory {
    Arc::new(|| Box::new(SyntheticEncoder::new()) as Box<dyn Encoder>)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = CliArgs::parse();

    let growth_packs: Vec<String> = args
        .growth_packs
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let entitlements = Entitlements::new(args.license_tier.clone().into(), growth_packs);

    let config_store = open_store(&args.config_db)?;
    let global_config = GlobalConfigHandle::new(GlobalConfig::from_env(args.inference_server_url.clone()));

    let plane = Arc::new(ControlPlane::new(
        config_store,
        global_config,
        entitlements,
        args.telemetry_dir.clone().into(),
        decoder_factory(),
        encoder_factory(),
    ));

    plane.reload()?;
    log::info!(
        "reloaded {} camera(s) from '{}' (all stopped)",
        plane.list_cameras().len(),
        args.config_db
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    let heartbeat = Duration::from_millis(args.heartbeat_ms.max(100));
    let poll = Duration::from_millis(100);
    let mut since_heartbeat = Duration::ZERO;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(poll);
        since_heartbeat += poll;
        if since_heartbeat >= heartbeat {
            since_heartbeat = Duration::ZERO;
            let cameras = plane.list_cameras();
            let running_count = cameras.iter().filter(|c| c.running).count();
            log::info!("{} camera(s) tracked, {} running", cameras.len(), running_count);
        }
    }

    log::info!("stopping all running cameras before exit");
    for summary in plane.list_cameras() {
        if summary.running {
            if let Err(e) = plane.update_camera(&summary.id, None, Some(false)) {
                log::warn!("failed to stop camera '{}' during shutdown: {e}", summary.id);
            }
        }
    }

    Ok(())
}
