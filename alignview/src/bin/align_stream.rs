//! Headless beam alignment stream.
//!
//! Connects to a camera, streams frames through the centroid estimator and
//! logs the beam position and width of each frame.

use alignview::camera_init::{initialize_provider, select_device, CameraArgs};
use alignview::{AlignConfig, WorkerEvent, WorkerHandle};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream beam centroid and width from a camera")]
struct Args {
    #[command(flatten)]
    camera: CameraArgs,

    /// JSON configuration file; defaults apply when omitted
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Stop after this many frames (runs until the time limit otherwise)
    #[arg(short = 'n', long)]
    frames: Option<usize>,

    #[arg(
        short = 's',
        long,
        help = "Maximum runtime in seconds (runs indefinitely if not specified)"
    )]
    max_runtime_secs: Option<u64>,

    #[arg(short = 'e', long, help = "Camera exposure time in milliseconds")]
    exposure_ms: Option<f64>,

    /// ROI width to request before streaming
    #[arg(long)]
    roi_width: Option<usize>,

    /// ROI height to request before streaming
    #[arg(long)]
    roi_height: Option<usize>,

    /// Apply a 3x3 median filter before fitting
    #[arg(long)]
    median: bool,
}

fn load_config(args: &Args) -> Result<AlignConfig> {
    let mut config = match &args.config {
        Some(path) => AlignConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AlignConfig::default(),
    };
    if args.median {
        config.estimator.median_filter = true;
    }
    Ok(config)
}

/// Wait for the connection outcome, logging anything else that arrives first
fn await_connection(worker: &WorkerHandle, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match worker.recv_timeout(deadline.saturating_duration_since(Instant::now()))? {
            Some(WorkerEvent::Connected(parameters)) => {
                info!(
                    "Connected: {}x{} at ({}, {}), binning {}x{}, exposure {:.3} ms, format {}",
                    parameters.width.value,
                    parameters.height.value,
                    parameters.offset_x.value,
                    parameters.offset_y.value,
                    parameters.binning_horizontal.value,
                    parameters.binning_vertical.value,
                    parameters.exposure.value,
                    parameters.pixel_format.value
                );
                return Ok(());
            }
            Some(WorkerEvent::ConnectionFailed(e)) => {
                return Err(e).context("Failed to connect to camera");
            }
            Some(other) => info!("{:?}", other),
            None => {}
        }
    }
    anyhow::bail!("Timed out waiting for the camera to connect")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let calibration_um = config.pixel_calibration_um;
    let wait = config.frame_timeout() * 2;

    let provider = initialize_provider(&args.camera);
    let device = select_device(&args.camera, provider.as_ref())?;

    let worker = WorkerHandle::spawn(provider, config).context("Failed to start worker")?;
    info!("Connecting to {device}");
    worker.connect(&device)?;
    await_connection(&worker, Duration::from_secs(10))?;

    if let Some(exposure) = args.exposure_ms {
        worker.change_parameter("exposure", exposure)?;
    }
    if let Some(width) = args.roi_width {
        worker.change_parameter("width", width)?;
    }
    if let Some(height) = args.roi_height {
        worker.change_parameter("height", height)?;
    }
    worker.start_streaming()?;

    let start = Instant::now();
    let max_runtime = args.max_runtime_secs.map(Duration::from_secs);
    let mut frames = 0usize;
    let mut timeouts = 0usize;

    loop {
        if args.frames.is_some_and(|n| frames >= n) {
            break;
        }
        if max_runtime.is_some_and(|limit| start.elapsed() >= limit) {
            info!("Reached maximum runtime");
            break;
        }

        match worker.recv_timeout(wait)? {
            Some(WorkerEvent::FrameProcessed(frame)) => {
                frames += 1;
                let (cx, cy) = frame.centroid.centroid;
                let (wx, wy) = frame.widths_mm(calibration_um);
                let fps = frame
                    .frame_rate
                    .map_or_else(|| "-".to_string(), |r| format!("{r:.1}"));
                if frame.centroid.both_fits_converged() {
                    info!(
                        "Frame {}: centroid ({cx:.3}, {cy:.3}), width ({wx:.4}, {wy:.4}) mm, {fps} fps",
                        frame.metadata.frame_number
                    );
                } else {
                    warn!(
                        "Frame {}: fit fell back to seed, centroid ({cx:.3}, {cy:.3}), {fps} fps",
                        frame.metadata.frame_number
                    );
                }
            }
            Some(WorkerEvent::FrameTimeout { waited }) => {
                timeouts += 1;
                warn!("No frame after {waited:?}");
            }
            Some(WorkerEvent::ParametersUpdated(parameters)) => {
                info!(
                    "Parameters: {}x{} at ({}, {}), exposure {:.3} ms",
                    parameters.width.value,
                    parameters.height.value,
                    parameters.offset_x.value,
                    parameters.offset_y.value,
                    parameters.exposure.value
                );
            }
            Some(WorkerEvent::OffsetRangeUpdated(range)) => {
                info!(
                    "Offset ranges: x {}..={}, y {}..={}",
                    range.offset_x.range.min,
                    range.offset_x.range.max,
                    range.offset_y.range.min,
                    range.offset_y.range.max
                );
            }
            Some(WorkerEvent::Disconnected) => {
                warn!("Camera disconnected");
                break;
            }
            Some(other) => info!("{:?}", other),
            None => warn!("No events for {wait:?}"),
        }
    }

    worker.stop_streaming()?;
    worker.disconnect()?;
    info!(
        "Processed {frames} frames ({timeouts} timeouts) in {:.1} s",
        start.elapsed().as_secs_f64()
    );
    worker.shutdown();
    Ok(())
}
