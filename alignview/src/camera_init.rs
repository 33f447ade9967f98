//! Camera backend selection for alignview binaries
//!
//! The backend is chosen from arguments at runtime; hardware backends are
//! compiled in only when their feature is enabled.

use clap::{Parser, ValueEnum};
use shared::camera_interface::simulated::{
    SimulatedBeam, SimulatedCameraConfig, SimulatedProvider,
};
use shared::camera_interface::CameraProvider;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CameraType {
    Simulated,
    #[cfg(all(feature = "v4l2", target_os = "linux"))]
    V4l2,
}

/// Common camera selection arguments
///
/// - Simulated camera: always available
/// - V4L2 capture devices: requires the "v4l2" feature
#[derive(Parser, Debug, Clone)]
pub struct CameraArgs {
    /// Camera backend to use
    #[arg(short = 't', long, value_enum, default_value = "simulated")]
    pub camera_type: CameraType,

    /// Device to open; defaults to the first one the backend enumerates
    #[arg(short = 'd', long)]
    pub device: Option<String>,

    // Simulated camera options
    /// Sensor width for the simulated camera
    #[arg(long, default_value = "1024")]
    pub sim_width: usize,

    /// Sensor height for the simulated camera
    #[arg(long, default_value = "1024")]
    pub sim_height: usize,

    /// Simulated beam center x, sensor pixels
    #[arg(long, default_value = "600.0")]
    pub sim_beam_x: f64,

    /// Simulated beam center y, sensor pixels
    #[arg(long, default_value = "400.0")]
    pub sim_beam_y: f64,

    /// Simulated beam sigma, sensor pixels
    #[arg(long, default_value = "50.0")]
    pub sim_sigma: f64,

    /// Milliseconds between simulated frames
    #[arg(long, default_value = "100")]
    pub sim_interval_ms: u64,

    /// Seed for simulated noise and jitter
    #[arg(long, default_value = "42")]
    pub sim_seed: u64,
}

impl CameraArgs {
    fn simulated_config(&self) -> SimulatedCameraConfig {
        SimulatedCameraConfig {
            sensor_width: self.sim_width,
            sensor_height: self.sim_height,
            beam: Some(SimulatedBeam {
                center_x: self.sim_beam_x,
                center_y: self.sim_beam_y,
                sigma: self.sim_sigma,
                ..SimulatedBeam::default()
            }),
            seed: self.sim_seed,
            ..SimulatedCameraConfig::default()
        }
        .with_frame_interval(Duration::from_millis(self.sim_interval_ms))
    }
}

/// Build the provider selected by `args`
pub fn initialize_provider(args: &CameraArgs) -> Arc<dyn CameraProvider> {
    match args.camera_type {
        CameraType::Simulated => {
            tracing::info!(
                "Using simulated camera ({}x{})",
                args.sim_width,
                args.sim_height
            );
            Arc::new(SimulatedProvider::new(args.simulated_config()))
        }
        #[cfg(all(feature = "v4l2", target_os = "linux"))]
        CameraType::V4l2 => {
            tracing::info!("Using V4L2 capture devices");
            Arc::new(hardware::v4l2::V4l2Provider)
        }
    }
}

/// Device id to connect to: the explicit one, else the first enumerated
pub fn select_device(args: &CameraArgs, provider: &dyn CameraProvider) -> anyhow::Result<String> {
    if let Some(device) = &args.device {
        return Ok(device.clone());
    }
    let devices = provider.enumerate();
    for device in &devices {
        tracing::info!("Found {} ({})", device.display_name, device.serial_number);
    }
    devices
        .into_iter()
        .next()
        .map(|d| d.serial_number)
        .ok_or_else(|| anyhow::anyhow!("No {:?} devices found", args.camera_type))
}
