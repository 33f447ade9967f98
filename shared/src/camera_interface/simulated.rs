//! Simulated beam camera
//!
//! Renders a Gaussian beam on a flat, noisy background at a fixed frame rate.
//! Geometry, clamping and enumerations mimic a small machine-vision sensor so
//! the acquisition pipeline can be exercised without hardware.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{
    ensure_option, CameraError, CameraInterface, CameraProvider, CameraResult, DeviceDescriptor,
    FrameMetadata, NumericRange, ParameterName, Timestamp,
};

const EXPOSURE_RANGE_MS: NumericRange<f64> = NumericRange {
    min: 0.001,
    max: 1000.0,
};
const GAIN_RANGE_DB: NumericRange<f64> = NumericRange {
    min: 0.0,
    max: 48.0,
};
const BINNING_RANGE: NumericRange<usize> = NumericRange { min: 1, max: 4 };
const MIN_ROI_SIZE: usize = 4;

const EXPOSURE_MODES: [&str; 2] = ["Off", "Continuous"];
const TRIGGER_MODES: [&str; 2] = ["Off", "On"];
const TRIGGER_SOURCES: [&str; 2] = ["Software", "Line1"];
const PIXEL_FORMATS: [&str; 3] = ["Mono8", "Mono12", "Mono16"];

/// Gaussian beam in sensor coordinates
///
/// Positions use the pixel-center convention: sensor pixel `i` spans
/// `[i, i + 1)` and is sampled at `i + 0.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedBeam {
    pub center_x: f64,
    pub center_y: f64,
    /// Gaussian sigma in sensor pixels
    pub sigma: f64,
    /// Peak counts per millisecond of exposure at 0 dB gain
    pub amplitude: f64,
    /// Flat background counts added to every pixel
    pub background: f64,
}

impl Default for SimulatedBeam {
    fn default() -> Self {
        Self {
            center_x: 600.0,
            center_y: 400.0,
            sigma: 50.0,
            amplitude: 512.0,
            background: 0.0,
        }
    }
}

/// Configuration for the simulated device
#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub sensor_width: usize,
    pub sensor_height: usize,
    /// Beam to render; `None` renders background and noise only
    pub beam: Option<SimulatedBeam>,
    /// Uniform integer noise drawn from `0..noise_max`
    pub noise_max: u16,
    /// Per-frame beam pointing jitter (sigma, sensor pixels)
    pub jitter_std: f64,
    /// Time between frames
    pub frame_interval: Duration,
    pub seed: u64,
    pub serial_number: String,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            sensor_width: 1024,
            sensor_height: 1024,
            beam: Some(SimulatedBeam::default()),
            noise_max: 5,
            jitter_std: 2.0,
            frame_interval: Duration::from_millis(100),
            seed: 42,
            serial_number: "SIM-0001".to_string(),
        }
    }
}

impl SimulatedCameraConfig {
    /// Deterministic configuration: no noise, no jitter
    pub fn noiseless(beam: Option<SimulatedBeam>) -> Self {
        Self {
            beam,
            noise_max: 0,
            jitter_std: 0.0,
            ..Self::default()
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

pub struct SimulatedCamera {
    config: SimulatedCameraConfig,
    rng: ChaCha8Rng,
    jitter: Option<Normal<f64>>,
    exposure_ms: f64,
    gain_db: f64,
    width: usize,
    height: usize,
    offset_x: usize,
    offset_y: usize,
    binning_horizontal: usize,
    binning_vertical: usize,
    exposure_mode: String,
    trigger_mode: String,
    trigger_source: String,
    pixel_format: String,
    streaming: bool,
    closed: bool,
    frame_count: u64,
    pending_changes: Vec<ParameterName>,
}

impl SimulatedCamera {
    pub fn new(config: SimulatedCameraConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let jitter = (config.jitter_std > 0.0)
            .then(|| Normal::new(0.0, config.jitter_std).ok())
            .flatten();
        Self {
            rng,
            jitter,
            exposure_ms: 1.0,
            gain_db: 0.0,
            width: config.sensor_width,
            height: config.sensor_height,
            offset_x: 0,
            offset_y: 0,
            binning_horizontal: 1,
            binning_vertical: 1,
            exposure_mode: EXPOSURE_MODES[0].to_string(),
            trigger_mode: TRIGGER_MODES[0].to_string(),
            trigger_source: TRIGGER_SOURCES[0].to_string(),
            pixel_format: "Mono12".to_string(),
            streaming: false,
            closed: false,
            frame_count: 0,
            pending_changes: Vec::new(),
            config,
        }
    }

    fn max_width(&self) -> usize {
        self.config.sensor_width / self.binning_horizontal
    }

    fn max_height(&self) -> usize {
        self.config.sensor_height / self.binning_vertical
    }

    /// Re-clamp size and offsets after any geometry change
    fn clamp_geometry(&mut self) {
        self.width = self.width_range().clamp(self.width);
        self.height = self.height_range().clamp(self.height);
        self.offset_x = self.offset_x_range().clamp(self.offset_x);
        self.offset_y = self.offset_y_range().clamp(self.offset_y);
    }

    fn saturation(&self) -> f64 {
        match self.pixel_format.as_str() {
            "Mono8" => 255.0,
            "Mono12" => 4095.0,
            _ => 65535.0,
        }
    }

    fn ensure_open(&self) -> CameraResult<()> {
        if self.closed {
            Err(CameraError::HardwareError("device is closed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Separable beam profile sampled at binned pixel centers
    fn beam_profile(&mut self, beam: &SimulatedBeam) -> (Vec<f64>, Vec<f64>) {
        let (jx, jy) = match self.jitter {
            Some(normal) => (normal.sample(&mut self.rng), normal.sample(&mut self.rng)),
            None => (0.0, 0.0),
        };
        let cx = beam.center_x + jx;
        let cy = beam.center_y + jy;
        let two_sigma2 = 2.0 * beam.sigma * beam.sigma;
        let bx = self.binning_horizontal as f64;
        let by = self.binning_vertical as f64;

        let gx = (0..self.width)
            .map(|c| {
                let x = (c + self.offset_x) as f64 * bx + 0.5 * bx;
                (-(x - cx).powi(2) / two_sigma2).exp()
            })
            .collect();
        let gy = (0..self.height)
            .map(|r| {
                let y = (r + self.offset_y) as f64 * by + 0.5 * by;
                (-(y - cy).powi(2) / two_sigma2).exp()
            })
            .collect();
        (gx, gy)
    }

    fn render_frame(&mut self) -> Array2<u16> {
        let gain_factor = 10f64.powf(self.gain_db / 10.0);
        let saturation = self.saturation();
        let beam = self.config.beam.clone();
        let profile = beam.as_ref().map(|b| self.beam_profile(b));
        let peak = beam
            .as_ref()
            .map_or(0.0, |b| b.amplitude * self.exposure_ms);
        let background = beam.as_ref().map_or(0.0, |b| b.background);
        let noise_max = self.config.noise_max;

        let mut frame = Array2::<u16>::zeros((self.height, self.width));
        for ((row, col), pixel) in frame.indexed_iter_mut() {
            let noise = if noise_max > 0 {
                self.rng.gen_range(0..noise_max) as f64
            } else {
                0.0
            };
            let signal = match &profile {
                Some((gx, gy)) => peak * gx[col] * gy[row],
                None => 0.0,
            };
            let value = ((background + noise + signal) * gain_factor).round();
            *pixel = value.clamp(0.0, saturation) as u16;
        }
        frame
    }

    /// Continuous auto exposure: keep the peak between half and 95% of full scale
    fn auto_adjust_exposure(&mut self, frame: &Array2<u16>) {
        let peak = frame.iter().copied().max().unwrap_or(0) as f64;
        let saturation = self.saturation();
        let adjusted = if peak >= 0.95 * saturation {
            self.exposure_ms * 0.8
        } else if peak < 0.5 * saturation {
            self.exposure_ms * 1.1
        } else {
            return;
        };
        let adjusted = EXPOSURE_RANGE_MS.clamp(adjusted);
        if adjusted != self.exposure_ms {
            self.exposure_ms = adjusted;
            if !self.pending_changes.contains(&ParameterName::Exposure) {
                self.pending_changes.push(ParameterName::Exposure);
            }
        }
    }

    fn metadata(&self) -> FrameMetadata {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        FrameMetadata {
            frame_number: self.frame_count,
            timestamp: Timestamp::from_duration(now),
            exposure_ms: self.exposure_ms,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            binning_horizontal: self.binning_horizontal,
            binning_vertical: self.binning_vertical,
        }
    }
}

fn options(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl CameraInterface for SimulatedCamera {
    fn name(&self) -> &str {
        "Simulated Camera"
    }

    fn get_serial(&self) -> String {
        self.config.serial_number.clone()
    }

    fn close(&mut self) -> CameraResult<()> {
        self.streaming = false;
        self.closed = true;
        Ok(())
    }

    fn start_streaming(&mut self) -> CameraResult<()> {
        self.ensure_open()?;
        self.streaming = true;
        Ok(())
    }

    fn stop_streaming(&mut self) -> CameraResult<()> {
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn get_image(&mut self, timeout: Duration) -> CameraResult<(Array2<u16>, FrameMetadata)> {
        if !self.streaming {
            return Err(CameraError::NotStreaming);
        }

        // No external line is wired to the simulator, hardware triggers never fire
        let waiting_on_line = self.trigger_mode == "On" && self.trigger_source == "Line1";
        if waiting_on_line || self.config.frame_interval > timeout {
            std::thread::sleep(timeout);
            return Err(CameraError::Timeout(timeout));
        }
        if !self.config.frame_interval.is_zero() {
            std::thread::sleep(self.config.frame_interval);
        }

        let frame = self.render_frame();
        self.frame_count += 1;
        let metadata = self.metadata();
        if self.exposure_mode == "Continuous" {
            self.auto_adjust_exposure(&frame);
        }
        Ok((frame, metadata))
    }

    fn get_exposure(&self) -> f64 {
        self.exposure_ms
    }

    fn set_exposure(&mut self, exposure_ms: f64) -> CameraResult<()> {
        if !exposure_ms.is_finite() {
            return Err(CameraError::rejected(ParameterName::Exposure, "not finite"));
        }
        self.exposure_ms = EXPOSURE_RANGE_MS.clamp(exposure_ms);
        Ok(())
    }

    fn exposure_range(&self) -> NumericRange<f64> {
        EXPOSURE_RANGE_MS
    }

    fn get_gain(&self) -> f64 {
        self.gain_db
    }

    fn set_gain(&mut self, gain_db: f64) -> CameraResult<()> {
        if !gain_db.is_finite() {
            return Err(CameraError::rejected(ParameterName::Gain, "not finite"));
        }
        self.gain_db = GAIN_RANGE_DB.clamp(gain_db);
        Ok(())
    }

    fn gain_range(&self) -> NumericRange<f64> {
        GAIN_RANGE_DB
    }

    fn get_width(&self) -> usize {
        self.width
    }

    fn set_width(&mut self, width: usize) -> CameraResult<()> {
        self.width = width;
        self.clamp_geometry();
        Ok(())
    }

    fn width_range(&self) -> NumericRange<usize> {
        NumericRange::new(MIN_ROI_SIZE, self.max_width())
    }

    fn get_height(&self) -> usize {
        self.height
    }

    fn set_height(&mut self, height: usize) -> CameraResult<()> {
        self.height = height;
        self.clamp_geometry();
        Ok(())
    }

    fn height_range(&self) -> NumericRange<usize> {
        NumericRange::new(MIN_ROI_SIZE, self.max_height())
    }

    fn get_offset_x(&self) -> usize {
        self.offset_x
    }

    fn set_offset_x(&mut self, offset: usize) -> CameraResult<()> {
        self.offset_x = self.offset_x_range().clamp(offset);
        Ok(())
    }

    fn offset_x_range(&self) -> NumericRange<usize> {
        NumericRange::new(0, self.max_width().saturating_sub(self.width))
    }

    fn get_offset_y(&self) -> usize {
        self.offset_y
    }

    fn set_offset_y(&mut self, offset: usize) -> CameraResult<()> {
        self.offset_y = self.offset_y_range().clamp(offset);
        Ok(())
    }

    fn offset_y_range(&self) -> NumericRange<usize> {
        NumericRange::new(0, self.max_height().saturating_sub(self.height))
    }

    fn get_binning_horizontal(&self) -> usize {
        self.binning_horizontal
    }

    fn set_binning_horizontal(&mut self, binning: usize) -> CameraResult<()> {
        self.binning_horizontal = BINNING_RANGE.clamp(binning);
        self.clamp_geometry();
        Ok(())
    }

    fn binning_horizontal_range(&self) -> NumericRange<usize> {
        BINNING_RANGE
    }

    fn get_binning_vertical(&self) -> usize {
        self.binning_vertical
    }

    fn set_binning_vertical(&mut self, binning: usize) -> CameraResult<()> {
        self.binning_vertical = BINNING_RANGE.clamp(binning);
        self.clamp_geometry();
        Ok(())
    }

    fn binning_vertical_range(&self) -> NumericRange<usize> {
        BINNING_RANGE
    }

    fn get_exposure_mode(&self) -> String {
        self.exposure_mode.clone()
    }

    fn set_exposure_mode(&mut self, mode: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::ExposureMode,
            mode,
            &self.enumerate_exposure_mode(),
        )?;
        self.exposure_mode = mode.to_string();
        Ok(())
    }

    fn enumerate_exposure_mode(&self) -> Vec<String> {
        options(&EXPOSURE_MODES)
    }

    fn get_trigger_mode(&self) -> String {
        self.trigger_mode.clone()
    }

    fn set_trigger_mode(&mut self, mode: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::TriggerMode,
            mode,
            &self.enumerate_trigger_mode(),
        )?;
        self.trigger_mode = mode.to_string();
        Ok(())
    }

    fn enumerate_trigger_mode(&self) -> Vec<String> {
        options(&TRIGGER_MODES)
    }

    fn get_trigger_source(&self) -> String {
        self.trigger_source.clone()
    }

    fn set_trigger_source(&mut self, source: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::TriggerSource,
            source,
            &self.enumerate_trigger_source(),
        )?;
        self.trigger_source = source.to_string();
        Ok(())
    }

    fn enumerate_trigger_source(&self) -> Vec<String> {
        options(&TRIGGER_SOURCES)
    }

    fn get_pixel_format(&self) -> String {
        self.pixel_format.clone()
    }

    fn set_pixel_format(&mut self, format: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::PixelFormat,
            format,
            &self.enumerate_pixel_format(),
        )?;
        self.pixel_format = format.to_string();
        Ok(())
    }

    fn enumerate_pixel_format(&self) -> Vec<String> {
        options(&PIXEL_FORMATS)
    }

    fn poll_parameter_changes(&mut self) -> Vec<ParameterName> {
        std::mem::take(&mut self.pending_changes)
    }
}

/// Provider exposing a single simulated device
#[derive(Debug, Clone, Default)]
pub struct SimulatedProvider {
    config: SimulatedCameraConfig,
}

impl SimulatedProvider {
    pub fn new(config: SimulatedCameraConfig) -> Self {
        Self { config }
    }

    pub fn serial_number(&self) -> &str {
        &self.config.serial_number
    }
}

impl CameraProvider for SimulatedProvider {
    fn enumerate(&self) -> Vec<DeviceDescriptor> {
        vec![DeviceDescriptor {
            serial_number: self.config.serial_number.clone(),
            display_name: "Simulated Camera".to_string(),
        }]
    }

    fn open(&self, device_id: &str) -> CameraResult<Box<dyn CameraInterface>> {
        if device_id != self.config.serial_number {
            return Err(CameraError::ConnectionFailed(format!(
                "no simulated device with serial '{device_id}'"
            )));
        }
        tracing::info!("Opening simulated camera {device_id}");
        Ok(Box::new(SimulatedCamera::new(self.config.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_interface::ParameterValue;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn quiet_camera() -> SimulatedCamera {
        let config = SimulatedCameraConfig::noiseless(Some(SimulatedBeam::default()))
            .with_frame_interval(Duration::ZERO);
        SimulatedCamera::new(config)
    }

    #[test]
    fn test_frame_matches_geometry() {
        let mut camera = quiet_camera();
        camera.set_width(320).unwrap();
        camera.set_height(200).unwrap();
        camera.set_offset_x(100).unwrap();
        camera.start_streaming().unwrap();

        let (frame, metadata) = camera.get_image(TIMEOUT).unwrap();
        assert_eq!(frame.dim(), (200, 320));
        assert_eq!(metadata.frame_number, 1);
        assert_eq!(metadata.offset_x, 100);
        assert_eq!(metadata.binning_horizontal, 1);
    }

    #[test]
    fn test_noiseless_beam_peak() {
        let mut camera = quiet_camera();
        camera.start_streaming().unwrap();
        let (frame, _) = camera.get_image(TIMEOUT).unwrap();

        // Pixel 599 is centered at 599.5, half a pixel from the beam center
        let expected = (512.0 * (-(0.25 + 0.25) / (2.0 * 2500.0_f64)).exp()).round() as u16;
        assert_eq!(frame[[399, 599]], expected);
        assert_eq!(frame[[0, 0]], 0);
    }

    #[test]
    fn test_width_change_narrows_offset_range() {
        let mut camera = quiet_camera();
        assert_eq!(camera.offset_x_range(), NumericRange::new(0, 0));

        camera.set_width(512).unwrap();
        assert_eq!(camera.get_width(), 512);
        assert_eq!(camera.offset_x_range(), NumericRange::new(0, 512));

        camera.set_offset_x(900).unwrap();
        assert_eq!(camera.get_offset_x(), 512);

        camera.set_width(1000).unwrap();
        assert_eq!(camera.get_offset_x(), 24);
    }

    #[test]
    fn test_size_clamps_to_range() {
        let mut camera = quiet_camera();
        camera.set_width(1).unwrap();
        assert_eq!(camera.get_width(), MIN_ROI_SIZE);
        camera.set_height(5000).unwrap();
        assert_eq!(camera.get_height(), 1024);
    }

    #[test]
    fn test_binning_shrinks_sensor() {
        let mut camera = quiet_camera();
        camera.set_binning_horizontal(2).unwrap();
        assert_eq!(camera.get_width(), 512);
        assert_eq!(camera.width_range().max, 512);

        camera.set_binning_vertical(9).unwrap();
        assert_eq!(camera.get_binning_vertical(), 4);
        assert_eq!(camera.get_height(), 256);
    }

    #[test]
    fn test_rejects_unknown_choice() {
        let mut camera = quiet_camera();
        let err = camera.set_pixel_format("RGB8").unwrap_err();
        assert!(matches!(
            err,
            CameraError::ParameterRejected {
                name: ParameterName::PixelFormat,
                ..
            }
        ));
        assert_eq!(camera.get_pixel_format(), "Mono12");

        let err = camera
            .set_parameter(ParameterName::Width, &ParameterValue::from("wide"))
            .unwrap_err();
        assert!(matches!(err, CameraError::ParameterRejected { .. }));
    }

    #[test]
    fn test_set_parameter_dispatch() {
        let mut camera = quiet_camera();
        camera
            .set_parameter(ParameterName::Exposure, &ParameterValue::Float(2.5))
            .unwrap();
        camera
            .set_parameter(ParameterName::Height, &ParameterValue::Integer(256))
            .unwrap();
        camera
            .set_parameter(ParameterName::TriggerMode, &ParameterValue::from("On"))
            .unwrap();

        let parameters = camera.parameters();
        assert_eq!(parameters.exposure.value, 2.5);
        assert_eq!(parameters.height.value, 256);
        assert_eq!(parameters.offset_y.range.max, 768);
        assert_eq!(parameters.trigger_mode.value, "On");
        assert_eq!(parameters.pixel_format.options.len(), 3);
        assert_eq!(
            camera.get_parameter(ParameterName::Height),
            ParameterValue::Integer(256)
        );
    }

    #[test]
    fn test_streaming_state() {
        let mut camera = quiet_camera();
        assert_eq!(
            camera.get_image(TIMEOUT).unwrap_err(),
            CameraError::NotStreaming
        );
        camera.stop_streaming().unwrap();
        camera.start_streaming().unwrap();
        camera.start_streaming().unwrap();
        assert!(camera.is_streaming());
        camera.close().unwrap();
        assert!(!camera.is_streaming());
        assert!(camera.start_streaming().is_err());
    }

    #[test]
    fn test_line_trigger_times_out() {
        let mut camera = quiet_camera();
        camera.set_trigger_mode("On").unwrap();
        camera.set_trigger_source("Line1").unwrap();
        camera.start_streaming().unwrap();

        let timeout = Duration::from_millis(5);
        assert_eq!(
            camera.get_image(timeout).unwrap_err(),
            CameraError::Timeout(timeout)
        );
    }

    #[test]
    fn test_auto_exposure_reports_change() {
        let mut camera = quiet_camera();
        camera.set_exposure_mode("Continuous").unwrap();
        camera.set_exposure(100.0).unwrap();
        camera.start_streaming().unwrap();

        camera.get_image(TIMEOUT).unwrap();
        assert_eq!(camera.poll_parameter_changes(), vec![ParameterName::Exposure]);
        assert!(camera.get_exposure() < 100.0);
        assert!(camera.poll_parameter_changes().is_empty());
    }

    #[test]
    fn test_provider_open() {
        let provider = SimulatedProvider::default();
        let devices = provider.enumerate();
        assert_eq!(devices.len(), 1);
        assert!(provider.open(&devices[0].serial_number).is_ok());
        assert!(matches!(
            provider.open("12345"),
            Err(CameraError::ConnectionFailed(_))
        ));
    }
}
