use serde::{Deserialize, Serialize};
use shared::image_proc::EstimatorOptions;
use std::path::Path;
use std::time::Duration;

use crate::error::AlignError;

/// Configuration for the acquisition worker
///
/// Read once at startup; nothing writes it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Centroid estimator tuning
    pub estimator: EstimatorOptions,
    /// Physical size of one unbinned sensor pixel, in the units fits are reported in
    pub pixel_size: f64,
    /// Micrometres per fit unit, used to report widths in millimetres
    pub pixel_calibration_um: f64,
    /// How long to wait for a frame before reporting a timeout
    pub frame_timeout_ms: u64,
    /// Pause after a failed capture before retrying
    pub capture_retry_ms: u64,
    /// Capacity of the worker's event queue
    ///
    /// When the queue is full a `FrameProcessed` event is dropped rather than
    /// stalling capture. The warm-start state still advances from the dropped
    /// frame. Every other event blocks until there is room.
    pub event_queue_depth: usize,
    /// Number of frame intervals averaged for the frame rate
    pub frame_rate_window: usize,
    /// Also fit the row and column through the centroid
    pub fit_lineouts: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorOptions::default(),
            pixel_size: 1.0,
            pixel_calibration_um: 1.0,
            frame_timeout_ms: 1000,
            capture_retry_ms: 100,
            event_queue_depth: 8,
            frame_rate_window: 20,
            fit_lineouts: false,
        }
    }
}

impl AlignConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load_from_file(path: &Path) -> Result<Self, AlignError> {
        let json = std::fs::read_to_string(path)?;
        let config: AlignConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(AlignError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )))
            }
        };
        positive("pixel_size", self.pixel_size)?;
        positive("pixel_calibration_um", self.pixel_calibration_um)?;
        positive("estimator.default_width_px", self.estimator.default_width_px)?;
        positive("estimator.min_width_px", self.estimator.min_width_px)?;

        if self.estimator.default_width_px < self.estimator.min_width_px {
            return Err(AlignError::InvalidConfig(format!(
                "estimator.default_width_px ({}) is below estimator.min_width_px ({})",
                self.estimator.default_width_px, self.estimator.min_width_px
            )));
        }
        if self.estimator.offset_samples == 0 {
            return Err(AlignError::InvalidConfig(
                "estimator.offset_samples must be at least 1".to_string(),
            ));
        }
        if self.estimator.fit.max_iterations == 0 {
            return Err(AlignError::InvalidConfig(
                "estimator.fit.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.frame_timeout_ms == 0 {
            return Err(AlignError::InvalidConfig(
                "frame_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.event_queue_depth == 0 {
            return Err(AlignError::InvalidConfig(
                "event_queue_depth must be at least 1".to_string(),
            ));
        }
        if self.frame_rate_window < 2 {
            return Err(AlignError::InvalidConfig(
                "frame_rate_window must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }
}
