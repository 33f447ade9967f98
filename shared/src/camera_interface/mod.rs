//! Camera abstraction layer for the alignment pipeline
//!
//! Provides a unified capability contract that can be backed by the simulated
//! beam camera (for testing) or by real hardware (for production). Every
//! backend exposes the same parameter set; backends that lack a capability
//! report a degenerate range or a single enumerated option instead of failing.

pub mod parameters;
pub mod simulated;

use ndarray::Array2;
use std::fmt;
use std::time::Duration;

pub use parameters::{
    ChoiceValue, DeviceParameters, NumericRange, OffsetRange, ParameterName, ParameterValue,
    RangedValue,
};

/// Timestamp structure aligned with V4L2 format
/// Represents time as seconds and nanoseconds since an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Seconds component
    pub seconds: u64,
    /// Nanoseconds component (0-999,999,999)
    pub nanos: u64,
}

impl Timestamp {
    pub fn new(seconds: u64, nanos: u64) -> Self {
        Self { seconds, nanos }
    }

    pub fn from_duration(duration: Duration) -> Self {
        let total_nanos = duration.as_nanos();
        let seconds = (total_nanos / 1_000_000_000) as u64;
        let nanos = (total_nanos % 1_000_000_000) as u64;
        Self { seconds, nanos }
    }

    pub fn to_duration(&self) -> Duration {
        Duration::new(self.seconds, self.nanos as u32)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Error type for camera operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CameraError {
    /// The device could not be opened
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Hardware communication error on an open device
    #[error("hardware error: {0}")]
    HardwareError(String),
    /// The device refused a parameter value outright
    #[error("{name} rejected: {reason}")]
    ParameterRejected { name: ParameterName, reason: String },
    /// No parameter by that name
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),
    /// No frame arrived within the timeout
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    /// Frame capture failed
    #[error("capture error: {0}")]
    CaptureError(String),
    /// A frame was requested while the device is not streaming
    #[error("camera is not streaming")]
    NotStreaming,
}

impl CameraError {
    pub fn rejected(name: ParameterName, reason: impl Into<String>) -> Self {
        CameraError::ParameterRejected {
            name,
            reason: reason.into(),
        }
    }
}

/// Result type for camera operations
pub type CameraResult<T> = Result<T, CameraError>;

/// Metadata delivered with each frame
///
/// Geometry fields describe the readout that produced this frame, so the
/// frame can be mapped to sensor coordinates even if parameters changed since.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMetadata {
    /// Frame sequence number
    pub frame_number: u64,
    /// Timestamp when frame was captured
    pub timestamp: Timestamp,
    /// Exposure in milliseconds
    pub exposure_ms: f64,
    /// ROI origin in binned pixels
    pub offset_x: usize,
    pub offset_y: usize,
    pub binning_horizontal: usize,
    pub binning_vertical: usize,
}

/// Identification of an attached device, as shown in a device picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Identifier passed to [`CameraProvider::open`]
    pub serial_number: String,
    /// Human-readable device name
    pub display_name: String,
}

/// Factory for one camera backend
///
/// Selected by configuration; the acquisition worker only ever sees this
/// trait and the [`CameraInterface`] objects it returns.
pub trait CameraProvider: Send + Sync {
    /// List devices this backend can open
    fn enumerate(&self) -> Vec<DeviceDescriptor>;

    /// Open a device by serial number or path
    ///
    /// # Returns
    /// * `Err(CameraError::ConnectionFailed)` if the device cannot be opened
    fn open(&self, device_id: &str) -> CameraResult<Box<dyn CameraInterface>>;
}

/// Trait for unified camera interface
///
/// Implementations are not required to be reentrant: callers serialize all
/// access onto one thread. Exposure is in milliseconds, gain in dB, sizes and
/// offsets in binned pixels.
pub trait CameraInterface: Send {
    /// Human-readable model name
    fn name(&self) -> &str;

    /// Unique hardware identifier
    fn get_serial(&self) -> String;

    /// Release the device. Idempotent.
    fn close(&mut self) -> CameraResult<()>;

    /// Begin continuous acquisition. Idempotent.
    fn start_streaming(&mut self) -> CameraResult<()>;

    /// End continuous acquisition. A no-op when not streaming.
    fn stop_streaming(&mut self) -> CameraResult<()>;

    fn is_streaming(&self) -> bool;

    /// Wait for the next frame
    ///
    /// # Returns
    /// * `Ok((frame, metadata))` with `frame.dim() == (height, width)` of the
    ///   geometry recorded in `metadata`
    /// * `Err(CameraError::Timeout)` if nothing arrived within `timeout`
    /// * `Err(CameraError::NotStreaming)` if streaming was never started
    fn get_image(&mut self, timeout: Duration) -> CameraResult<(Array2<u16>, FrameMetadata)>;

    /// Callback delivery built on [`CameraInterface::get_image`]
    ///
    /// Invokes `callback` for each frame until it returns false. Timeouts are
    /// skipped; any other error ends the stream.
    fn stream(
        &mut self,
        timeout: Duration,
        callback: &mut dyn FnMut(&Array2<u16>, &FrameMetadata) -> bool,
    ) -> CameraResult<()> {
        loop {
            match self.get_image(timeout) {
                Ok((frame, metadata)) => {
                    if !callback(&frame, &metadata) {
                        return Ok(());
                    }
                }
                Err(CameraError::Timeout(waited)) => {
                    tracing::debug!("{} produced no frame within {waited:?}", self.name());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_exposure(&self) -> f64;
    fn set_exposure(&mut self, exposure_ms: f64) -> CameraResult<()>;
    fn exposure_range(&self) -> NumericRange<f64>;

    fn get_gain(&self) -> f64;
    fn set_gain(&mut self, gain_db: f64) -> CameraResult<()>;
    fn gain_range(&self) -> NumericRange<f64>;

    /// Setting width may clamp the offset and narrow its range.
    fn get_width(&self) -> usize;
    fn set_width(&mut self, width: usize) -> CameraResult<()>;
    fn width_range(&self) -> NumericRange<usize>;

    fn get_height(&self) -> usize;
    fn set_height(&mut self, height: usize) -> CameraResult<()>;
    fn height_range(&self) -> NumericRange<usize>;

    fn get_offset_x(&self) -> usize;
    fn set_offset_x(&mut self, offset: usize) -> CameraResult<()>;
    fn offset_x_range(&self) -> NumericRange<usize>;

    fn get_offset_y(&self) -> usize;
    fn set_offset_y(&mut self, offset: usize) -> CameraResult<()>;
    fn offset_y_range(&self) -> NumericRange<usize>;

    fn get_binning_horizontal(&self) -> usize;
    fn set_binning_horizontal(&mut self, binning: usize) -> CameraResult<()>;
    fn binning_horizontal_range(&self) -> NumericRange<usize>;

    fn get_binning_vertical(&self) -> usize;
    fn set_binning_vertical(&mut self, binning: usize) -> CameraResult<()>;
    fn binning_vertical_range(&self) -> NumericRange<usize>;

    fn get_exposure_mode(&self) -> String;
    fn set_exposure_mode(&mut self, mode: &str) -> CameraResult<()>;
    fn enumerate_exposure_mode(&self) -> Vec<String>;

    fn get_trigger_mode(&self) -> String;
    fn set_trigger_mode(&mut self, mode: &str) -> CameraResult<()>;
    fn enumerate_trigger_mode(&self) -> Vec<String>;

    fn get_trigger_source(&self) -> String;
    fn set_trigger_source(&mut self, source: &str) -> CameraResult<()>;
    fn enumerate_trigger_source(&self) -> Vec<String>;

    fn get_pixel_format(&self) -> String;
    fn set_pixel_format(&mut self, format: &str) -> CameraResult<()>;
    fn enumerate_pixel_format(&self) -> Vec<String>;

    /// Parameters the device changed on its own since the last call
    ///
    /// Backends with auto-adjusting features (e.g. continuous auto exposure)
    /// report them here; the default reports nothing.
    fn poll_parameter_changes(&mut self) -> Vec<ParameterName> {
        Vec::new()
    }

    /// Read back the full parameter snapshot
    fn parameters(&self) -> DeviceParameters {
        DeviceParameters {
            exposure: RangedValue::new(self.get_exposure(), self.exposure_range()),
            gain: RangedValue::new(self.get_gain(), self.gain_range()),
            width: RangedValue::new(self.get_width(), self.width_range()),
            height: RangedValue::new(self.get_height(), self.height_range()),
            offset_x: RangedValue::new(self.get_offset_x(), self.offset_x_range()),
            offset_y: RangedValue::new(self.get_offset_y(), self.offset_y_range()),
            binning_horizontal: RangedValue::new(
                self.get_binning_horizontal(),
                self.binning_horizontal_range(),
            ),
            binning_vertical: RangedValue::new(
                self.get_binning_vertical(),
                self.binning_vertical_range(),
            ),
            exposure_mode: ChoiceValue::new(
                self.get_exposure_mode(),
                self.enumerate_exposure_mode(),
            ),
            trigger_mode: ChoiceValue::new(self.get_trigger_mode(), self.enumerate_trigger_mode()),
            trigger_source: ChoiceValue::new(
                self.get_trigger_source(),
                self.enumerate_trigger_source(),
            ),
            pixel_format: ChoiceValue::new(self.get_pixel_format(), self.enumerate_pixel_format()),
        }
    }

    /// Read back the current offsets and their ranges
    fn offset_range(&self) -> OffsetRange {
        OffsetRange {
            offset_x: RangedValue::new(self.get_offset_x(), self.offset_x_range()),
            offset_y: RangedValue::new(self.get_offset_y(), self.offset_y_range()),
        }
    }

    /// Read one parameter by name
    fn get_parameter(&self, name: ParameterName) -> ParameterValue {
        match name {
            ParameterName::Exposure => ParameterValue::Float(self.get_exposure()),
            ParameterName::Gain => ParameterValue::Float(self.get_gain()),
            ParameterName::Width => self.get_width().into(),
            ParameterName::Height => self.get_height().into(),
            ParameterName::OffsetX => self.get_offset_x().into(),
            ParameterName::OffsetY => self.get_offset_y().into(),
            ParameterName::BinningHorizontal => self.get_binning_horizontal().into(),
            ParameterName::BinningVertical => self.get_binning_vertical().into(),
            ParameterName::ExposureMode => ParameterValue::Choice(self.get_exposure_mode()),
            ParameterName::TriggerMode => ParameterValue::Choice(self.get_trigger_mode()),
            ParameterName::TriggerSource => ParameterValue::Choice(self.get_trigger_source()),
            ParameterName::PixelFormat => ParameterValue::Choice(self.get_pixel_format()),
        }
    }

    /// Dispatch a named parameter change to the matching setter
    ///
    /// # Returns
    /// * `Err(CameraError::ParameterRejected)` if the value has the wrong kind
    ///   for the parameter or the device refuses it
    fn set_parameter(&mut self, name: ParameterName, value: &ParameterValue) -> CameraResult<()> {
        if name.is_choice() {
            let choice = value
                .as_choice()
                .ok_or_else(|| CameraError::rejected(name, format!("expected text, got {value}")))?;
            return match name {
                ParameterName::ExposureMode => self.set_exposure_mode(choice),
                ParameterName::TriggerMode => self.set_trigger_mode(choice),
                ParameterName::TriggerSource => self.set_trigger_source(choice),
                _ => self.set_pixel_format(choice),
            };
        }

        match name {
            ParameterName::Exposure | ParameterName::Gain => {
                let number = value.as_f64().ok_or_else(|| {
                    CameraError::rejected(name, format!("expected a number, got {value}"))
                })?;
                if name == ParameterName::Exposure {
                    self.set_exposure(number)
                } else {
                    self.set_gain(number)
                }
            }
            _ => {
                let count = value.as_usize().ok_or_else(|| {
                    CameraError::rejected(name, format!("expected a pixel count, got {value}"))
                })?;
                match name {
                    ParameterName::Width => self.set_width(count),
                    ParameterName::Height => self.set_height(count),
                    ParameterName::OffsetX => self.set_offset_x(count),
                    ParameterName::OffsetY => self.set_offset_y(count),
                    ParameterName::BinningHorizontal => self.set_binning_horizontal(count),
                    _ => self.set_binning_vertical(count),
                }
            }
        }
    }
}

/// Reject a choice that the device does not enumerate
pub fn ensure_option(name: ParameterName, value: &str, options: &[String]) -> CameraResult<()> {
    if options.iter().any(|o| o == value) {
        Ok(())
    } else {
        Err(CameraError::rejected(
            name,
            format!("'{value}' is not one of [{}]", options.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_from_duration() {
        let ts = Timestamp::from_duration(Duration::new(10, 123_456_789));
        assert_eq!(ts.seconds, 10);
        assert_eq!(ts.nanos, 123_456_789);

        let ts = Timestamp::from_duration(Duration::from_millis(1500));
        assert_eq!(ts, Timestamp::new(1, 500_000_000));
        assert_eq!(ts.to_duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_timestamp_display() {
        assert_eq!(Timestamp::new(42, 123_456_789).to_string(), "42.123456789");
        assert_eq!(Timestamp::new(0, 1).to_string(), "0.000000001");
    }

    #[test]
    fn test_ensure_option() {
        let options = vec!["Off".to_string(), "On".to_string()];
        assert!(ensure_option(ParameterName::TriggerMode, "On", &options).is_ok());
        let err = ensure_option(ParameterName::TriggerMode, "Maybe", &options).unwrap_err();
        assert!(err.to_string().contains("triggerMode rejected"));
        assert!(err.to_string().contains("Off, On"));
    }
}
