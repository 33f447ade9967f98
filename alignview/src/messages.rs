//! Commands to and events from the acquisition worker

use ndarray::Array2;
use shared::camera_interface::{
    CameraError, DeviceParameters, FrameMetadata, OffsetRange, ParameterName, ParameterValue,
};
use shared::image_proc::{CentroidResult, Lineouts};
use shared::roi_transform::RoiTransform;
use std::sync::Arc;
use std::time::Duration;

/// Requests accepted by the acquisition worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// Open a device by the id its provider enumerates
    Connect(String),
    Disconnect,
    StartStreaming,
    StopStreaming,
    ChangeParameter {
        name: ParameterName,
        value: ParameterValue,
    },
    RequestParameters,
    RequestOffsetRange,
    /// Close the device and end the worker thread
    Shutdown,
}

/// One analysed frame
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub frame: Arc<Array2<u16>>,
    pub metadata: FrameMetadata,
    /// Geometry the fit coordinates are expressed in
    pub transform: RoiTransform,
    pub centroid: CentroidResult,
    pub lineouts: Option<Lineouts>,
    /// Rolling frames per second, once known
    pub frame_rate: Option<f64>,
}

impl ProcessedFrame {
    /// Effective x and y widths in millimetres
    pub fn widths_mm(&self, pixel_calibration_um: f64) -> (f64, f64) {
        (
            self.centroid
                .effective_x()
                .width_physical(pixel_calibration_um),
            self.centroid
                .effective_y()
                .width_physical(pixel_calibration_um),
        )
    }
}

/// Notifications emitted by the acquisition worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Connected(DeviceParameters),
    ConnectionFailed(CameraError),
    ParametersUpdated(DeviceParameters),
    OffsetRangeUpdated(OffsetRange),
    ImageTransformUpdated(RoiTransform),
    FrameProcessed(Box<ProcessedFrame>),
    FrameTimeout { waited: Duration },
    Disconnected,
}

impl WorkerEvent {
    pub fn is_frame(&self) -> bool {
        matches!(self, WorkerEvent::FrameProcessed(_))
    }
}

/// A message stamped with a command sequence number
///
/// Commands carry their own number; events carry the number of the last
/// command the worker had applied when the event was produced.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub seq: u64,
    pub message: T,
}

impl<T> Envelope<T> {
    pub fn new(seq: u64, message: T) -> Self {
        Self { seq, message }
    }
}
