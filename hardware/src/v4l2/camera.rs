use super::controls::{ControlMap, ControlType};
use crate::unpack::{unpack_mono_frame, MonoLayout};
use ndarray::Array2;
use shared::camera_interface::{
    ensure_option, CameraError, CameraInterface, CameraResult, FrameMetadata, NumericRange,
    ParameterName, Timestamp,
};
use std::io::ErrorKind;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

const MANUAL_EXPOSURE: &str = "Off";
const AUTO_EXPOSURE: &str = "Continuous";

/// UVC auto exposure menu values
const AUTO_EXPOSURE_MANUAL: i64 = 1;
const AUTO_EXPOSURE_APERTURE_PRIORITY: i64 = 3;

const MMAP_BUFFERS: u32 = 4;

/// Size limits gathered from the driver's frame size enumeration
#[derive(Debug, Clone, Copy)]
struct SizeLimits {
    width: NumericRange<usize>,
    height: NumericRange<usize>,
}

impl SizeLimits {
    fn from_device(device: &Device, fourcc: v4l::FourCC) -> Option<Self> {
        let sizes = device.enum_framesizes(fourcc).ok()?;
        let mut limits: Option<SizeLimits> = None;
        for size in sizes {
            let (min_w, max_w, min_h, max_h) = match size.size {
                FrameSizeEnum::Discrete(d) => (d.width, d.width, d.height, d.height),
                FrameSizeEnum::Stepwise(s) => {
                    (s.min_width, s.max_width, s.min_height, s.max_height)
                }
            };
            let next = SizeLimits {
                width: NumericRange::new(min_w as usize, max_w as usize),
                height: NumericRange::new(min_h as usize, max_h as usize),
            };
            limits = Some(match limits {
                None => next,
                Some(l) => SizeLimits {
                    width: NumericRange::new(
                        l.width.min.min(next.width.min),
                        l.width.max.max(next.width.max),
                    ),
                    height: NumericRange::new(
                        l.height.min.min(next.height.min),
                        l.height.max.max(next.height.max),
                    ),
                },
            });
        }
        limits
    }
}

/// Monochrome V4L2 capture device
///
/// Exposure and gain map onto driver controls, ROI size onto the negotiated
/// format and ROI offsets onto vendor offset controls where the driver has
/// them. Binning and hardware triggering are not exposed through V4L2 and are
/// reported as fixed.
pub struct V4l2Camera {
    device_path: String,
    card: String,
    device: Device,
    stream: Option<MmapStream<'static>>,
    control_map: ControlMap,
    layouts: Vec<MonoLayout>,
    layout: MonoLayout,
    size_limits: SizeLimits,
    width: usize,
    height: usize,
    stride: usize,
    offset_x: usize,
    offset_y: usize,
    exposure_ms: f64,
    gain: f64,
    auto_exposure: bool,
    frame_number: u64,
}

impl V4l2Camera {
    pub fn from_device(device_path: &str) -> CameraResult<Self> {
        let device = Device::with_path(device_path).map_err(|e| {
            CameraError::ConnectionFailed(format!("Failed to open {device_path}: {e}"))
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::ConnectionFailed(format!("Failed to query caps: {e}")))?;

        let layouts: Vec<MonoLayout> = device
            .enum_formats()
            .map_err(|e| CameraError::ConnectionFailed(format!("Failed to list formats: {e}")))?
            .iter()
            .filter_map(|f| MonoLayout::from_fourcc(&f.fourcc.repr))
            .collect();
        let Some(&layout) = layouts.last() else {
            return Err(CameraError::ConnectionFailed(format!(
                "{device_path} offers no GREY or Y16 format"
            )));
        };

        let control_map = ControlMap::from_device(&device)?;
        let fourcc = v4l::FourCC::new(&layout.fourcc());
        let size_limits = SizeLimits::from_device(&device, fourcc).ok_or_else(|| {
            CameraError::ConnectionFailed("Failed to enumerate frame sizes".to_string())
        })?;

        let mut camera = Self {
            device_path: device_path.to_string(),
            card: caps.card,
            device,
            stream: None,
            control_map,
            layout,
            layouts,
            size_limits,
            width: size_limits.width.max,
            height: size_limits.height.max,
            stride: 0,
            offset_x: 0,
            offset_y: 0,
            exposure_ms: 0.0,
            gain: 0.0,
            auto_exposure: false,
            frame_number: 0,
        };
        camera.apply_format()?;
        camera.refresh_controls();

        tracing::info!(
            "Opened {} ({}) at {}x{} {}",
            camera.card,
            camera.device_path,
            camera.width,
            camera.height,
            camera.layout.pixel_format()
        );
        Ok(camera)
    }

    /// Negotiate the current size and layout, then adopt what the driver chose
    fn apply_format(&mut self) -> CameraResult<()> {
        let mut format = self
            .device
            .format()
            .map_err(|e| CameraError::HardwareError(format!("Failed to get format: {e}")))?;
        format.width = self.width as u32;
        format.height = self.height as u32;
        format.fourcc = v4l::FourCC::new(&self.layout.fourcc());

        let actual = self
            .device
            .set_format(&format)
            .map_err(|e| CameraError::HardwareError(format!("Failed to set format: {e}")))?;

        if actual.width as usize != self.width || actual.height as usize != self.height {
            tracing::warn!(
                "Driver adjusted {}x{} to {}x{}",
                self.width,
                self.height,
                actual.width,
                actual.height
            );
        }
        self.width = actual.width as usize;
        self.height = actual.height as usize;
        self.stride = actual.stride as usize;
        if let Some(layout) = MonoLayout::from_fourcc(&actual.fourcc.repr) {
            self.layout = layout;
        }
        Ok(())
    }

    /// Re-read control values the driver may have changed on its own
    fn refresh_controls(&mut self) {
        let map = &self.control_map;
        if let Ok(raw) = map.read_control(&self.device, ControlType::Exposure) {
            self.exposure_ms = raw as f64 * map.exposure_units.ms_per_count();
        }
        if let Ok(raw) = map.read_control(&self.device, ControlType::Gain) {
            self.gain = raw as f64;
        }
        if let Ok(mode) = map.read_control(&self.device, ControlType::AutoExposure) {
            self.auto_exposure = mode != AUTO_EXPOSURE_MANUAL;
        }
        if let Ok(x) = map.read_control(&self.device, ControlType::RoiHOffset) {
            self.offset_x = x.max(0) as usize;
        }
        if let Ok(y) = map.read_control(&self.device, ControlType::RoiVOffset) {
            self.offset_y = y.max(0) as usize;
        }
    }

    fn require_idle(&self, name: ParameterName) -> CameraResult<()> {
        if self.stream.is_some() {
            Err(CameraError::rejected(name, "cannot change while streaming"))
        } else {
            Ok(())
        }
    }

    fn offset_range(&self, control: ControlType) -> NumericRange<usize> {
        self.control_map
            .get(control)
            .map(|info| {
                NumericRange::new(info.minimum.max(0) as usize, info.maximum.max(0) as usize)
            })
            .unwrap_or(NumericRange::new(0, 0))
    }

    fn set_offset(&mut self, control: ControlType, offset: usize) -> CameraResult<usize> {
        if !self.control_map.has(control) {
            return Ok(0);
        }
        let applied = self
            .control_map
            .set_control(&self.device, control, offset as i64)?;
        Ok(applied.max(0) as usize)
    }
}

impl CameraInterface for V4l2Camera {
    fn name(&self) -> &str {
        &self.card
    }

    fn get_serial(&self) -> String {
        // V4L2 has no standard serial number; the node path identifies the device
        self.device_path.clone()
    }

    fn close(&mut self) -> CameraResult<()> {
        self.stream = None;
        Ok(())
    }

    fn start_streaming(&mut self) -> CameraResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = MmapStream::with_buffers(&self.device, Type::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| CameraError::HardwareError(format!("Failed to create stream: {e}")))?;
        self.stream = Some(stream);
        tracing::debug!("Streaming started on {}", self.device_path);
        Ok(())
    }

    fn stop_streaming(&mut self) -> CameraResult<()> {
        if self.stream.take().is_some() {
            tracing::debug!("Streaming stopped on {}", self.device_path);
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    fn get_image(&mut self, timeout: Duration) -> CameraResult<(Array2<u16>, FrameMetadata)> {
        let (width, height, stride, layout) = (self.width, self.height, self.stride, self.layout);
        let stream = self.stream.as_mut().ok_or(CameraError::NotStreaming)?;
        stream.set_timeout(timeout);

        let (buf, meta) = stream.next().map_err(|e| match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => CameraError::Timeout(timeout),
            _ => CameraError::CaptureError(format!("Failed to get frame: {e}")),
        })?;

        let frame = unpack_mono_frame(buf, width, height, stride, layout)
            .map_err(|e| CameraError::CaptureError(e.to_string()))?;
        let timestamp = Timestamp::new(
            meta.timestamp.sec.max(0) as u64,
            (meta.timestamp.usec.max(0) * 1000) as u64,
        );

        self.frame_number += 1;
        let metadata = FrameMetadata {
            frame_number: self.frame_number,
            timestamp,
            exposure_ms: self.exposure_ms,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            binning_horizontal: 1,
            binning_vertical: 1,
        };
        Ok((frame, metadata))
    }

    fn get_exposure(&self) -> f64 {
        self.exposure_ms
    }

    fn set_exposure(&mut self, exposure_ms: f64) -> CameraResult<()> {
        let ms_per_count = self.control_map.exposure_units.ms_per_count();
        let counts = (exposure_ms / ms_per_count).round() as i64;
        let applied = self
            .control_map
            .set_control(&self.device, ControlType::Exposure, counts)?;
        self.exposure_ms = applied as f64 * ms_per_count;
        Ok(())
    }

    fn exposure_range(&self) -> NumericRange<f64> {
        let ms_per_count = self.control_map.exposure_units.ms_per_count();
        self.control_map
            .get(ControlType::Exposure)
            .map(|info| {
                NumericRange::new(
                    info.minimum as f64 * ms_per_count,
                    info.maximum as f64 * ms_per_count,
                )
            })
            .unwrap_or(NumericRange::new(self.exposure_ms, self.exposure_ms))
    }

    fn get_gain(&self) -> f64 {
        self.gain
    }

    fn set_gain(&mut self, gain: f64) -> CameraResult<()> {
        let applied =
            self.control_map
                .set_control(&self.device, ControlType::Gain, gain.round() as i64)?;
        self.gain = applied as f64;
        Ok(())
    }

    fn gain_range(&self) -> NumericRange<f64> {
        self.control_map
            .get(ControlType::Gain)
            .map(|info| NumericRange::new(info.minimum as f64, info.maximum as f64))
            .unwrap_or(NumericRange::new(0.0, 0.0))
    }

    fn get_width(&self) -> usize {
        self.width
    }

    fn set_width(&mut self, width: usize) -> CameraResult<()> {
        self.require_idle(ParameterName::Width)?;
        self.width = self.size_limits.width.clamp(width);
        self.apply_format()
    }

    fn width_range(&self) -> NumericRange<usize> {
        self.size_limits.width
    }

    fn get_height(&self) -> usize {
        self.height
    }

    fn set_height(&mut self, height: usize) -> CameraResult<()> {
        self.require_idle(ParameterName::Height)?;
        self.height = self.size_limits.height.clamp(height);
        self.apply_format()
    }

    fn height_range(&self) -> NumericRange<usize> {
        self.size_limits.height
    }

    fn get_offset_x(&self) -> usize {
        self.offset_x
    }

    fn set_offset_x(&mut self, offset: usize) -> CameraResult<()> {
        self.offset_x = self.set_offset(ControlType::RoiHOffset, offset)?;
        Ok(())
    }

    fn offset_x_range(&self) -> NumericRange<usize> {
        self.offset_range(ControlType::RoiHOffset)
    }

    fn get_offset_y(&self) -> usize {
        self.offset_y
    }

    fn set_offset_y(&mut self, offset: usize) -> CameraResult<()> {
        self.offset_y = self.set_offset(ControlType::RoiVOffset, offset)?;
        Ok(())
    }

    fn offset_y_range(&self) -> NumericRange<usize> {
        self.offset_range(ControlType::RoiVOffset)
    }

    fn get_binning_horizontal(&self) -> usize {
        1
    }

    fn set_binning_horizontal(&mut self, _binning: usize) -> CameraResult<()> {
        Ok(())
    }

    fn binning_horizontal_range(&self) -> NumericRange<usize> {
        NumericRange::new(1, 1)
    }

    fn get_binning_vertical(&self) -> usize {
        1
    }

    fn set_binning_vertical(&mut self, _binning: usize) -> CameraResult<()> {
        Ok(())
    }

    fn binning_vertical_range(&self) -> NumericRange<usize> {
        NumericRange::new(1, 1)
    }

    fn get_exposure_mode(&self) -> String {
        if self.auto_exposure {
            AUTO_EXPOSURE.to_string()
        } else {
            MANUAL_EXPOSURE.to_string()
        }
    }

    fn set_exposure_mode(&mut self, mode: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::ExposureMode,
            mode,
            &self.enumerate_exposure_mode(),
        )?;
        let auto = mode == AUTO_EXPOSURE;
        if self.control_map.has(ControlType::AutoExposure) {
            let value = if auto {
                AUTO_EXPOSURE_APERTURE_PRIORITY
            } else {
                AUTO_EXPOSURE_MANUAL
            };
            self.control_map
                .set_control(&self.device, ControlType::AutoExposure, value)?;
        }
        self.auto_exposure = auto;
        Ok(())
    }

    fn enumerate_exposure_mode(&self) -> Vec<String> {
        let mut modes = vec![MANUAL_EXPOSURE.to_string()];
        if self.control_map.has(ControlType::AutoExposure) {
            modes.push(AUTO_EXPOSURE.to_string());
        }
        modes
    }

    fn get_trigger_mode(&self) -> String {
        "Off".to_string()
    }

    fn set_trigger_mode(&mut self, mode: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::TriggerMode,
            mode,
            &self.enumerate_trigger_mode(),
        )
    }

    fn enumerate_trigger_mode(&self) -> Vec<String> {
        vec!["Off".to_string()]
    }

    fn get_trigger_source(&self) -> String {
        "Software".to_string()
    }

    fn set_trigger_source(&mut self, source: &str) -> CameraResult<()> {
        ensure_option(
            ParameterName::TriggerSource,
            source,
            &self.enumerate_trigger_source(),
        )
    }

    fn enumerate_trigger_source(&self) -> Vec<String> {
        vec!["Software".to_string()]
    }

    fn get_pixel_format(&self) -> String {
        self.layout.pixel_format().to_string()
    }

    fn set_pixel_format(&mut self, format: &str) -> CameraResult<()> {
        self.require_idle(ParameterName::PixelFormat)?;
        ensure_option(
            ParameterName::PixelFormat,
            format,
            &self.enumerate_pixel_format(),
        )?;
        if let Some(layout) = MonoLayout::from_pixel_format(format) {
            self.layout = layout;
            self.apply_format()?;
        }
        Ok(())
    }

    fn enumerate_pixel_format(&self) -> Vec<String> {
        self.layouts
            .iter()
            .map(|l| l.pixel_format().to_string())
            .collect()
    }

    fn poll_parameter_changes(&mut self) -> Vec<ParameterName> {
        if !self.auto_exposure {
            return Vec::new();
        }
        let before = self.exposure_ms;
        self.refresh_controls();
        if (self.exposure_ms - before).abs() > f64::EPSILON {
            vec![ParameterName::Exposure]
        } else {
            Vec::new()
        }
    }
}
