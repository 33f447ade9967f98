use shared::camera_interface::{CameraError, CameraResult, NumericRange, ParameterName};
use std::collections::HashMap;
use v4l::prelude::*;

/// Driver controls the adapter knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlType {
    Exposure,
    Gain,
    AutoExposure,
    RoiHOffset,
    RoiVOffset,
}

impl ControlType {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Exposure" | "exposure" | "Exposure (Absolute)" | "Exposure Time, Absolute" => {
                Some(ControlType::Exposure)
            }
            "Gain" | "gain" | "Analogue Gain" => Some(ControlType::Gain),
            "Auto Exposure" | "auto_exposure" | "Exposure, Auto" => Some(ControlType::AutoExposure),
            "ROI hor. start pos" => Some(ControlType::RoiHOffset),
            "ROI ver. start pos" => Some(ControlType::RoiVOffset),
            _ => None,
        }
    }

    fn parameter(&self) -> ParameterName {
        match self {
            ControlType::Exposure => ParameterName::Exposure,
            ControlType::Gain => ParameterName::Gain,
            ControlType::AutoExposure => ParameterName::ExposureMode,
            ControlType::RoiHOffset => ParameterName::OffsetX,
            ControlType::RoiVOffset => ParameterName::OffsetY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlInfo {
    pub id: u32,
    pub control_type: v4l::control::Type,
    pub minimum: i64,
    pub maximum: i64,
    pub step: u64,
    /// Menu entries as (value, label), empty for non-menu controls
    pub menu: Vec<(u32, String)>,
}

impl ControlInfo {
    pub fn range(&self) -> NumericRange<i64> {
        NumericRange::new(self.minimum, self.maximum)
    }
}

/// Exposure control units differ by driver
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExposureUnits {
    /// Sensor drivers report microseconds
    Microseconds,
    /// UVC `exposure_time_absolute` counts 100 µs steps
    HundredMicroseconds,
}

impl ExposureUnits {
    pub fn ms_per_count(&self) -> f64 {
        match self {
            ExposureUnits::Microseconds => 1e-3,
            ExposureUnits::HundredMicroseconds => 0.1,
        }
    }
}

pub struct ControlMap {
    controls: HashMap<ControlType, ControlInfo>,
    pub exposure_units: ExposureUnits,
}

impl ControlMap {
    pub fn from_device(device: &Device) -> CameraResult<Self> {
        let mut controls = HashMap::new();
        let mut exposure_units = ExposureUnits::Microseconds;

        let control_descs = device
            .query_controls()
            .map_err(|e| CameraError::HardwareError(format!("Failed to query controls: {e}")))?;

        for desc in control_descs {
            let Some(ct) = ControlType::from_name(desc.name.as_str()) else {
                continue;
            };
            if ct == ControlType::Exposure && desc.name.contains("Absolute") {
                exposure_units = ExposureUnits::HundredMicroseconds;
            }

            let menu = desc
                .items
                .as_ref()
                .map(|items| {
                    items
                        .iter()
                        .map(|(value, item)| (*value, item.to_string()))
                        .collect()
                })
                .unwrap_or_default();

            tracing::debug!(
                "Control {:?} -> '{}' [{}, {}] step {}",
                ct,
                desc.name,
                desc.minimum,
                desc.maximum,
                desc.step
            );
            controls.insert(
                ct,
                ControlInfo {
                    id: desc.id,
                    control_type: desc.typ,
                    minimum: desc.minimum,
                    maximum: desc.maximum,
                    step: desc.step,
                    menu,
                },
            );
        }

        if !controls.contains_key(&ControlType::Exposure) {
            return Err(CameraError::ConnectionFailed(
                "device has no exposure control".to_string(),
            ));
        }

        Ok(Self {
            controls,
            exposure_units,
        })
    }

    pub fn get(&self, control_type: ControlType) -> Option<&ControlInfo> {
        self.controls.get(&control_type)
    }

    pub fn has(&self, control_type: ControlType) -> bool {
        self.controls.contains_key(&control_type)
    }

    fn require(&self, control_type: ControlType) -> CameraResult<&ControlInfo> {
        self.get(control_type).ok_or_else(|| {
            CameraError::rejected(control_type.parameter(), "not supported by this device")
        })
    }

    pub fn read_control(&self, device: &Device, control_type: ControlType) -> CameraResult<i64> {
        let info = self.require(control_type)?;
        let control = device
            .control(info.id)
            .map_err(|e| CameraError::HardwareError(format!("Failed to read control: {e}")))?;
        match control.value {
            v4l::control::Value::Integer(v) => Ok(v),
            v4l::control::Value::Boolean(b) => Ok(b as i64),
            other => Err(CameraError::HardwareError(format!(
                "Unexpected value {other:?} for {control_type:?}"
            ))),
        }
    }

    /// Write a control, clamping to the range the driver advertises
    pub fn set_control(
        &self,
        device: &Device,
        control_type: ControlType,
        value: i64,
    ) -> CameraResult<i64> {
        let info = self.require(control_type)?;
        let clamped = info.range().clamp(value);

        let control_value = match info.control_type {
            v4l::control::Type::Boolean => v4l::control::Value::Boolean(clamped != 0),
            _ => v4l::control::Value::Integer(clamped),
        };

        device
            .set_control(v4l::Control {
                id: info.id,
                value: control_value,
            })
            .map_err(|e| {
                CameraError::rejected(control_type.parameter(), format!("driver refused: {e}"))
            })?;

        Ok(clamped)
    }
}
