//! Device parameter vocabulary shared by every camera backend.
//!
//! Numeric parameters carry their current value together with the inclusive
//! range the device accepts right now; categorical parameters carry the
//! current choice and the options the device enumerates. Ranges are snapshots:
//! changing a structural parameter (size, offset, binning) can move them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::CameraError;

/// Every parameter a camera backend exposes through [`super::CameraInterface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterName {
    /// Exposure time in milliseconds
    Exposure,
    /// Analog gain in dB
    Gain,
    /// ROI width in (binned) pixels
    Width,
    /// ROI height in (binned) pixels
    Height,
    /// ROI horizontal offset in (binned) pixels
    OffsetX,
    /// ROI vertical offset in (binned) pixels
    OffsetY,
    BinningHorizontal,
    BinningVertical,
    ExposureMode,
    TriggerMode,
    TriggerSource,
    PixelFormat,
}

impl ParameterName {
    pub const ALL: [ParameterName; 12] = [
        ParameterName::Exposure,
        ParameterName::Gain,
        ParameterName::Width,
        ParameterName::Height,
        ParameterName::OffsetX,
        ParameterName::OffsetY,
        ParameterName::BinningHorizontal,
        ParameterName::BinningVertical,
        ParameterName::ExposureMode,
        ParameterName::TriggerMode,
        ParameterName::TriggerSource,
        ParameterName::PixelFormat,
    ];

    /// Structural parameters change frame geometry and may clamp each other.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ParameterName::Width
                | ParameterName::Height
                | ParameterName::OffsetX
                | ParameterName::OffsetY
                | ParameterName::BinningHorizontal
                | ParameterName::BinningVertical
        )
    }

    /// Categorical parameters take one of an enumerated set of strings.
    pub fn is_choice(&self) -> bool {
        matches!(
            self,
            ParameterName::ExposureMode
                | ParameterName::TriggerMode
                | ParameterName::TriggerSource
                | ParameterName::PixelFormat
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterName::Exposure => "exposure",
            ParameterName::Gain => "gain",
            ParameterName::Width => "width",
            ParameterName::Height => "height",
            ParameterName::OffsetX => "offsetX",
            ParameterName::OffsetY => "offsetY",
            ParameterName::BinningHorizontal => "binningH",
            ParameterName::BinningVertical => "binningV",
            ParameterName::ExposureMode => "exposureMode",
            ParameterName::TriggerMode => "triggerMode",
            ParameterName::TriggerSource => "triggerSource",
            ParameterName::PixelFormat => "pixelFormat",
        }
    }
}

impl fmt::Display for ParameterName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterName {
    type Err = CameraError;

    /// Accepts the camelCase wire names as well as snake_case spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = match s {
            "exposure" => ParameterName::Exposure,
            "gain" => ParameterName::Gain,
            "width" => ParameterName::Width,
            "height" => ParameterName::Height,
            "offsetX" | "offset_x" => ParameterName::OffsetX,
            "offsetY" | "offset_y" => ParameterName::OffsetY,
            "binningH" | "binning_horizontal" => ParameterName::BinningHorizontal,
            "binningV" | "binning_vertical" => ParameterName::BinningVertical,
            "exposureMode" | "exposure_mode" => ParameterName::ExposureMode,
            "triggerMode" | "trigger_mode" => ParameterName::TriggerMode,
            "triggerSource" | "trigger_source" => ParameterName::TriggerSource,
            "pixelFormat" | "pixel_format" => ParameterName::PixelFormat,
            other => return Err(CameraError::UnknownParameter(other.to_string())),
        };
        Ok(name)
    }
}

/// Value carried by a parameter change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Float(f64),
    Integer(i64),
    Choice(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Integer(v) => Some(*v as f64),
            ParameterValue::Choice(_) => None,
        }
    }

    /// Non-negative integral view used for size, offset and binning.
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParameterValue::Integer(v) => usize::try_from(*v).ok(),
            ParameterValue::Float(v) if v.is_finite() && *v >= 0.0 => Some(v.round() as usize),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            ParameterValue::Choice(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        ParameterValue::Float(value)
    }
}

impl From<usize> for ParameterValue {
    fn from(value: usize) -> Self {
        ParameterValue::Integer(value as i64)
    }
}

impl From<i64> for ParameterValue {
    fn from(value: i64) -> Self {
        ParameterValue::Integer(value)
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        ParameterValue::Choice(value.to_string())
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParameterValue::Float(v) => write!(f, "{v}"),
            ParameterValue::Integer(v) => write!(f, "{v}"),
            ParameterValue::Choice(s) => f.write_str(s),
        }
    }
}

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> NumericRange<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp into the range; an inverted range collapses onto `min`.
    pub fn clamp(&self, value: T) -> T {
        if value < self.min || self.max < self.min {
            self.min
        } else if value > self.max {
            self.max
        } else {
            value
        }
    }
}

/// Current value of a numeric parameter together with its valid range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangedValue<T> {
    pub value: T,
    pub range: NumericRange<T>,
}

impl<T> RangedValue<T> {
    pub fn new(value: T, range: NumericRange<T>) -> Self {
        Self { value, range }
    }
}

/// Current value of a categorical parameter and the options the device offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceValue {
    pub value: String,
    pub options: Vec<String>,
}

impl ChoiceValue {
    pub fn new(value: String, options: Vec<String>) -> Self {
        Self { value, options }
    }
}

/// Full parameter snapshot read back from a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceParameters {
    /// Exposure in milliseconds
    pub exposure: RangedValue<f64>,
    /// Gain in dB
    pub gain: RangedValue<f64>,
    pub width: RangedValue<usize>,
    pub height: RangedValue<usize>,
    pub offset_x: RangedValue<usize>,
    pub offset_y: RangedValue<usize>,
    pub binning_horizontal: RangedValue<usize>,
    pub binning_vertical: RangedValue<usize>,
    pub exposure_mode: ChoiceValue,
    pub trigger_mode: ChoiceValue,
    pub trigger_source: ChoiceValue,
    pub pixel_format: ChoiceValue,
}

impl DeviceParameters {
    /// Current value of one parameter from the snapshot.
    pub fn value_of(&self, name: ParameterName) -> ParameterValue {
        match name {
            ParameterName::Exposure => ParameterValue::Float(self.exposure.value),
            ParameterName::Gain => ParameterValue::Float(self.gain.value),
            ParameterName::Width => self.width.value.into(),
            ParameterName::Height => self.height.value.into(),
            ParameterName::OffsetX => self.offset_x.value.into(),
            ParameterName::OffsetY => self.offset_y.value.into(),
            ParameterName::BinningHorizontal => self.binning_horizontal.value.into(),
            ParameterName::BinningVertical => self.binning_vertical.value.into(),
            ParameterName::ExposureMode => self.exposure_mode.value.as_str().into(),
            ParameterName::TriggerMode => self.trigger_mode.value.as_str().into(),
            ParameterName::TriggerSource => self.trigger_source.value.as_str().into(),
            ParameterName::PixelFormat => self.pixel_format.value.as_str().into(),
        }
    }

    pub fn offset_range(&self) -> OffsetRange {
        OffsetRange {
            offset_x: self.offset_x,
            offset_y: self.offset_y,
        }
    }
}

/// ROI offsets and the ranges they may currently take.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetRange {
    pub offset_x: RangedValue<usize>,
    pub offset_y: RangedValue<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_and_snake_names() {
        for name in ParameterName::ALL {
            assert_eq!(name.as_str().parse::<ParameterName>().unwrap(), name);
        }
        assert_eq!(
            "binning_vertical".parse::<ParameterName>().unwrap(),
            ParameterName::BinningVertical
        );
        assert!(matches!(
            "focus".parse::<ParameterName>(),
            Err(CameraError::UnknownParameter(_))
        ));
    }

    #[test]
    fn test_structural_classification() {
        let structural: Vec<_> = ParameterName::ALL
            .iter()
            .filter(|n| n.is_structural())
            .collect();
        assert_eq!(structural.len(), 6);
        assert!(!ParameterName::Exposure.is_structural());
        assert!(ParameterName::PixelFormat.is_choice());
        assert!(!ParameterName::Width.is_choice());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(ParameterValue::Float(511.6).as_usize(), Some(512));
        assert_eq!(ParameterValue::Integer(-3).as_usize(), None);
        assert_eq!(ParameterValue::Float(-1.0).as_usize(), None);
        assert_eq!(ParameterValue::Integer(7).as_f64(), Some(7.0));
        assert_eq!(ParameterValue::from("Mono8").as_choice(), Some("Mono8"));
        assert_eq!(ParameterValue::from("Mono8").as_f64(), None);
    }

    #[test]
    fn test_range_clamp() {
        let range = NumericRange::new(4usize, 1024);
        assert_eq!(range.clamp(2), 4);
        assert_eq!(range.clamp(2000), 1024);
        assert_eq!(range.clamp(512), 512);
        assert!(range.contains(4));
        assert!(!range.contains(1025));

        let inverted = NumericRange::new(10usize, 5);
        assert_eq!(inverted.clamp(7), 10);
    }
}
