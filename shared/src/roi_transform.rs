//! Mapping between ROI pixel indices and physical sensor coordinates
//!
//! A frame read out with ROI origin `(sx, sy)` (in binned pixels) and scale
//! `s = binning × pixel_size` places the center of pixel `i` at
//! `x[i] = (i + sx + 0.5)·s_x`, and likewise for rows. Fit results live in these
//! coordinates so they stay comparable across ROI and binning changes.

use serde::{Deserialize, Serialize};

use crate::camera_interface::{DeviceParameters, FrameMetadata};

/// ROI origin and per-axis scale for one readout geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoiTransform {
    /// Horizontal ROI offset in binned pixels
    pub origin_x: usize,
    /// Vertical ROI offset in binned pixels
    pub origin_y: usize,
    /// Physical units per binned pixel, horizontally
    pub scale_x: f64,
    /// Physical units per binned pixel, vertically
    pub scale_y: f64,
}

impl Default for RoiTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RoiTransform {
    pub fn new(origin_x: usize, origin_y: usize, scale_x: f64, scale_y: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            scale_x,
            scale_y,
        }
    }

    /// Full-frame, unbinned, one unit per pixel
    pub fn identity() -> Self {
        Self::new(0, 0, 1.0, 1.0)
    }

    /// Build from readout geometry and the physical size of one sensor pixel
    pub fn from_geometry(
        offset_x: usize,
        offset_y: usize,
        binning_horizontal: usize,
        binning_vertical: usize,
        pixel_size: f64,
    ) -> Self {
        Self::new(
            offset_x,
            offset_y,
            binning_horizontal.max(1) as f64 * pixel_size,
            binning_vertical.max(1) as f64 * pixel_size,
        )
    }

    /// Geometry that produced a specific frame
    pub fn from_metadata(metadata: &FrameMetadata, pixel_size: f64) -> Self {
        Self::from_geometry(
            metadata.offset_x,
            metadata.offset_y,
            metadata.binning_horizontal,
            metadata.binning_vertical,
            pixel_size,
        )
    }

    /// Geometry currently configured on a device
    pub fn from_parameters(parameters: &DeviceParameters, pixel_size: f64) -> Self {
        Self::from_geometry(
            parameters.offset_x.value,
            parameters.offset_y.value,
            parameters.binning_horizontal.value,
            parameters.binning_vertical.value,
            pixel_size,
        )
    }

    /// Column index (fractional) to x coordinate of that point
    pub fn index_to_x(&self, index: f64) -> f64 {
        (index + self.origin_x as f64 + 0.5) * self.scale_x
    }

    /// Row index (fractional) to y coordinate
    pub fn index_to_y(&self, index: f64) -> f64 {
        (index + self.origin_y as f64 + 0.5) * self.scale_y
    }

    /// Inverse of [`RoiTransform::index_to_x`]
    pub fn x_to_index(&self, x: f64) -> f64 {
        x / self.scale_x - self.origin_x as f64 - 0.5
    }

    /// Inverse of [`RoiTransform::index_to_y`]
    pub fn y_to_index(&self, y: f64) -> f64 {
        y / self.scale_y - self.origin_y as f64 - 0.5
    }

    /// Pixel-center coordinate arrays for a `width × height` frame
    pub fn axes(&self, width: usize, height: usize) -> PixelAxes {
        PixelAxes {
            x: (0..width).map(|i| self.index_to_x(i as f64)).collect(),
            y: (0..height).map(|j| self.index_to_y(j as f64)).collect(),
            spacing_x: self.scale_x,
            spacing_y: self.scale_y,
        }
    }

    /// Placement of the raw image in physical coordinates
    pub fn display_transform(&self) -> DisplayTransform {
        DisplayTransform {
            translate_x: self.origin_x as f64 * self.scale_x,
            translate_y: self.origin_y as f64 * self.scale_y,
            scale_x: self.scale_x,
            scale_y: self.scale_y,
        }
    }
}

/// Translate-then-scale placement of image pixel space
///
/// Maps an image-space point `(u, v)`, with `(0, 0)` at the top-left corner of
/// the first pixel, to `(translate_x + u·scale_x, translate_y + v·scale_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayTransform {
    pub translate_x: f64,
    pub translate_y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl DisplayTransform {
    pub fn map(&self, u: f64, v: f64) -> (f64, f64) {
        (
            self.translate_x + u * self.scale_x,
            self.translate_y + v * self.scale_y,
        )
    }
}

/// Pixel-center coordinates of every column and row of one frame
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelAxes {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// Distance between adjacent column centers
    pub spacing_x: f64,
    /// Distance between adjacent row centers
    pub spacing_y: f64,
}

impl PixelAxes {
    /// Index of the column whose center is nearest to `x`
    pub fn nearest_column(&self, x: f64) -> Option<usize> {
        nearest_index(&self.x, x)
    }

    /// Index of the row whose center is nearest to `y`
    pub fn nearest_row(&self, y: f64) -> Option<usize> {
        nearest_index(&self.y, y)
    }
}

fn nearest_index(axis: &[f64], value: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - value).abs().total_cmp(&(*b - value).abs()))
        .map(|(i, _)| i)
}
