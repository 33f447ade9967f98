//! Single-row and single-column fits through the beam centroid
//!
//! Complements the projection fits: a lineout samples the beam profile at the
//! centroid instead of integrating it, which exposes clipping and asymmetry the
//! projections average away.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::gaussian_fit::{fit_gaussian, FitOptions, ProjectionFit};
use crate::roi_transform::PixelAxes;

/// Seed precision for lineout fits (σ ≈ 22 units)
const SEED_PRECISION: f64 = 0.001;

/// Row and column profiles through the centroid and their fits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineouts {
    /// Index of the row sampled for the x profile
    pub row: usize,
    /// Index of the column sampled for the y profile
    pub column: usize,
    pub x_profile: Vec<f64>,
    pub y_profile: Vec<f64>,
    pub fit_x: Option<ProjectionFit>,
    pub fit_y: Option<ProjectionFit>,
}

fn fit_profile(
    axis: &[f64],
    profile: &[f64],
    center: f64,
    min_width: f64,
    options: &FitOptions,
) -> Option<ProjectionFit> {
    let (&first, &last) = (axis.first()?, axis.last()?);
    let amplitude = profile.iter().copied().fold(0.0, f64::max);
    let seed = ProjectionFit {
        amplitude,
        center: center.clamp(first.min(last), first.max(last)),
        width: 1.0 / (2.0 * SEED_PRECISION).sqrt(),
        offset: profile.first().copied().unwrap_or(0.0).max(0.0),
    };
    fit_gaussian(axis, profile, &seed, min_width, options)
        .map_err(|e| tracing::debug!("lineout fit failed: {e}"))
        .ok()
}

/// Extract and fit the row and column passing through `centroid`
///
/// Returns `None` when the frame is empty.
pub fn fit_lineouts(
    frame: &ArrayView2<u16>,
    axes: &PixelAxes,
    centroid: (f64, f64),
    options: &FitOptions,
) -> Option<Lineouts> {
    let row = axes.nearest_row(centroid.1)?;
    let column = axes.nearest_column(centroid.0)?;
    if row >= frame.nrows() || column >= frame.ncols() {
        return None;
    }

    let x_profile: Vec<f64> = frame.row(row).iter().map(|&v| v as f64).collect();
    let y_profile: Vec<f64> = frame.column(column).iter().map(|&v| v as f64).collect();

    let fit_x = fit_profile(&axes.x, &x_profile, centroid.0, axes.spacing_x, options);
    let fit_y = fit_profile(&axes.y, &y_profile, centroid.1, axes.spacing_y, options);

    Some(Lineouts {
        row,
        column,
        x_profile,
        y_profile,
        fit_x,
        fit_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi_transform::RoiTransform;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_lineouts_through_spot() {
        let frame = Array2::from_shape_fn((120, 160), |(row, col)| {
            let dx = col as f64 + 0.5 - 80.3;
            let dy = row as f64 + 0.5 - 50.6;
            (4000.0 * (-(dx * dx + dy * dy) / (2.0 * 9.0 * 9.0)).exp() + 30.0).round() as u16
        });
        let axes = RoiTransform::identity().axes(160, 120);

        let lineouts = fit_lineouts(&frame.view(), &axes, (80.3, 50.6), &FitOptions::default())
            .unwrap();
        assert_eq!(lineouts.row, 50);
        assert_eq!(lineouts.column, 80);
        assert_eq!(lineouts.x_profile.len(), 160);

        let fit_x = lineouts.fit_x.unwrap();
        assert_relative_eq!(fit_x.center, 80.3, epsilon = 0.05);
        assert_relative_eq!(fit_x.width, 9.0, epsilon = 0.05);
        let fit_y = lineouts.fit_y.unwrap();
        assert_relative_eq!(fit_y.center, 50.6, epsilon = 0.05);
    }

    #[test]
    fn test_empty_frame() {
        let frame = Array2::<u16>::zeros((0, 0));
        let axes = RoiTransform::identity().axes(0, 0);
        assert!(fit_lineouts(&frame.view(), &axes, (0.0, 0.0), &FitOptions::default()).is_none());
    }
}
