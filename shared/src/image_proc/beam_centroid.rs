//! Warm-started beam centroiding from image projections
//!
//! The frame is collapsed onto each axis and a Gaussian is fitted to each
//! projection independently. The fitted width of the previous frame seeds the
//! next one, so a stable beam converges in a handful of solver iterations.
//! When a fit fails the seed stands in for it, which keeps the centroid
//! readout alive on empty or noisy frames.

use ndarray::{ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::gaussian_fit::{fit_gaussian, FitError, FitOptions, ProjectionFit};
use super::median::median_filter_3x3;
use crate::roi_transform::PixelAxes;

/// Tuning for [`find_beam_center`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorOptions {
    /// Run a 3×3 median filter before projecting
    pub median_filter: bool,
    /// Seed width, in pixels, when no usable previous width exists
    pub default_width_px: f64,
    /// Smallest width, in pixels, accepted from a fit or carried as a seed
    pub min_width_px: f64,
    /// Number of leading projection samples averaged for the offset seed
    pub offset_samples: usize,
    pub fit: FitOptions,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            median_filter: false,
            default_width_px: 10.0,
            min_width_px: 1.0,
            offset_samples: 10,
            fit: FitOptions::default(),
        }
    }
}

/// Warm-start state carried from one frame to the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitState {
    pub x: Option<ProjectionFit>,
    pub y: Option<ProjectionFit>,
}

impl FitState {
    /// Drop any carried state, e.g. after a disconnect
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_cold(&self) -> bool {
        self.x.is_none() && self.y.is_none()
    }
}

/// Outcome of centroiding one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidResult {
    /// Effective (x, y) center in axis coordinates
    pub centroid: (f64, f64),
    /// Fitted x parameters, `None` if the fit failed
    pub fit_x: Option<ProjectionFit>,
    /// Fitted y parameters, `None` if the fit failed
    pub fit_y: Option<ProjectionFit>,
    pub seed_x: ProjectionFit,
    pub seed_y: ProjectionFit,
    /// Column sums
    pub x_projection: Vec<f64>,
    /// Row sums
    pub y_projection: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl CentroidResult {
    /// x fit if it succeeded, otherwise the seed
    pub fn effective_x(&self) -> ProjectionFit {
        self.fit_x.unwrap_or(self.seed_x)
    }

    /// y fit if it succeeded, otherwise the seed
    pub fn effective_y(&self) -> ProjectionFit {
        self.fit_y.unwrap_or(self.seed_y)
    }

    /// Warm-start state for the next frame
    pub fn next_state(&self) -> FitState {
        FitState {
            x: Some(self.effective_x()),
            y: Some(self.effective_y()),
        }
    }

    pub fn both_fits_converged(&self) -> bool {
        self.fit_x.is_some() && self.fit_y.is_some()
    }
}

/// Declared spacing if set, otherwise derived from the axis end points
fn axis_spacing(axis: &[f64], declared: f64) -> f64 {
    if declared > 0.0 {
        return declared;
    }
    match axis {
        [first, .., last] => (last - first).abs() / (axis.len() - 1) as f64,
        _ => 1.0,
    }
}

/// Seed for one projection
///
/// Amplitude and center come from the projection maximum, the offset from the
/// leading samples; only the width is carried over from `previous`.
fn seed_projection(
    axis: &[f64],
    projection: ArrayView1<f64>,
    previous: Option<&ProjectionFit>,
    spacing: f64,
    options: &EstimatorOptions,
) -> ProjectionFit {
    let (argmax, max) = projection
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
            if v > bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });
    let amplitude = if max.is_finite() && max >= 0.0 { max } else { 1.0 };
    let center = axis.get(argmax).copied().unwrap_or(0.0);

    let n = options.offset_samples.clamp(1, projection.len().max(1));
    let leading = projection.iter().take(n);
    let offset = if projection.is_empty() {
        0.0
    } else {
        leading.sum::<f64>() / n as f64
    };

    let min_width = options.min_width_px * spacing;
    let width = match previous {
        Some(fit) if fit.width.is_finite() && fit.width >= min_width => fit.width,
        _ => options.default_width_px * spacing,
    };

    ProjectionFit {
        amplitude,
        center,
        width,
        offset,
    }
}

fn fit_axis(
    label: &str,
    axis: &[f64],
    projection: &[f64],
    seed: &ProjectionFit,
    min_width: f64,
    options: &FitOptions,
) -> Option<ProjectionFit> {
    match fit_gaussian(axis, projection, seed, min_width, options) {
        Ok(fit) => Some(fit),
        Err(e @ FitError::InfeasibleSeed(_)) => {
            tracing::warn!("{label} projection fit failed: {e}");
            None
        }
        Err(e) => {
            tracing::debug!("{label} projection fit failed, using seed: {e}");
            None
        }
    }
}

/// Estimate the beam centroid and widths of one frame
///
/// # Arguments
/// * `frame` - Raw image, `height × width`
/// * `axes` - Pixel-center coordinates of every column and row of `frame`
/// * `state` - Fits carried over from the previous frame
/// * `options` - Filtering, seeding and solver settings
///
/// # Returns
/// A [`CentroidResult`] whose centroid is always populated; on fit failure the
/// corresponding seed is used. Never fails.
pub fn find_beam_center(
    frame: &ArrayView2<u16>,
    axes: &PixelAxes,
    state: &FitState,
    options: &EstimatorOptions,
) -> CentroidResult {
    let filtered;
    let image = if options.median_filter {
        filtered = median_filter_3x3(frame);
        filtered.view()
    } else {
        frame.view()
    };

    let x_projection = image.fold_axis(Axis(0), 0.0, |acc, &v| acc + v as f64);
    let y_projection = image.fold_axis(Axis(1), 0.0, |acc, &v| acc + v as f64);

    let spacing_x = axis_spacing(&axes.x, axes.spacing_x);
    let spacing_y = axis_spacing(&axes.y, axes.spacing_y);

    let seed_x = seed_projection(
        &axes.x,
        x_projection.view(),
        state.x.as_ref(),
        spacing_x,
        options,
    );
    let seed_y = seed_projection(
        &axes.y,
        y_projection.view(),
        state.y.as_ref(),
        spacing_y,
        options,
    );

    let x_projection = x_projection.to_vec();
    let y_projection = y_projection.to_vec();

    let fit_x = fit_axis(
        "x",
        &axes.x,
        &x_projection,
        &seed_x,
        options.min_width_px * spacing_x,
        &options.fit,
    );
    let fit_y = fit_axis(
        "y",
        &axes.y,
        &y_projection,
        &seed_y,
        options.min_width_px * spacing_y,
        &options.fit,
    );

    let center_x = fit_x.unwrap_or(seed_x).center;
    let center_y = fit_y.unwrap_or(seed_y).center;

    CentroidResult {
        centroid: (center_x, center_y),
        fit_x,
        fit_y,
        seed_x,
        seed_y,
        x_projection,
        y_projection,
        x: axes.x.clone(),
        y: axes.y.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roi_transform::RoiTransform;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Separable Gaussian spot evaluated at pixel centers
    fn gaussian_frame(
        width: usize,
        height: usize,
        cx: f64,
        cy: f64,
        sigma: f64,
        amplitude: f64,
        background: f64,
    ) -> Array2<u16> {
        Array2::from_shape_fn((height, width), |(row, col)| {
            let dx = col as f64 + 0.5 - cx;
            let dy = row as f64 + 0.5 - cy;
            let v = amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp() + background;
            v.round() as u16
        })
    }

    fn float_frame(width: usize, height: usize, cx: f64, cy: f64, sigma: f64) -> Array2<u16> {
        // Large amplitude keeps rounding error negligible
        gaussian_frame(width, height, cx, cy, sigma, 60000.0, 0.0)
    }

    #[test]
    fn test_recovers_center_and_width() {
        let frame = float_frame(256, 200, 101.3, 87.8, 6.0);
        let axes = RoiTransform::identity().axes(256, 200);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        assert!(result.both_fits_converged());
        assert_relative_eq!(result.centroid.0, 101.3, epsilon = 0.05);
        assert_relative_eq!(result.centroid.1, 87.8, epsilon = 0.05);
        assert_relative_eq!(result.effective_x().width, 6.0, epsilon = 0.05);
        assert_relative_eq!(result.effective_y().width, 6.0, epsilon = 0.05);
        assert_eq!(result.x_projection.len(), 256);
        assert_eq!(result.y_projection.len(), 200);
    }

    #[test]
    fn test_warm_start_matches_cold_start() {
        let frame = float_frame(160, 160, 70.2, 90.6, 9.0);
        let axes = RoiTransform::identity().axes(160, 160);
        let options = EstimatorOptions::default();

        let cold = find_beam_center(&frame.view(), &axes, &FitState::default(), &options);
        let warm = find_beam_center(&frame.view(), &axes, &cold.next_state(), &options);

        assert_relative_eq!(warm.centroid.0, cold.centroid.0, epsilon = 1e-6);
        assert_relative_eq!(warm.centroid.1, cold.centroid.1, epsilon = 1e-6);
        assert_relative_eq!(
            warm.effective_x().width,
            cold.effective_x().width,
            epsilon = 1e-6
        );
        assert_eq!(warm.seed_x.width, cold.effective_x().width);
        assert_eq!(cold.seed_x.width, 10.0);
    }

    #[test]
    fn test_centers_within_axis_bounds() {
        // Beam centered off the left and bottom edges
        let frame = float_frame(64, 64, -20.0, 80.0, 12.0);
        let axes = RoiTransform::from_geometry(100, 0, 1, 1, 1.0).axes(64, 64);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        let (cx, cy) = result.centroid;
        assert!(cx >= axes.x[0] && cx <= axes.x[63]);
        assert!(cy >= axes.y[0] && cy <= axes.y[63]);
    }

    #[test]
    fn test_hot_pixel_never_narrower_than_a_pixel() {
        let mut frame = Array2::<u16>::from_elem((100, 100), 20);
        frame[[40, 70]] = u16::MAX;
        let axes = RoiTransform::identity().axes(100, 100);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        assert!(result.effective_x().width >= 1.0);
        assert!(result.effective_y().width >= 1.0);
        assert!(result.next_state().x.map_or(false, |f| f.width >= 1.0));
    }

    #[test]
    fn test_median_filter_removes_hot_pixel() {
        let mut frame = gaussian_frame(128, 128, 40.0, 90.0, 5.0, 3000.0, 10.0);
        frame[[10, 120]] = u16::MAX;
        let axes = RoiTransform::identity().axes(128, 128);
        let options = EstimatorOptions {
            median_filter: true,
            ..EstimatorOptions::default()
        };

        let result = find_beam_center(&frame.view(), &axes, &FitState::default(), &options);
        assert!(result.both_fits_converged());
        assert_relative_eq!(result.centroid.0, 40.0, epsilon = 0.2);
        assert_relative_eq!(result.centroid.1, 90.0, epsilon = 0.2);
    }

    #[test]
    fn test_all_zero_frame_falls_back_to_seed() {
        let frame = Array2::<u16>::zeros((48, 64));
        let axes = RoiTransform::identity().axes(64, 48);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        assert!(result.fit_x.is_none());
        assert!(result.fit_y.is_none());
        assert_eq!(result.centroid, (result.seed_x.center, result.seed_y.center));
        assert_eq!(result.centroid, (0.5, 0.5));
        assert_eq!(result.next_state().y, Some(result.seed_y));
    }

    #[test]
    fn test_y_failure_uses_y_seed() {
        // A single lit row gives a clean x profile but a one-pixel y spike
        let beam = float_frame(120, 120, 60.0, 60.0, 8.0);
        let mut frame = Array2::<u16>::zeros((120, 120));
        frame.row_mut(100).assign(&beam.row(60));
        let axes = RoiTransform::identity().axes(120, 120);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        assert!(result.fit_x.is_some());
        assert!(result.fit_y.is_none());
        assert_relative_eq!(result.centroid.0, 60.0, epsilon = 0.01);
        assert_eq!(result.centroid.1, result.seed_y.center);
        assert_eq!(result.effective_y(), result.seed_y);
    }

    #[test]
    fn test_scaled_axes() {
        let frame = float_frame(200, 150, 120.25, 60.75, 7.0);
        let transform = RoiTransform::from_geometry(0, 0, 1, 1, 3.45);
        let axes = transform.axes(200, 150);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        assert_relative_eq!(result.centroid.0, 120.25 * 3.45, epsilon = 0.05 * 3.45);
        assert_relative_eq!(result.effective_y().width, 7.0 * 3.45, epsilon = 0.05 * 3.45);
    }

    #[test]
    fn test_noisy_frame_close_to_truth() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut frame = gaussian_frame(300, 300, 150.4, 120.9, 10.0, 800.0, 20.0);
        frame.mapv_inplace(|v| v + rng.gen_range(0..10));
        let axes = RoiTransform::identity().axes(300, 300);
        let result = find_beam_center(
            &frame.view(),
            &axes,
            &FitState::default(),
            &EstimatorOptions::default(),
        );

        assert!(result.both_fits_converged());
        assert_relative_eq!(result.centroid.0, 150.4, epsilon = 0.2);
        assert_relative_eq!(result.centroid.1, 120.9, epsilon = 0.2);
    }

    #[test]
    fn test_fit_state_reset() {
        let mut state = FitState {
            x: Some(ProjectionFit::new(1.0, 2.0, 3.0, 4.0)),
            y: None,
        };
        assert!(!state.is_cold());
        state.reset();
        assert!(state.is_cold());
    }
}
