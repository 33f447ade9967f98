//! Beam analysis on raw camera frames
//!
//! - **median**: 3×3 median filter for hot and dead pixel suppression
//! - **gaussian_fit**: bounded Levenberg–Marquardt fit of a 1-D Gaussian
//! - **beam_centroid**: warm-started projection fits producing the centroid
//! - **lineout**: row/column fits through the centroid

pub mod beam_centroid;
pub mod gaussian_fit;
pub mod lineout;
pub mod median;

pub use beam_centroid::{find_beam_center, CentroidResult, EstimatorOptions, FitState};
pub use gaussian_fit::{fit_gaussian, FitError, FitOptions, ProjectionFit};
pub use lineout::{fit_lineouts, Lineouts};
pub use median::median_filter_3x3;
