//! Bounded 1-D Gaussian fitting
//!
//! Fits `A·exp(-C·(x - x0)²) + B` to a sampled curve with the `tiny_solver`
//! Levenberg–Marquardt optimizer, holding the parameters inside box bounds:
//!
//! * `A`, `C`, `B` in `[0, ∞)`
//! * `x0` in `[x[0], x[n-1]]`
//!
//! Width is carried as the precision `C = 1 / (2·σ²)` during the solve, which
//! keeps the model smooth when the width is large, and converted back to `σ`
//! on return.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_solver::factors::na as ts_na;
use tiny_solver::Optimizer;

/// Gaussian parameters for one projection axis, in axis coordinate units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionFit {
    /// Peak height above the offset
    pub amplitude: f64,
    /// Center coordinate
    pub center: f64,
    /// Standard deviation σ
    pub width: f64,
    /// Constant background level
    pub offset: f64,
}

impl ProjectionFit {
    pub fn new(amplitude: f64, center: f64, width: f64, offset: f64) -> Self {
        Self {
            amplitude,
            center,
            width,
            offset,
        }
    }

    /// Model value at coordinate `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        let d = x - self.center;
        self.amplitude * (-d * d / (2.0 * self.width * self.width)).exp() + self.offset
    }

    /// Model sampled at every coordinate, for overlay curves
    pub fn evaluate_all(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&xi| self.evaluate(xi)).collect()
    }

    /// Precision `C = 1 / (2·σ²)`
    pub fn precision(&self) -> f64 {
        1.0 / (2.0 * self.width * self.width)
    }

    /// Width in millimetres given a pixel calibration in micrometres per unit
    pub fn width_physical(&self, pixel_calibration_um: f64) -> f64 {
        self.width * pixel_calibration_um * 1e-3
    }
}

/// Solver limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Maximum number of LM iterations
    pub max_iterations: usize,
    /// Cost reduction, relative to the total signal energy, that still counts
    /// as progress when checking a finished solve for convergence
    pub ftol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-4,
        }
    }
}

/// Why a projection fit produced no usable result
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("need at least 4 samples with matching lengths, got {x} coordinates and {y} values")]
    TooFewSamples { x: usize, y: usize },
    #[error("seed {0:?} is not within bounds")]
    InfeasibleSeed(ProjectionFit),
    #[error("no convergence after {0} iterations")]
    NoConvergence(usize),
    #[error("degenerate solution: {0}")]
    Degenerate(String),
}

const PARAMS: &str = "p";

// Extra iterations run from a finished solve to confirm it has settled
const SETTLE_ITERATIONS: usize = 3;

/// Residuals of `A·exp(-C·(x - x0)²) + B` over every sample
///
/// Parameter vector layout: `[A, x0, C, B]`
#[derive(Debug, Clone)]
struct GaussianFactor {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl<T: ts_na::RealField> tiny_solver::factors::Factor<T> for GaussianFactor {
    fn residual_func(&self, params: &[ts_na::DVector<T>]) -> ts_na::DVector<T> {
        let p = &params[0];
        let residuals = self.x.iter().zip(&self.y).map(|(&xi, &yi)| {
            let d = ts_na::convert::<f64, T>(xi) - p[1].clone();
            let e = (-(p[2].clone() * d.clone() * d)).exp();
            p[0].clone() * e + p[3].clone() - ts_na::convert::<f64, T>(yi)
        });
        ts_na::DVector::<T>::from_iterator(self.x.len(), residuals)
    }
}

fn cost(p: &[f64; 4], x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let d = xi - p[1];
            let r = p[0] * (-p[2] * d * d).exp() + p[3] - yi;
            r * r
        })
        .sum::<f64>()
        * 0.5
}

fn within(p: &[f64; 4], lower: &[f64; 4], upper: &[f64; 4]) -> bool {
    (0..4).all(|i| p[i].is_finite() && p[i] >= lower[i] && p[i] <= upper[i])
}

/// Run the optimizer from `start`; `None` when it fails or leaves the bounds
fn solve(
    problem: &tiny_solver::Problem,
    start: &[f64; 4],
    max_iterations: usize,
    lower: &[f64; 4],
    upper: &[f64; 4],
) -> Option<[f64; 4]> {
    let mut initial_values = HashMap::<String, ts_na::DVector<f64>>::new();
    initial_values.insert(
        PARAMS.to_string(),
        ts_na::DVector::<f64>::from_column_slice(start),
    );

    let optimizer = tiny_solver::LevenbergMarquardtOptimizer::default();
    let options = tiny_solver::OptimizerOptions {
        max_iteration: max_iterations.max(1),
        verbosity_level: 0,
        ..Default::default()
    };
    let result = optimizer.optimize(problem, &initial_values, Some(options))?;
    let values = result.get(PARAMS)?;
    if values.len() != 4 {
        return None;
    }
    let p = [values[0], values[1], values[2], values[3]];
    within(&p, lower, upper).then_some(p)
}

/// Fit a Gaussian to `(x, y)` starting from `seed`
///
/// # Arguments
/// * `x` - Monotonic sample coordinates
/// * `y` - Sample values
/// * `seed` - Starting point; must lie within the bounds
/// * `min_width` - Smallest width accepted as a real beam (one sample spacing)
/// * `options` - Solver limits
pub fn fit_gaussian(
    x: &[f64],
    y: &[f64],
    seed: &ProjectionFit,
    min_width: f64,
    options: &FitOptions,
) -> Result<ProjectionFit, FitError> {
    if x.len() != y.len() || x.len() < 4 {
        return Err(FitError::TooFewSamples {
            x: x.len(),
            y: y.len(),
        });
    }

    let lo = x[0].min(x[x.len() - 1]);
    let hi = x[0].max(x[x.len() - 1]);
    let lower = [0.0, lo, 0.0, 0.0];
    let upper = [f64::MAX, hi, f64::MAX, f64::MAX];

    let start = [seed.amplitude, seed.center, seed.precision(), seed.offset];
    if !(seed.width.is_finite() && seed.width > 0.0) || !within(&start, &lower, &upper) {
        return Err(FitError::InfeasibleSeed(*seed));
    }

    let p = if cost(&start, x, y) == 0.0 {
        start
    } else {
        let mut problem = tiny_solver::Problem::new();
        problem.add_residual_block(
            x.len(),
            &[PARAMS],
            Box::new(GaussianFactor {
                x: x.to_vec(),
                y: y.to_vec(),
            }),
            None,
        );
        for i in 0..4 {
            problem.set_variable_bounds(PARAMS, i, lower[i], upper[i]);
        }

        let no_convergence = FitError::NoConvergence(options.max_iterations);
        let solved = solve(&problem, &start, options.max_iterations, &lower, &upper)
            .ok_or_else(|| no_convergence.clone())?;

        // A settled solve gains nothing measurable from a few more iterations
        let settled = solve(&problem, &solved, SETTLE_ITERATIONS, &lower, &upper)
            .ok_or_else(|| no_convergence.clone())?;
        let energy = 0.5 * y.iter().map(|v| v * v).sum::<f64>();
        let before = cost(&solved, x, y);
        let after = cost(&settled, x, y);
        if before - after > options.ftol * (before + energy) {
            return Err(no_convergence);
        }
        if after < before {
            settled
        } else {
            solved
        }
    };

    let [amplitude, center, precision, offset] = p;
    if amplitude <= 0.0 {
        return Err(FitError::Degenerate(format!("amplitude {amplitude}")));
    }
    if precision <= 0.0 || !precision.is_finite() {
        return Err(FitError::Degenerate(format!("precision {precision}")));
    }
    let width = 1.0 / (2.0 * precision).sqrt();
    if width < min_width {
        return Err(FitError::Degenerate(format!(
            "width {width:.4} below {min_width}"
        )));
    }

    Ok(ProjectionFit {
        amplitude,
        center,
        width,
        offset,
    })
}
