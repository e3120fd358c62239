//! Reporting utilities: grid residuals, band statistics and data-residual
//! rankings.

use crate::domain::GridResidual;
use crate::engine::DataResidual;
use crate::error::AppError;
use crate::models::Vars;

pub mod format;

pub use format::*;

/// Fitted-minus-true value at every knot of every true rate.
///
/// The fit is evaluated at the truth's knots, so grids need not coincide.
pub fn grid_residuals(truth: &Vars, fit: &Vars) -> Result<Vec<GridResidual>, AppError> {
    let mut out = Vec::new();
    for (rate, true_curve) in truth {
        let Some(fit_curve) = fit.get(rate) else {
            return Err(AppError::new(4, format!("Fit has no values for rate {rate}.")));
        };
        let grid = true_curve.grid();
        for (i, j) in grid.indices() {
            let (age, time) = (grid.ages()[i], grid.times()[j]);
            let truth = true_curve.get(i, j);
            let fit = fit_curve.evaluate(age, time);
            if !fit.is_finite() {
                return Err(AppError::new(4, "Non-finite fitted value during residual computation."));
            }
            out.push(GridResidual {
                rate: *rate,
                age,
                time,
                truth,
                fit,
                residual: fit - truth,
            });
        }
    }
    Ok(out)
}

/// Relative residual `fit / truth - 1`, or the absolute residual where the
/// truth is zero.
pub fn relative_residual(r: &GridResidual) -> f64 {
    if r.truth != 0.0 {
        r.fit / r.truth - 1.0
    } else {
        r.residual
    }
}

/// Residual size inside an open age band versus outside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandSummary {
    pub lower: f64,
    pub upper: f64,
    pub inside_count: usize,
    pub outside_count: usize,
    /// Mean absolute relative residual of knots with `lower < age < upper`.
    pub inside_mean_abs: f64,
    pub outside_mean_abs: f64,
    pub max_abs: f64,
}

pub fn band_summary(residuals: &[GridResidual], lower: f64, upper: f64) -> BandSummary {
    let (mut n_in, mut n_out) = (0usize, 0usize);
    let (mut sum_in, mut sum_out) = (0.0, 0.0);
    let mut max_abs = 0.0f64;
    for r in residuals {
        let rel = relative_residual(r).abs();
        if lower < r.age && r.age < upper {
            n_in += 1;
            sum_in += rel;
        } else {
            n_out += 1;
            sum_out += rel;
        }
        max_abs = max_abs.max(r.residual.abs());
    }
    let mean = |sum: f64, n: usize| if n > 0 { sum / n as f64 } else { 0.0 };
    BandSummary {
        lower,
        upper,
        inside_count: n_in,
        outside_count: n_out,
        inside_mean_abs: mean(sum_in, n_in),
        outside_mean_abs: mean(sum_out, n_out),
        max_abs,
    }
}

/// Data rows the fit explains worst, on each side.
#[derive(Debug, Clone)]
pub struct Outliers {
    /// Observations above the model (positive weighted residual).
    pub above: Vec<DataResidual>,
    pub below: Vec<DataResidual>,
}

/// Rank the top data residuals on each side.
pub fn rank_outliers(residuals: &[DataResidual], top_n: usize) -> Outliers {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.weighted_residual.total_cmp(&a.weighted_residual));
    let above = sorted
        .iter()
        .take(top_n)
        .filter(|r| r.weighted_residual > 0.0)
        .cloned()
        .collect();

    let below = sorted
        .iter()
        .rev()
        .take(top_n)
        .filter(|r| r.weighted_residual < 0.0)
        .cloned()
        .collect();

    Outliers { above, below }
}
