//! Prior distributions on model variables.
//!
//! Each prior carries a density family, a mean, bounds and whatever dispersion
//! the family needs. Bounds double as box constraints for the optimizer; the
//! density (when not uniform) contributes a weighted residual to the objective.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Density;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PriorError {
    #[error("Bounds contain invalid values: lower={lower} mean={mean} upper={upper}")]
    InvalidBounds { lower: f64, mean: f64, upper: f64 },
    #[error("Bounds are inconsistent: lower={lower} mean={mean} upper={upper}")]
    InconsistentBounds { lower: f64, mean: f64, upper: f64 },
    #[error("Standard deviation must be finite and non-negative: {0}")]
    InvalidStd(f64),
    #[error("Nu must be greater than 2 for Student's densities: {0}")]
    InvalidNu(f64),
    #[error("Eta must be finite and positive for log densities: {0:?}")]
    InvalidEta(Option<f64>),
    #[error("Refitting a prior needs at least one draw, all finite ({0} given).")]
    InvalidDraws(usize),
}

/// A prior on a single model variable (a value or a first difference).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub density: Density,
    pub mean: f64,
    #[serde(with = "lower_bound")]
    pub lower: f64,
    #[serde(with = "upper_bound")]
    pub upper: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nu: Option<f64>,
}

/// Unbounded uniform prior: no information at all.
pub const NO_PRIOR: Prior = Prior {
    density: Density::Uniform,
    mean: 0.0,
    lower: f64::NEG_INFINITY,
    upper: f64::INFINITY,
    std: None,
    eta: None,
    nu: None,
};

/// Constrains the variable to zero.
pub const ZERO: Prior = Prior {
    density: Density::Uniform,
    mean: 0.0,
    lower: 0.0,
    upper: 0.0,
    std: None,
    eta: None,
    nu: None,
};

/// Non-negative values: uniform on `[0, inf)` starting at zero.
pub const NON_NEGATIVE: Prior = Prior {
    density: Density::Uniform,
    mean: 0.0,
    lower: 0.0,
    upper: f64::INFINITY,
    std: None,
    eta: None,
    nu: None,
};

/// Proportions: uniform on `[0, 1]` starting at 0.1.
pub const ZERO_TO_ONE: Prior = Prior {
    density: Density::Uniform,
    mean: 0.1,
    lower: 0.0,
    upper: 1.0,
    std: None,
    eta: None,
    nu: None,
};

pub const MINUS_ONE_TO_ONE: Prior = Prior {
    density: Density::Uniform,
    mean: 0.0,
    lower: -1.0,
    upper: 1.0,
    std: None,
    eta: None,
    nu: None,
};

/// Iteration cap for the Student's location/scale refit.
const STUDENTS_EM_ITERATIONS: usize = 200;

impl Prior {
    /// Uniform on `[lower, upper]`; `mean` is the starting value and defaults to
    /// the midpoint.
    pub fn uniform(lower: f64, upper: f64, mean: Option<f64>) -> Result<Self, PriorError> {
        let mean = mean.unwrap_or(0.5 * (lower + upper));
        validate_bounds(lower, mean, upper)?;
        Ok(Self {
            density: Density::Uniform,
            mean,
            lower,
            upper,
            std: None,
            eta: None,
            nu: None,
        })
    }

    /// Fixes the variable at `value`.
    pub fn constant(value: f64) -> Result<Self, PriorError> {
        Self::uniform(value, value, Some(value))
    }

    /// Unbounded Gaussian; narrow it with [`Prior::with_bounds`].
    pub fn gaussian(mean: f64, std: f64) -> Result<Self, PriorError> {
        Self::with_family(Density::Gaussian, mean, std, None, None)
    }

    pub fn students(mean: f64, std: f64, nu: f64) -> Result<Self, PriorError> {
        Self::with_family(Density::Students, mean, std, None, Some(nu))
    }

    pub fn log_gaussian(mean: f64, std: f64, eta: f64) -> Result<Self, PriorError> {
        Self::with_family(Density::LogGaussian, mean, std, Some(eta), None)
    }

    /// Build any family and validate it.
    pub fn with_family(
        density: Density,
        mean: f64,
        std: f64,
        eta: Option<f64>,
        nu: Option<f64>,
    ) -> Result<Self, PriorError> {
        let prior = Self {
            density,
            mean,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            std: (density != Density::Uniform).then_some(std),
            eta,
            nu,
        };
        prior.validate()?;
        Ok(prior)
    }

    /// Same prior restricted to `[lower, upper]`.
    pub fn with_bounds(self, lower: f64, upper: f64) -> Result<Self, PriorError> {
        let bounded = Self {
            lower,
            upper,
            ..self
        };
        bounded.validate()?;
        Ok(bounded)
    }

    /// Same prior with a different mean, still inside the bounds.
    pub fn with_mean(self, mean: f64) -> Result<Self, PriorError> {
        let moved = Self { mean, ..self };
        moved.validate()?;
        Ok(moved)
    }

    /// Refit the prior to draws of its variable.
    ///
    /// The family, bounds, `eta` and `nu` are kept. The new mean is clamped
    /// into the bounds. Constant priors come back unchanged.
    ///
    /// - uniform: mean of the draws
    /// - gaussian: mean and population standard deviation
    /// - laplace: median, and `sqrt(2)` times the mean absolute deviation
    /// - students: location and scale at the fixed `nu`, with the scale
    ///   converted to a standard deviation by `sqrt(nu / (nu - 2))`
    /// - log families: mean and population standard deviation of the draws
    pub fn mle(&self, draws: &[f64]) -> Result<Self, PriorError> {
        if draws.is_empty() || draws.iter().any(|d| !d.is_finite()) {
            return Err(PriorError::InvalidDraws(draws.len()));
        }
        if self.is_constant() {
            return Ok(*self);
        }

        let (mean, std) = match self.density {
            Density::Uniform => (sample_mean(draws), None),
            Density::Laplace => {
                let m = median(draws);
                let b = draws.iter().map(|x| (x - m).abs()).sum::<f64>() / draws.len() as f64;
                (m, Some(b * std::f64::consts::SQRT_2))
            }
            Density::Students => {
                let nu = self.nu.unwrap_or(f64::NAN);
                if !(nu.is_finite() && nu > 2.0) {
                    return Err(PriorError::InvalidNu(nu));
                }
                let (m, scale) = students_location_scale(draws, nu);
                (m, Some(scale * (nu / (nu - 2.0)).sqrt()))
            }
            Density::Gaussian
            | Density::LogGaussian
            | Density::LogLaplace
            | Density::LogStudents => {
                let m = sample_mean(draws);
                (m, Some(population_std(draws, m)))
            }
        };

        let fitted = Self {
            mean: self.clamp(mean),
            std: std.or(self.std),
            ..*self
        };
        fitted.validate()?;
        Ok(fitted)
    }

    pub fn validate(&self) -> Result<(), PriorError> {
        validate_bounds(self.lower, self.mean, self.upper)?;
        if self.density != Density::Uniform {
            let std = self.std.unwrap_or(f64::NAN);
            if !(std.is_finite() && std >= 0.0) {
                return Err(PriorError::InvalidStd(std));
            }
        }
        if self.density.needs_nu() {
            let nu = self.nu.unwrap_or(f64::NAN);
            if !(nu.is_finite() && nu > 2.0) {
                return Err(PriorError::InvalidNu(nu));
            }
        }
        if self.density.is_log() && !self.eta.is_some_and(|e| e.is_finite() && e > 0.0) {
            return Err(PriorError::InvalidEta(self.eta));
        }
        Ok(())
    }

    /// Lower and upper bounds coincide, up to `1e-8 + 1e-5 * |upper|`.
    pub fn is_constant(&self) -> bool {
        self.lower == self.upper
            || (self.lower.is_finite()
                && self.upper.is_finite()
                && (self.upper - self.lower).abs() <= 1e-8 + 1e-5 * self.upper.abs())
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.max(self.lower).min(self.upper)
    }

    /// Weighted residual `(mean - x) / std` on the density's scale.
    ///
    /// Uniform priors only bound the variable and have no residual. A zero
    /// standard deviation acts as a hard constraint handled by the bounds, so
    /// it also yields no residual.
    pub fn weighted_residual(&self, x: f64) -> Option<f64> {
        if self.density == Density::Uniform {
            return None;
        }
        let std = self.std?;
        if std <= 0.0 {
            return None;
        }
        if self.density.is_log() {
            let eta = self.eta?;
            let sigma = (self.mean + eta + std).ln() - (self.mean + eta).ln();
            Some(((self.mean + eta).ln() - (x + eta).ln()) / sigma)
        } else {
            Some((self.mean - x) / std)
        }
    }
}

fn sample_mean(draws: &[f64]) -> f64 {
    draws.iter().sum::<f64>() / draws.len() as f64
}

fn population_std(draws: &[f64], mean: f64) -> f64 {
    (draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws.len() as f64).sqrt()
}

fn median(draws: &[f64]) -> f64 {
    let mut sorted = draws.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Maximum likelihood location and scale of a Student's t with fixed `nu`,
/// by the usual reweighting fixed point.
fn students_location_scale(draws: &[f64], nu: f64) -> (f64, f64) {
    let n = draws.len() as f64;
    let mut mu = median(draws);
    let mut s2 = draws.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / n;
    for _ in 0..STUDENTS_EM_ITERATIONS {
        if s2 <= 0.0 {
            break;
        }
        let w: Vec<f64> = draws
            .iter()
            .map(|x| (nu + 1.0) / (nu + (x - mu).powi(2) / s2))
            .collect();
        let sw: f64 = w.iter().sum();
        let next_mu = w.iter().zip(draws).map(|(w, x)| w * x).sum::<f64>() / sw;
        let next_s2 = w
            .iter()
            .zip(draws)
            .map(|(w, x)| w * (x - next_mu).powi(2))
            .sum::<f64>()
            / n;
        let settled = (next_mu - mu).abs() <= 1e-12 * (1.0 + mu.abs())
            && (next_s2 - s2).abs() <= 1e-12 * s2;
        mu = next_mu;
        s2 = next_s2;
        if settled {
            break;
        }
    }
    (mu, s2.max(0.0).sqrt())
}

fn validate_bounds(lower: f64, mean: f64, upper: f64) -> Result<(), PriorError> {
    if lower.is_nan() || mean.is_nan() || upper.is_nan() {
        return Err(PriorError::InvalidBounds { lower, mean, upper });
    }
    if !(lower <= mean && mean <= upper) {
        return Err(PriorError::InconsistentBounds { lower, mean, upper });
    }
    Ok(())
}

// JSON has no infinities: an unbounded side is written as null.
mod lower_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_some(v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NEG_INFINITY))
    }
}

mod upper_bound {
    use serde::{Deserialize, Deserializer};

    pub use super::lower_bound::serialize;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}
