//! Ground-truth mortality for the demo: a three-term Siler hazard.
//!
//! ```text
//! mu(a) = a1 exp(-b1 a) + a2 + a3 exp(b3 a)
//! ```
//!
//! The first term is infant mortality falling off quickly, the second a
//! constant background, the third Gompertz-style senescence.

use crate::domain::{RateName, ScenarioConfig};
use crate::models::{AgeTimeGrid, GridError, RateCurve, Vars};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Siler {
    pub a1: f64,
    pub b1: f64,
    pub a2: f64,
    pub a3: f64,
    pub b3: f64,
}

impl Default for Siler {
    fn default() -> Self {
        Self {
            a1: 0.05,
            b1: 2.0,
            a2: 5e-4,
            a3: 3e-5,
            b3: 0.095,
        }
    }
}

impl Siler {
    pub fn hazard(&self, age: f64) -> f64 {
        self.a1 * (-self.b1 * age).exp() + self.a2 + self.a3 * (self.b3 * age).exp()
    }
}

/// Knot ages `0, step, ..., age_max` (the last knot is `age_max` itself).
pub fn knot_ages(age_max: f64, step: f64) -> Vec<f64> {
    let n = (age_max / step).round().max(1.0) as usize;
    (0..=n).map(|i| (i as f64 * step).min(age_max)).collect()
}

pub fn truth_grid(config: &ScenarioConfig) -> Result<AgeTimeGrid, GridError> {
    AgeTimeGrid::new(knot_ages(config.age_max, config.age_step), vec![config.time])
}

/// The hazard sampled on the grid, as other-cause mortality.
pub fn truth_vars(hazard: &Siler, grid: AgeTimeGrid) -> Result<Vars, GridError> {
    let omega = RateCurve::from_fn(grid, |age, _| hazard.hazard(age))?;
    Ok(Vars::from([(RateName::Omega, omega)]))
}
