//! Priors attached to every point of an age/time grid.
//!
//! At each grid point there is a value prior, a prior on the forward difference
//! to the next age (`dage`) and one on the forward difference to the next time
//! (`dtime`). The last age has no `dage` neighbour and the last time has no
//! `dtime` neighbour; the priors stored there are never read.

use serde::{Deserialize, Serialize};

use crate::models::grid::{AgeTimeGrid, GridError, RateCurve};
use crate::models::priors::{NO_PRIOR, Prior, PriorError};

/// Which prior of a smooth grid a residual or setting refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorKind {
    Value,
    Dage,
    Dtime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridPriors")]
pub struct SmoothGrid {
    grid: AgeTimeGrid,
    value: Vec<Prior>,
    dage: Vec<Prior>,
    dtime: Vec<Prior>,
}

impl SmoothGrid {
    /// A grid with no information in any prior.
    pub fn new(grid: AgeTimeGrid) -> Self {
        let n = grid.len();
        Self {
            grid,
            value: vec![NO_PRIOR; n],
            dage: vec![NO_PRIOR; n],
            dtime: vec![NO_PRIOR; n],
        }
    }

    pub fn grid(&self) -> &AgeTimeGrid {
        &self.grid
    }

    pub fn prior(&self, kind: PriorKind, age_idx: usize, time_idx: usize) -> &Prior {
        let idx = self.grid.index(age_idx, time_idx);
        &self.priors(kind)[idx]
    }

    pub fn set_prior(&mut self, kind: PriorKind, age_idx: usize, time_idx: usize, prior: Prior) {
        let idx = self.grid.index(age_idx, time_idx);
        self.priors_mut(kind)[idx] = prior;
    }

    /// Assign the same prior to every point.
    pub fn fill(&mut self, kind: PriorKind, prior: Prior) {
        self.priors_mut(kind).fill(prior);
    }

    /// Assign a per-point prior computed from the knot's age and time.
    pub fn fill_with(
        &mut self,
        kind: PriorKind,
        f: impl Fn(f64, f64) -> Result<Prior, PriorError>,
    ) -> Result<(), PriorError> {
        let points: Vec<(usize, f64, f64)> = self
            .grid
            .indices()
            .map(|(i, j)| {
                (
                    self.grid.index(i, j),
                    self.grid.ages()[i],
                    self.grid.times()[j],
                )
            })
            .collect();
        for (idx, age, time) in points {
            self.priors_mut(kind)[idx] = f(age, time)?;
        }
        Ok(())
    }

    /// Number of model variables this grid contributes.
    pub fn variable_count(&self) -> usize {
        self.grid.len()
    }

    /// Starting values: the value-prior means.
    pub fn prior_means(&self) -> Result<RateCurve, GridError> {
        let values = self.value.iter().map(|p| p.mean).collect();
        RateCurve::new(self.grid.clone(), values)
    }

    /// Value priors refit to draws of the rate, one curve per draw.
    ///
    /// Each knot's prior is refit with [`Prior::mle`] on the draws evaluated
    /// at that knot. Difference priors are kept.
    pub fn refit_values(&self, draws: &[RateCurve]) -> Result<SmoothGrid, PriorError> {
        let mut refit = self.clone();
        for (i, j) in self.grid.indices() {
            let (age, time) = (self.grid.ages()[i], self.grid.times()[j]);
            let at_knot: Vec<f64> = draws.iter().map(|d| d.evaluate(age, time)).collect();
            let prior = self.prior(PriorKind::Value, i, j).mle(&at_knot)?;
            refit.set_prior(PriorKind::Value, i, j, prior);
        }
        Ok(refit)
    }

    pub fn validate(&self) -> Result<(), PriorError> {
        for prior in self.value.iter().chain(&self.dage).chain(&self.dtime) {
            prior.validate()?;
        }
        Ok(())
    }

    fn priors(&self, kind: PriorKind) -> &[Prior] {
        match kind {
            PriorKind::Value => &self.value,
            PriorKind::Dage => &self.dage,
            PriorKind::Dtime => &self.dtime,
        }
    }

    fn priors_mut(&mut self, kind: PriorKind) -> &mut [Prior] {
        match kind {
            PriorKind::Value => &mut self.value,
            PriorKind::Dage => &mut self.dage,
            PriorKind::Dtime => &mut self.dtime,
        }
    }
}

#[derive(Deserialize)]
struct GridPriors {
    grid: AgeTimeGrid,
    value: Vec<Prior>,
    dage: Vec<Prior>,
    dtime: Vec<Prior>,
}

impl TryFrom<GridPriors> for SmoothGrid {
    type Error = GridError;

    fn try_from(raw: GridPriors) -> Result<Self, Self::Error> {
        let expected = raw.grid.len();
        for found in [raw.value.len(), raw.dage.len(), raw.dtime.len()] {
            if found != expected {
                return Err(GridError::ValueCount { expected, found });
            }
        }
        let GridPriors { grid, value, dage, dtime } = raw;
        Ok(Self { grid, value, dage, dtime })
    }
}

/// Smooth grid holding `curve`'s values as value-prior means inside the
/// bounds of `range`, with no difference priors.
///
/// Fails when a value lies outside `range`.
pub fn smooth_grid_from_curve(curve: &RateCurve, range: Prior) -> Result<SmoothGrid, PriorError> {
    let mut smooth = SmoothGrid::new(curve.grid().clone());
    for (i, j) in curve.grid().indices() {
        smooth.set_prior(PriorKind::Value, i, j, range.with_mean(curve.get(i, j))?);
    }
    Ok(smooth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::priors::NON_NEGATIVE;

    fn grid() -> AgeTimeGrid {
        AgeTimeGrid::new(vec![0.0, 50.0, 100.0], vec![2000.0]).unwrap()
    }

    #[test]
    fn new_grid_is_uninformative() {
        let smooth = SmoothGrid::new(grid());
        assert_eq!(smooth.variable_count(), 3);
        assert_eq!(smooth.prior(PriorKind::Dage, 1, 0), &NO_PRIOR);
        assert!(smooth.validate().is_ok());
    }

    #[test]
    fn fill_with_uses_knot_coordinates() {
        let mut smooth = SmoothGrid::new(grid());
        smooth
            .fill_with(PriorKind::Value, |age, _| {
                Prior::uniform(0.0, 1.0, Some(age / 100.0))
            })
            .unwrap();
        assert_eq!(smooth.prior(PriorKind::Value, 1, 0).mean, 0.5);
        assert_eq!(smooth.prior_means().unwrap().values(), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn loose_grid_keeps_values_inside_bounds() {
        let curve = RateCurve::new(grid(), vec![0.01, 0.02, 0.5]).unwrap();
        let smooth = smooth_grid_from_curve(&curve, NON_NEGATIVE).unwrap();
        let p = smooth.prior(PriorKind::Value, 2, 0);
        assert_eq!(p.mean, 0.5);
        assert_eq!(p.lower, 0.0);
        assert!(p.upper.is_infinite());

        let negative = RateCurve::new(grid(), vec![0.01, -0.02, 0.5]).unwrap();
        assert!(matches!(
            smooth_grid_from_curve(&negative, NON_NEGATIVE),
            Err(PriorError::InconsistentBounds { .. })
        ));
    }

    #[test]
    fn deserializing_checks_prior_counts() {
        let smooth = SmoothGrid::new(grid());
        let mut json = serde_json::to_value(&smooth).unwrap();
        assert_eq!(serde_json::from_value::<SmoothGrid>(json.clone()).unwrap(), smooth);
        json["dage"].as_array_mut().unwrap().pop();
        assert!(serde_json::from_value::<SmoothGrid>(json).is_err());
    }

    #[test]
    fn refit_values_turns_draws_into_priors() {
        let mut smooth = SmoothGrid::new(grid());
        smooth.fill(PriorKind::Value, Prior::gaussian(0.0, 1.0).unwrap());
        smooth.fill(PriorKind::Dage, Prior::gaussian(0.0, 0.1).unwrap());
        let draws = [
            RateCurve::new(grid(), vec![0.01, 0.02, 0.3]).unwrap(),
            RateCurve::new(grid(), vec![0.03, 0.02, 0.5]).unwrap(),
        ];
        let refit = smooth.refit_values(&draws).unwrap();
        let first = refit.prior(PriorKind::Value, 0, 0);
        assert!((first.mean - 0.02).abs() < 1e-12);
        assert!((first.std.unwrap() - 0.01).abs() < 1e-12);
        assert_eq!(refit.prior(PriorKind::Value, 1, 0).std, Some(0.0));
        assert_eq!(refit.prior(PriorKind::Dage, 0, 0), smooth.prior(PriorKind::Dage, 0, 0));
        assert!(smooth.refit_values(&[]).is_err());
    }
}
