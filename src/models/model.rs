//! The model handed to the engine's fit: a smooth grid of priors per nonzero
//! rate, scoped to a parent location.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{LocationId, RateName};
use crate::models::grid::Vars;
use crate::models::priors::{NON_NEGATIVE, PriorError, ZERO_TO_ONE};
use crate::models::smooth_grid::{SmoothGrid, smooth_grid_from_curve};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub parent_location: LocationId,
    pub child_locations: Vec<LocationId>,
    /// Smooth grid per nonzero rate. Rates absent here are identically zero.
    pub rates: BTreeMap<RateName, SmoothGrid>,
}

impl Model {
    pub fn new(parent_location: LocationId, child_locations: Vec<LocationId>) -> Self {
        Self {
            parent_location,
            child_locations,
            rates: BTreeMap::new(),
        }
    }

    /// Model with loose priors around the given values, suitable for predicting
    /// from those values. Rates are kept non-negative.
    pub fn from_vars(vars: &Vars, parent_location: LocationId) -> Result<Self, PriorError> {
        let mut model = Self::new(parent_location, Vec::new());
        for (rate, curve) in vars {
            let range = match rate {
                RateName::Pini => ZERO_TO_ONE,
                _ => NON_NEGATIVE,
            };
            model.rates.insert(*rate, smooth_grid_from_curve(curve, range)?);
        }
        Ok(model)
    }

    pub fn nonzero_rates(&self) -> impl Iterator<Item = RateName> + '_ {
        self.rates.keys().copied()
    }

    /// Total number of model variables across all rates.
    pub fn variable_count(&self) -> usize {
        self.rates.values().map(SmoothGrid::variable_count).sum()
    }

    /// Rates present on one side but not the other.
    ///
    /// An empty list means a fit can start from `vars`.
    pub fn alignment_mismatch(&self, vars: &Vars) -> Vec<String> {
        let mut out = Vec::new();
        for rate in self.rates.keys().filter(|r| !vars.contains_key(r)) {
            out.push(format!("model has rate {rate} but the values do not"));
        }
        for rate in vars.keys().filter(|r| !self.rates.contains_key(r)) {
            out.push(format!("values have rate {rate} but the model does not"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::grid::{AgeTimeGrid, RateCurve};
    use crate::models::smooth_grid::PriorKind;

    fn omega_vars() -> Vars {
        let grid = AgeTimeGrid::new(vec![0.0, 50.0, 100.0], vec![2000.0]).unwrap();
        let mut vars = Vars::new();
        vars.insert(
            RateName::Omega,
            RateCurve::new(grid, vec![0.01, 0.005, 0.2]).unwrap(),
        );
        vars
    }

    #[test]
    fn from_vars_builds_loose_positive_priors() {
        let model = Model::from_vars(&omega_vars(), 1).unwrap();
        assert_eq!(model.variable_count(), 3);
        assert_eq!(model.nonzero_rates().collect::<Vec<_>>(), vec![RateName::Omega]);
        let p = model.rates[&RateName::Omega].prior(PriorKind::Value, 1, 0);
        assert_eq!(p.mean, 0.005);
        assert_eq!(p.lower, 0.0);
    }

    #[test]
    fn from_vars_rejects_values_outside_the_rate_range() {
        let mut vars = omega_vars();
        let curve = vars[&RateName::Omega].clone();
        vars.insert(RateName::Pini, RateCurve::constant(curve.grid().clone(), 1.5).unwrap());
        assert!(matches!(
            Model::from_vars(&vars, 1),
            Err(PriorError::InconsistentBounds { upper, .. }) if upper == 1.0
        ));

        let mut negative = omega_vars();
        negative.insert(RateName::Omega, RateCurve::constant(curve.grid().clone(), -0.01).unwrap());
        assert!(Model::from_vars(&negative, 1).is_err());
    }

    #[test]
    fn alignment_reports_both_sides() {
        let model = Model::from_vars(&omega_vars(), 1).unwrap();
        assert!(model.alignment_mismatch(&omega_vars()).is_empty());

        let mut other = omega_vars();
        let curve = other.remove(&RateName::Omega).unwrap();
        other.insert(RateName::Chi, curve);
        let msgs = model.alignment_mismatch(&other);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("omega"));
        assert!(msgs[1].contains("chi"));
    }
}
