//! Builtin predict: average integrands over requested windows.

use rayon::prelude::*;

use crate::domain::{LocationId, ObservationWindow, PredictedRecord};
use crate::engine::integrands::WindowAverager;
use crate::engine::ode::RateSet;
use crate::engine::{EngineContext, EngineError, Prediction};
use crate::models::Vars;

pub fn predict(
    ctx: &EngineContext,
    vars: &Vars,
    windows: &[ObservationWindow],
    parent: LocationId,
) -> Result<Prediction, EngineError> {
    ctx.options.validate()?;
    let subtree = ctx.locations.subtree(parent)?;

    let mut in_scope: Vec<(usize, &ObservationWindow)> = Vec::new();
    let mut not_predicted = Vec::new();
    for (index, window) in windows.iter().enumerate() {
        validate_window(index, window)?;
        if subtree.contains(&window.location) && ctx.options.covariates_in_range(window)? {
            in_scope.push((index, window));
        } else {
            not_predicted.push(window.clone());
        }
    }

    let refs: Vec<&ObservationWindow> = in_scope.iter().map(|(_, w)| *w).collect();
    let averager = WindowAverager::new(RateSet::new(vars), ctx.options.ode_step_size, &refs);

    let predicted: Vec<PredictedRecord> = in_scope
        .par_iter()
        .map(|&(avgint_index, window)| PredictedRecord {
            sample_index: 0,
            avgint_index,
            window: window.clone(),
            mean: averager.average(window),
        })
        .collect();

    if let Some(bad) = predicted.iter().find(|p| !p.mean.is_finite()) {
        return Err(EngineError::NonFinite(format!(
            "prediction for request {} ({})",
            bad.avgint_index, bad.window.integrand
        )));
    }

    log::debug!(
        "predict: {} satisfied, {} outside scope",
        predicted.len(),
        not_predicted.len()
    );
    Ok(Prediction {
        predicted,
        not_predicted,
    })
}

/// Ages and times must be finite with `lower <= upper`.
pub(crate) fn validate_window(index: usize, w: &ObservationWindow) -> Result<(), EngineError> {
    let ok = |lo: f64, hi: f64| lo.is_finite() && hi.is_finite() && lo <= hi;
    if !ok(w.age_lower, w.age_upper) {
        return Err(EngineError::InvalidRow {
            index,
            message: format!("invalid age range [{}, {}]", w.age_lower, w.age_upper),
        });
    }
    if !ok(w.time_lower, w.time_upper) {
        return Err(EngineError::InvalidRow {
            index,
            message: format!("invalid time range [{}, {}]", w.time_lower, w.time_upper),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Integrand, RateName};
    use crate::engine::{CovariateSpec, SessionOptions};
    use crate::models::{AgeTimeGrid, LocationHierarchy, LocationRecord, RateCurve};

    fn ctx(options: SessionOptions) -> EngineContext {
        let locations = LocationHierarchy::new(vec![
            LocationRecord::new("world", 1, None),
            LocationRecord::new("east", 2, Some(1)),
            LocationRecord::new("west", 3, Some(1)),
        ])
        .unwrap();
        EngineContext { locations, options }
    }

    fn omega(value: f64) -> Vars {
        let grid = AgeTimeGrid::new(vec![0.0, 100.0], vec![2000.0]).unwrap();
        let mut vars = Vars::new();
        vars.insert(RateName::Omega, RateCurve::constant(grid, value).unwrap());
        vars
    }

    #[test]
    fn partitions_by_subtree_and_keeps_request_order() {
        let windows = vec![
            ObservationWindow::point(Integrand::Mtother, 2, 10.0, 2000.0),
            ObservationWindow::point(Integrand::Mtother, 3, 10.0, 2000.0),
            ObservationWindow::point(Integrand::Susceptible, 2, 10.0, 2000.0),
        ];
        let out = predict(&ctx(SessionOptions::default()), &omega(0.01), &windows, 2).unwrap();
        let idx: Vec<_> = out.predicted.iter().map(|p| p.avgint_index).collect();
        assert_eq!(idx, vec![0, 2]);
        assert_eq!(out.not_predicted, vec![windows[1].clone()]);
        assert!(out.predicted.iter().all(|p| p.sample_index == 0));
        assert!((out.predicted[0].mean - 0.01).abs() < 1e-12);
        assert!((out.predicted[1].mean - (-0.1f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_covariate_is_not_predicted() {
        let options = SessionOptions {
            covariates: vec![CovariateSpec {
                name: "x".into(),
                reference: 0.0,
                max_difference: Some(1.0),
            }],
            ..SessionOptions::default()
        };
        let mut far = ObservationWindow::point(Integrand::Mtother, 1, 10.0, 2000.0);
        far.covariates.insert("x".into(), 5.0);
        let out = predict(&ctx(options), &omega(0.01), &[far], 1).unwrap();
        assert!(out.predicted.is_empty());
        assert_eq!(out.not_predicted.len(), 1);
    }

    #[test]
    fn rejects_inverted_windows_and_unknown_parent() {
        let mut w = ObservationWindow::point(Integrand::Mtother, 1, 10.0, 2000.0);
        w.age_upper = 5.0;
        let c = ctx(SessionOptions::default());
        assert!(matches!(
            predict(&c, &omega(0.01), &[w], 1),
            Err(EngineError::InvalidRow { index: 0, .. })
        ));
        assert!(matches!(
            predict(&c, &omega(0.01), &[], 99),
            Err(EngineError::Hierarchy(_))
        ));
    }
}
