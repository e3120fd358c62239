//! Modeling engine: the predict/fit boundary of the pipeline.
//!
//! Callers construct a [`Session`] (location hierarchy, parent location, store
//! path, options) and then call `predict` and `fit` on it. The work itself is
//! done by an [`Engine`] implementation; [`BuiltinEngine`] integrates the
//! susceptible / with-condition ODE and fits by damped Gauss-Newton.
//!
//! Every call is recorded in a JSON session store next to the run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DataRecord, Integrand, LocationId, ObservationWindow, PredictedRecord, RateName};
use crate::models::{GridError, HierarchyError, LocationHierarchy, Model, PriorError, PriorKind, Vars};

pub mod fit;
pub mod integrands;
pub mod ode;
pub mod predict;
pub mod session;
pub mod store;

pub use session::*;
pub use store::*;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Prior(#[from] PriorError),
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),
    #[error("Invalid session option: {0}")]
    InvalidOption(String),
    #[error("Row {index}: {message}")]
    InvalidRow { index: usize, message: String },
    #[error("Covariate '{0}' is not declared in the session options.")]
    UnknownCovariate(String),
    #[error("Model and starting values are misaligned: {0}")]
    Misaligned(String),
    #[error("Model has no nonzero rates to fit.")]
    EmptyModel,
    #[error("Objective is not finite ({0}).")]
    NonFinite(String),
    #[error("Fit did not converge after {iterations} iterations (objective {objective:.6e}).")]
    NotConverged { iterations: usize, objective: f64 },
    #[error("Session store '{path}': {message}")]
    Store { path: String, message: String },
}

/// A named covariate and the window of values the engine accepts.
///
/// A row whose value differs from `reference` by more than `max_difference`
/// cannot be predicted and is excluded from fits. Rows that omit the covariate
/// take the reference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateSpec {
    pub name: String,
    pub reference: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_difference: Option<f64>,
}

/// Engine configuration for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Age step (years) for ODE integration and integrand averaging.
    pub ode_step_size: f64,
    #[serde(default)]
    pub covariates: Vec<CovariateSpec>,
    /// Cap on damped Gauss-Newton iterations per reweighting pass.
    pub max_iterations: usize,
    /// Relative objective decrease below which the fit is converged.
    pub tolerance: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ode_step_size: 0.5,
            covariates: Vec::new(),
            max_iterations: 500,
            tolerance: 1e-10,
        }
    }
}

impl SessionOptions {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.ode_step_size.is_finite() && self.ode_step_size > 0.0) {
            return Err(EngineError::InvalidOption(format!(
                "ode_step_size must be finite and > 0, got {}",
                self.ode_step_size
            )));
        }
        if self.max_iterations == 0 {
            return Err(EngineError::InvalidOption("max_iterations must be > 0".into()));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(EngineError::InvalidOption(format!(
                "tolerance must be finite and > 0, got {}",
                self.tolerance
            )));
        }
        for c in &self.covariates {
            if !c.reference.is_finite() || c.max_difference.is_some_and(|d| d.is_nan() || d < 0.0) {
                return Err(EngineError::InvalidOption(format!(
                    "covariate '{}' has an invalid reference or max_difference",
                    c.name
                )));
            }
        }
        Ok(())
    }

    /// Whether the window's covariates lie inside every configured range.
    pub fn covariates_in_range(&self, window: &ObservationWindow) -> Result<bool, EngineError> {
        for name in window.covariates.keys() {
            if !self.covariates.iter().any(|c| &c.name == name) {
                return Err(EngineError::UnknownCovariate(name.clone()));
            }
        }
        Ok(self.covariates.iter().all(|c| {
            let value = window.covariates.get(&c.name).copied().unwrap_or(c.reference);
            match c.max_difference {
                Some(d) => (value - c.reference).abs() <= d,
                None => true,
            }
        }))
    }
}

/// What an engine call can see besides its arguments.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub locations: LocationHierarchy,
    pub options: SessionOptions,
}

/// Output of predict: requests the engine could and could not satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted: Vec<PredictedRecord>,
    pub not_predicted: Vec<ObservationWindow>,
}

/// Weighted residual of one prior term. `None` for uniform priors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorResidual {
    pub rate: RateName,
    pub kind: PriorKind,
    pub age: f64,
    pub time: f64,
    pub residual: Option<f64>,
}

/// Model value and weighted residual for one included data row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResidual {
    /// Index of the row in the data passed to fit.
    pub data_index: usize,
    pub integrand: Integrand,
    pub location: LocationId,
    pub age_mid: f64,
    pub time_mid: f64,
    pub avg_integrand: f64,
    pub weighted_residual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub iterations: usize,
    pub objective: f64,
    pub converged: bool,
}

/// Everything a fit returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub fit: Vars,
    pub prior_residuals: Vec<PriorResidual>,
    pub data_residuals: Vec<DataResidual>,
    pub fit_data: Vec<DataRecord>,
    pub excluded_data: Vec<DataRecord>,
    pub summary: FitSummary,
}

/// The operations a modeling backend offers a session.
pub trait Engine {
    /// Short name for logs and the session store.
    fn name(&self) -> &'static str;

    /// Average integrands over the requested windows from the given rates.
    fn predict(
        &self,
        ctx: &EngineContext,
        vars: &Vars,
        windows: &[ObservationWindow],
        parent: LocationId,
    ) -> Result<Prediction, EngineError>;

    /// Estimate the model's rates from data, starting at `initial`.
    fn fit(
        &self,
        ctx: &EngineContext,
        model: &Model,
        data: &[DataRecord],
        initial: &Vars,
    ) -> Result<FitResult, EngineError>;
}

/// In-process engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngine;

impl Engine for BuiltinEngine {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn predict(
        &self,
        ctx: &EngineContext,
        vars: &Vars,
        windows: &[ObservationWindow],
        parent: LocationId,
    ) -> Result<Prediction, EngineError> {
        predict::predict(ctx, vars, windows, parent)
    }

    fn fit(
        &self,
        ctx: &EngineContext,
        model: &Model,
        data: &[DataRecord],
        initial: &Vars,
    ) -> Result<FitResult, EngineError> {
        fit::fit(ctx, model, data, initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_with(covariates: &[(&str, f64)]) -> ObservationWindow {
        let mut w = ObservationWindow::point(Integrand::Mtother, 1, 10.0, 2000.0);
        for (name, value) in covariates {
            w.covariates.insert(name.to_string(), *value);
        }
        w
    }

    #[test]
    fn covariate_range_excludes_outliers() {
        let options = SessionOptions {
            covariates: vec![CovariateSpec {
                name: "sex".into(),
                reference: 0.0,
                max_difference: Some(0.6),
            }],
            ..SessionOptions::default()
        };
        assert!(options.covariates_in_range(&window_with(&[])).unwrap());
        assert!(options.covariates_in_range(&window_with(&[("sex", 0.5)])).unwrap());
        assert!(!options.covariates_in_range(&window_with(&[("sex", -1.0)])).unwrap());
        assert!(matches!(
            options.covariates_in_range(&window_with(&[("income", 1.0)])),
            Err(EngineError::UnknownCovariate(name)) if name == "income"
        ));
    }

    #[test]
    fn options_reject_bad_step() {
        let options = SessionOptions {
            ode_step_size: 0.0,
            ..SessionOptions::default()
        };
        assert!(matches!(options.validate(), Err(EngineError::InvalidOption(_))));
        assert!(SessionOptions::default().validate().is_ok());
    }
}
