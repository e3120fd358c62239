//! Shared scenario pipeline used by the `run`, `predict` and `plot` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! truth -> grid -> predict -> synthesize -> priors -> fit -> residuals
//!
//! The command handlers can then focus on presentation (printing and exports).

use chrono::Utc;

use crate::data::{SampleData, Siler, prediction_requests, synthesize, truth_grid, truth_vars};
use crate::domain::{GridResidual, ObservationWindow, ScenarioConfig};
use crate::engine::{FitResult, Prediction, Session, SessionOptions};
use crate::error::AppError;
use crate::io::RunFile;
use crate::models::{LocationHierarchy, Model, Prior, PriorKind, SmoothGrid, Vars};
use crate::report::{BandSummary, band_summary, grid_residuals};

/// Outputs of steps 1-3.
#[derive(Debug, Clone)]
pub struct PredictOutput {
    pub truth: Vars,
    pub requests: Vec<ObservationWindow>,
    pub prediction: Prediction,
}

/// All computed outputs of a single `cascade run`.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub truth: Vars,
    pub requests: Vec<ObservationWindow>,
    pub prediction: Prediction,
    pub sample: SampleData,
    pub model: Model,
    pub fit: FitResult,
    pub residuals: Vec<GridResidual>,
    pub band: BandSummary,
}

impl RunOutput {
    /// The portable record of this run.
    pub fn to_run_file(&self, config: &ScenarioConfig) -> RunFile {
        RunFile {
            tool: env!("CARGO_PKG_NAME").to_string(),
            created: Utc::now(),
            config: config.clone(),
            truth: self.truth.clone(),
            fit: self.fit.fit.clone(),
            data: self.sample.data.clone(),
            grid_residuals: self.residuals.clone(),
            data_residuals: self.fit.data_residuals.clone(),
        }
    }
}

/// Open an engine session on a single-node hierarchy rooted at the scenario's
/// location.
pub fn open_session(config: &ScenarioConfig) -> Result<Session, AppError> {
    let locations = LocationHierarchy::single(config.location_name.clone(), config.location_id);
    let options = SessionOptions {
        ode_step_size: config.ode_step_size,
        covariates: Vec::new(),
        max_iterations: config.max_iterations,
        tolerance: config.tolerance,
    };
    let session = Session::new(locations, config.location_id, &config.session_path, options)?;
    Ok(session)
}

/// Steps 1-2: the Siler hazard sampled on the knot grid.
pub fn ground_truth(config: &ScenarioConfig) -> Result<Vars, AppError> {
    let grid = truth_grid(config)?;
    log::info!(
        "truth grid: {} ages x {} times",
        grid.ages().len(),
        grid.times().len()
    );
    Ok(truth_vars(&Siler::default(), grid)?)
}

/// The prediction gate: every request satisfied and at least one of them.
pub fn check_prediction(prediction: &Prediction) -> Result<(), AppError> {
    if !prediction.not_predicted.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "Predict could not satisfy {} requests.",
                prediction.not_predicted.len()
            ),
        ));
    }
    if prediction.predicted.is_empty() {
        return Err(AppError::new(3, "Predict returned no satisfied requests."));
    }
    Ok(())
}

/// Steps 1-3 in an existing session.
pub fn predict_truth(session: &mut Session, config: &ScenarioConfig) -> Result<PredictOutput, AppError> {
    let truth = ground_truth(config)?;
    let requests = prediction_requests(config);
    let root = session.locations().root();
    let prediction = session.predict(&truth, &requests, root)?;
    check_prediction(&prediction)?;
    log::info!("predicted {} requests", prediction.predicted.len());
    Ok(PredictOutput {
        truth,
        requests,
        prediction,
    })
}

/// Steps 1-3 in a fresh session.
pub fn run_predict(config: &ScenarioConfig) -> Result<PredictOutput, AppError> {
    let mut session = open_session(config)?;
    predict_truth(&mut session, config)
}

/// Step 5: priors on the truth's knot layout.
///
/// Value priors are uniform on `[truth * lower_ratio, truth * upper_ratio]`
/// with mean `truth * mean_ratio`; difference priors are gaussian with mean
/// zero, or the truth's own forward differences when
/// `center_differences_on_truth` is set.
pub fn build_model(
    config: &ScenarioConfig,
    truth: &Vars,
    locations: &LocationHierarchy,
) -> Result<Model, AppError> {
    let parent = locations.root();
    let mut model = Model::new(parent, locations.children(parent).to_vec());

    for (rate, curve) in truth {
        let grid = curve.grid();
        let (na, nt) = (grid.ages().len(), grid.times().len());
        let mut smooth = SmoothGrid::new(grid.clone());
        smooth.fill(PriorKind::Dage, Prior::gaussian(0.0, config.dage_std)?);
        smooth.fill(PriorKind::Dtime, Prior::gaussian(0.0, config.dtime_std)?);

        for (i, j) in grid.indices() {
            let t = curve.get(i, j);
            let value = Prior::uniform(
                t * config.prior_lower_ratio,
                t * config.prior_upper_ratio,
                Some(t * config.prior_mean_ratio),
            )?;
            smooth.set_prior(PriorKind::Value, i, j, value);

            if !config.center_differences_on_truth {
                continue;
            }
            if i + 1 < na {
                let mean = curve.get(i + 1, j) - t;
                smooth.set_prior(PriorKind::Dage, i, j, Prior::gaussian(mean, config.dage_std)?);
            }
            if j + 1 < nt {
                let mean = curve.get(i, j + 1) - t;
                smooth.set_prior(PriorKind::Dtime, i, j, Prior::gaussian(mean, config.dtime_std)?);
            }
        }
        model.rates.insert(*rate, smooth);
    }

    log::info!("model has {} variables", model.variable_count());
    Ok(model)
}

/// Execute the full scenario and return the computed outputs.
pub fn run_scenario(config: &ScenarioConfig) -> Result<RunOutput, AppError> {
    let mut session = open_session(config)?;

    // 1-3) Truth, grid and predictions.
    let PredictOutput {
        truth,
        requests,
        prediction,
    } = predict_truth(&mut session, config)?;

    // 4) Observations.
    let sample = synthesize(&prediction.predicted, config)?;

    // 5) Priors.
    let model = build_model(config, &truth, session.locations())?;

    // 6) Fit, starting at the truth.
    let fit = session.fit(&model, &sample.data, &truth)?;
    log::info!(
        "fit: {} iterations, objective {:.6e}",
        fit.summary.iterations,
        fit.summary.objective
    );

    // 7) Residuals.
    let residuals = grid_residuals(&truth, &fit.fit)?;
    let band = band_summary(&residuals, config.mess_lower, config.mess_upper);
    log::info!(
        "mean |relative residual|: {:.4} inside band, {:.4} outside",
        band.inside_mean_abs,
        band.outside_mean_abs
    );

    Ok(RunOutput {
        truth,
        requests,
        prediction,
        sample,
        model,
        fit,
        residuals,
        band,
    })
}
