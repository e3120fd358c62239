//! Builtin fit: maximum a posteriori estimate of the model's rate grids.
//!
//! The objective is a sum of squared weighted residuals:
//!
//! - one term per included data row, comparing the row's mean with the
//!   integrand averaged over its window
//! - one term per non-uniform value prior
//! - one term per non-uniform `dage` / `dtime` prior on neighbouring knots
//!
//! Value-prior bounds are box constraints. The problem is solved by
//! Levenberg-Marquardt with a finite-difference Jacobian, wrapped in a few
//! iteratively reweighted passes when any term uses a heavy-tailed density.

use nalgebra::DVector;
use rayon::prelude::*;

use crate::domain::{DataRecord, Density, LocationId, ObservationWindow, RateName};
use crate::engine::integrands::WindowAverager;
use crate::engine::ode::RateSet;
use crate::engine::predict::validate_window;
use crate::engine::{
    DataResidual, EngineContext, EngineError, FitResult, FitSummary, PriorResidual,
};
use crate::math::damped_step;
use crate::models::{AgeTimeGrid, Model, Prior, PriorKind, RateCurve, Vars};

/// Reweighting passes when some term is not Gaussian.
const ROBUST_PASSES: usize = 4;

/// Huber cutoff matching the Laplace density's scale.
const LAPLACE_K: f64 = std::f64::consts::SQRT_2;

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;

/// Relative gradient size below which a stalled search counts as converged.
const GRADIENT_TOL: f64 = 1e-6;

pub fn fit(
    ctx: &EngineContext,
    model: &Model,
    data: &[DataRecord],
    initial: &Vars,
) -> Result<FitResult, EngineError> {
    ctx.options.validate()?;
    if model.rates.is_empty() {
        return Err(EngineError::EmptyModel);
    }
    let mismatch = model.alignment_mismatch(initial);
    if !mismatch.is_empty() {
        return Err(EngineError::Misaligned(mismatch.join("; ")));
    }
    for smooth in model.rates.values() {
        smooth.validate()?;
    }

    for (index, record) in data.iter().enumerate() {
        validate_record(index, record)?;
    }
    let subtree = ctx.locations.subtree(model.parent_location)?;
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for (index, record) in data.iter().enumerate() {
        if record.hold_out
            || !subtree.contains(&record.window.location)
            || !ctx.options.covariates_in_range(&record.window)?
        {
            excluded.push(record.clone());
        } else {
            included.push(index);
        }
    }

    let problem = Problem::new(ctx, model, data, included, initial);
    log::info!(
        "fit: {} variables ({} free), {} data rows, {} excluded, {} prior terms",
        problem.lower.len(),
        problem.free.len(),
        problem.rows.len(),
        excluded.len(),
        problem.priors.len()
    );

    let mut x = problem.start.clone();
    let mut weights = vec![1.0; problem.term_count()];
    let passes = if problem.all_gaussian() { 1 } else { ROBUST_PASSES };
    let mut summary = FitSummary {
        iterations: 0,
        objective: 0.0,
        converged: false,
    };

    for pass in 0..passes {
        let outcome = problem.minimize(&mut x, &weights)?;
        summary.iterations += outcome.iterations;
        summary.objective = outcome.objective;
        summary.converged = outcome.converged;
        log::debug!(
            "fit pass {pass}: {} iterations, objective {:.6e}, converged {}",
            outcome.iterations,
            outcome.objective,
            outcome.converged
        );
        if passes == 1 {
            break;
        }
        let z = problem.standardized(&x)?.1;
        let next = problem.robust_weights(&z);
        if next == weights {
            break;
        }
        weights = next;
    }

    problem.outputs(&x, summary, excluded)
}

/// Data rows must be finite, carry a positive std and a density the fit can use.
fn validate_record(index: usize, r: &DataRecord) -> Result<(), EngineError> {
    validate_window(index, &r.window)?;
    let invalid = |message: String| EngineError::InvalidRow { index, message };
    let u = &r.uncertainty;
    if !r.mean.is_finite() {
        return Err(invalid(format!("mean is not finite: {}", r.mean)));
    }
    if u.density == Density::Uniform {
        return Err(invalid("data rows need a non-uniform density".into()));
    }
    if !(u.std.is_finite() && u.std > 0.0) {
        return Err(invalid(format!("std must be finite and > 0, got {}", u.std)));
    }
    if u.density.is_log() {
        match u.eta {
            Some(eta) if eta.is_finite() && eta > 0.0 && r.mean + eta > 0.0 => {}
            other => return Err(invalid(format!("log density needs eta > 0 and mean + eta > 0, got {other:?}"))),
        }
    }
    if u.density.needs_nu() && !u.nu.is_some_and(|nu| nu.is_finite() && nu > 2.0) {
        return Err(invalid(format!("Student's density needs nu > 2, got {:?}", u.nu)));
    }
    Ok(())
}

/// One rate's share of the variable vector.
struct Block {
    rate: RateName,
    grid: AgeTimeGrid,
    offset: usize,
}

/// A prior term over one variable (value) or two neighbouring variables
/// (difference `x[to] - x[from]`).
#[derive(Clone)]
struct PriorTerm {
    rate: RateName,
    kind: PriorKind,
    age: f64,
    time: f64,
    from: usize,
    to: Option<usize>,
    prior: Prior,
}

impl PriorTerm {
    fn residual(&self, x: &[f64]) -> Option<f64> {
        match self.to {
            None => self.prior.weighted_residual(x[self.from]),
            Some(to) => difference_residual(&self.prior, x[self.from], x[to]),
        }
    }
}

/// `(mean - (v1 - v0)) / std`, with differences of `ln(v + eta)` for log
/// densities. Uniform priors have no residual.
fn difference_residual(prior: &Prior, v0: f64, v1: f64) -> Option<f64> {
    if prior.density == Density::Uniform {
        return None;
    }
    let std = prior.std.filter(|s| *s > 0.0)?;
    let diff = if prior.density.is_log() {
        let eta = prior.eta?;
        (v1 + eta).ln() - (v0 + eta).ln()
    } else {
        v1 - v0
    };
    Some((prior.mean - diff) / std)
}

fn data_residual(record: &DataRecord, model_value: f64) -> f64 {
    let u = &record.uncertainty;
    match u.eta {
        Some(eta) if u.density.is_log() => {
            let y = record.mean + eta;
            let sigma = (y + u.std).ln() - y.ln();
            (y.ln() - (model_value + eta).ln()) / sigma
        }
        _ => (record.mean - model_value) / u.std,
    }
}

/// IRLS weight for a standardized residual under `density`.
fn robust_weight(density: Density, nu: Option<f64>, z: f64) -> f64 {
    match density {
        Density::Laplace | Density::LogLaplace => {
            let az = z.abs();
            if az <= LAPLACE_K { 1.0 } else { LAPLACE_K / az }
        }
        Density::Students | Density::LogStudents => {
            let nu = nu.unwrap_or(f64::INFINITY);
            if nu.is_finite() {
                (nu + 1.0) / (nu - 2.0 + z * z)
            } else {
                1.0
            }
        }
        _ => 1.0,
    }
}

struct Outcome {
    iterations: usize,
    objective: f64,
    converged: bool,
}

struct Problem<'a> {
    ctx: &'a EngineContext,
    parent: LocationId,
    blocks: Vec<Block>,
    data: &'a [DataRecord],
    rows: Vec<usize>,
    windows: Vec<&'a ObservationWindow>,
    priors: Vec<PriorTerm>,
    /// Every prior, including uniform ones, for reporting.
    report: Vec<PriorTerm>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    free: Vec<usize>,
    start: Vec<f64>,
}

impl<'a> Problem<'a> {
    fn new(
        ctx: &'a EngineContext,
        model: &Model,
        data: &'a [DataRecord],
        rows: Vec<usize>,
        initial: &Vars,
    ) -> Self {
        let mut blocks = Vec::new();
        let mut report = Vec::new();
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        let mut start = Vec::new();

        for (rate, smooth) in &model.rates {
            let grid = smooth.grid();
            let offset = lower.len();
            let (na, nt) = (grid.ages().len(), grid.times().len());
            for (i, j) in grid.indices() {
                let (age, time) = (grid.ages()[i], grid.times()[j]);
                let var = offset + grid.index(i, j);
                let value = *smooth.prior(PriorKind::Value, i, j);
                lower.push(value.lower);
                upper.push(value.upper);
                // Alignment was checked; a missing curve falls back to the prior mean.
                let guess = initial
                    .get(rate)
                    .map_or(value.mean, |c| c.evaluate(age, time));
                start.push(value.clamp(guess));

                let term = |kind, to| PriorTerm {
                    rate: *rate,
                    kind,
                    age,
                    time,
                    from: var,
                    to,
                    prior: *smooth.prior(kind, i, j),
                };
                report.push(term(PriorKind::Value, None));
                if i + 1 < na {
                    report.push(term(PriorKind::Dage, Some(offset + grid.index(i + 1, j))));
                }
                if j + 1 < nt {
                    report.push(term(PriorKind::Dtime, Some(offset + grid.index(i, j + 1))));
                }
            }
            blocks.push(Block {
                rate: *rate,
                grid: grid.clone(),
                offset,
            });
        }

        let free = report
            .iter()
            .filter(|t| t.kind == PriorKind::Value && !t.prior.is_constant())
            .map(|t| t.from)
            .collect();
        let priors = report
            .iter()
            .filter(|t| t.residual(&start).is_some())
            .cloned()
            .collect();
        let windows = rows.iter().map(|&r| &data[r].window).collect();

        Self {
            ctx,
            parent: model.parent_location,
            blocks,
            data,
            rows,
            windows,
            priors,
            report,
            lower,
            upper,
            free,
            start,
        }
    }

    fn term_count(&self) -> usize {
        self.rows.len() + self.priors.len()
    }

    fn all_gaussian(&self) -> bool {
        let gaussian = |d: Density| matches!(d, Density::Gaussian | Density::LogGaussian);
        self.rows
            .iter()
            .all(|&r| gaussian(self.data[r].uncertainty.density))
            && self.priors.iter().all(|t| gaussian(t.prior.density))
    }

    fn vars(&self, x: &[f64]) -> Result<Vars, EngineError> {
        let mut vars = Vars::new();
        for b in &self.blocks {
            let values = x[b.offset..b.offset + b.grid.len()].to_vec();
            vars.insert(b.rate, RateCurve::new(b.grid.clone(), values)?);
        }
        Ok(vars)
    }

    /// Model values for the included rows and the standardized residual of
    /// every term (data rows first, then active priors).
    fn standardized(&self, x: &[f64]) -> Result<(Vec<f64>, Vec<f64>), EngineError> {
        let vars = self.vars(x)?;
        let averager = WindowAverager::new(
            RateSet::new(&vars),
            self.ctx.options.ode_step_size,
            &self.windows,
        );
        let model_values: Vec<f64> = self.windows.iter().map(|w| averager.average(w)).collect();
        let mut z: Vec<f64> = self
            .rows
            .iter()
            .zip(&model_values)
            .map(|(&r, &m)| data_residual(&self.data[r], m))
            .collect();
        z.extend(self.priors.iter().map(|t| t.residual(x).unwrap_or(0.0)));
        Ok((model_values, z))
    }

    fn residuals(&self, x: &[f64], weights: &[f64]) -> Result<DVector<f64>, EngineError> {
        let z = self.standardized(x)?.1;
        Ok(DVector::from_iterator(
            z.len(),
            z.iter().zip(weights).map(|(r, w)| r * w.sqrt()),
        ))
    }

    fn robust_weights(&self, z: &[f64]) -> Vec<f64> {
        let (data_z, prior_z) = z.split_at(self.rows.len());
        let data = self.rows.iter().zip(data_z).map(|(&r, &z)| {
            let u = &self.data[r].uncertainty;
            robust_weight(u.density, u.nu, z)
        });
        let priors = self
            .priors
            .iter()
            .zip(prior_z)
            .map(|(t, &z)| robust_weight(t.prior.density, t.prior.nu, z));
        data.chain(priors).collect()
    }

    fn project(&self, x: &mut [f64]) {
        for &k in &self.free {
            x[k] = x[k].max(self.lower[k]).min(self.upper[k]);
        }
    }

    /// Forward differences over the free variables, backward at an upper bound.
    fn jacobian(
        &self,
        x: &[f64],
        r0: &DVector<f64>,
        weights: &[f64],
    ) -> Result<nalgebra::DMatrix<f64>, EngineError> {
        let columns: Vec<DVector<f64>> = self
            .free
            .par_iter()
            .map(|&k| {
                let mut h = x[k].abs().max(1e-4) * 1e-6;
                if x[k] + h > self.upper[k] {
                    h = -h;
                }
                let mut xp = x.to_vec();
                xp[k] += h;
                let rp = self.residuals(&xp, weights)?;
                Ok((rp - r0) / h)
            })
            .collect::<Result<_, EngineError>>()?;

        let mut jac = nalgebra::DMatrix::<f64>::zeros(r0.len(), columns.len());
        for (c, col) in columns.iter().enumerate() {
            jac.set_column(c, col);
        }
        Ok(jac)
    }

    /// Levenberg-Marquardt on the free variables with the given term weights.
    fn minimize(&self, x: &mut Vec<f64>, weights: &[f64]) -> Result<Outcome, EngineError> {
        let max_iterations = self.ctx.options.max_iterations;
        let tol = self.ctx.options.tolerance;

        let mut r = self.residuals(x, weights)?;
        let mut objective = r.norm_squared();
        if !objective.is_finite() {
            return Err(EngineError::NonFinite("objective at the starting values".into()));
        }
        if self.free.is_empty() || r.is_empty() || objective == 0.0 {
            return Ok(Outcome {
                iterations: 0,
                objective,
                converged: true,
            });
        }

        let mut lambda = LAMBDA_START;
        for iteration in 1..=max_iterations {
            let jac = self.jacobian(x, &r, weights)?;
            let scale = DVector::from_iterator(
                jac.ncols(),
                jac.column_iter().map(|c| c.norm().max(1e-8)),
            );

            let accepted = loop {
                let Some(step) = damped_step(&jac, &r, &scale, lambda) else {
                    lambda *= 10.0;
                    if lambda > LAMBDA_MAX {
                        break None;
                    }
                    continue;
                };
                let mut trial = x.clone();
                for (c, &k) in self.free.iter().enumerate() {
                    trial[k] += step[c];
                }
                self.project(&mut trial);
                let r_trial = self.residuals(&trial, weights)?;
                let obj_trial = r_trial.norm_squared();
                if obj_trial.is_finite() && obj_trial < objective {
                    lambda = (lambda / 10.0).max(1e-12);
                    break Some((trial, r_trial, obj_trial));
                }
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    break None;
                }
            };

            // No downhill step at any damping. Converged only if the gradient
            // vanishes or points out of the box.
            let Some((trial, r_trial, obj_trial)) = accepted else {
                let converged = self.stationary(x, &jac, &r);
                if !converged {
                    log::warn!("fit stalled at objective {objective:.6e} away from a stationary point");
                }
                return Ok(Outcome {
                    iterations: iteration,
                    objective,
                    converged,
                });
            };

            let decrease = objective - obj_trial;
            let step_norm = self
                .free
                .iter()
                .map(|&k| (trial[k] - x[k]).powi(2))
                .sum::<f64>()
                .sqrt();
            let x_norm = self.free.iter().map(|&k| x[k].powi(2)).sum::<f64>().sqrt();

            *x = trial;
            r = r_trial;
            objective = obj_trial;

            if decrease <= tol * objective.max(f64::MIN_POSITIVE) || step_norm <= tol * (x_norm + tol) {
                return Ok(Outcome {
                    iterations: iteration,
                    objective,
                    converged: true,
                });
            }
        }

        Err(EngineError::NotConverged {
            iterations: max_iterations,
            objective,
        })
    }

    /// First-order optimality at `x` for the box-constrained problem.
    ///
    /// Each free variable needs a gradient `J^T r` that is negligible, or
    /// that only pushes it further into the bound it sits on.
    fn stationary(&self, x: &[f64], jac: &nalgebra::DMatrix<f64>, r: &DVector<f64>) -> bool {
        let r_norm = r.norm();
        if r_norm <= f64::EPSILON {
            return true;
        }
        self.free.iter().zip(jac.column_iter()).all(|(&k, col)| {
            let g = col.dot(r);
            let at_lower = x[k] <= self.lower[k] && g > 0.0;
            let at_upper = x[k] >= self.upper[k] && g < 0.0;
            at_lower || at_upper || g.abs() <= GRADIENT_TOL * col.norm() * r_norm
        })
    }

    fn outputs(
        &self,
        x: &[f64],
        summary: FitSummary,
        excluded_data: Vec<DataRecord>,
    ) -> Result<FitResult, EngineError> {
        let fit = self.vars(x)?;
        let (model_values, z) = self.standardized(x)?;

        let prior_residuals = self
            .report
            .iter()
            .map(|t| PriorResidual {
                rate: t.rate,
                kind: t.kind,
                age: t.age,
                time: t.time,
                residual: t.residual(x),
            })
            .collect();

        let data_residuals = self
            .rows
            .iter()
            .zip(model_values.iter().zip(&z))
            .map(|(&index, (&m, &z))| {
                let w = &self.data[index].window;
                DataResidual {
                    data_index: index,
                    integrand: w.integrand,
                    location: w.location,
                    age_mid: w.age_mid(),
                    time_mid: w.time_mid(),
                    avg_integrand: m,
                    weighted_residual: z,
                }
            })
            .collect();

        let fit_data = self.rows.iter().map(|&r| self.data[r].clone()).collect();

        log::info!(
            "fit for location {}: {} iterations, objective {:.6e}",
            self.parent,
            summary.iterations,
            summary.objective
        );
        Ok(FitResult {
            fit,
            prior_residuals,
            data_residuals,
            fit_data,
            excluded_data,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Integrand, Uncertainty};
    use crate::engine::SessionOptions;
    use crate::models::{LocationHierarchy, LocationRecord, SmoothGrid};
    use approx::assert_relative_eq;

    fn ctx() -> EngineContext {
        EngineContext {
            locations: LocationHierarchy::new(vec![
                LocationRecord::new("world", 1, None),
                LocationRecord::new("child", 2, Some(1)),
            ])
            .unwrap(),
            options: SessionOptions::default(),
        }
    }

    fn grid() -> AgeTimeGrid {
        AgeTimeGrid::new(vec![0.0, 50.0, 100.0], vec![2000.0]).unwrap()
    }

    fn omega_model() -> Model {
        let mut smooth = SmoothGrid::new(grid());
        smooth.fill(
            PriorKind::Value,
            Prior::uniform(1e-6, 1.0, Some(0.1)).unwrap(),
        );
        let mut model = Model::new(1, vec![2]);
        model.rates.insert(RateName::Omega, smooth);
        model
    }

    fn start(value: f64) -> Vars {
        let mut vars = Vars::new();
        vars.insert(RateName::Omega, RateCurve::constant(grid(), value).unwrap());
        vars
    }

    fn row(integrand: Integrand, location: LocationId, age: f64, mean: f64) -> DataRecord {
        DataRecord {
            window: ObservationWindow::point(integrand, location, age, 2000.0),
            mean,
            uncertainty: Uncertainty {
                density: Density::Gaussian,
                std: 1e-3,
                eta: None,
                nu: None,
            },
            hold_out: false,
        }
    }

    #[test]
    fn recovers_rates_from_direct_observations() {
        let data = vec![
            row(Integrand::Mtother, 1, 0.0, 0.01),
            row(Integrand::Mtother, 2, 50.0, 0.02),
            row(Integrand::Mtother, 1, 100.0, 0.2),
        ];
        let out = fit(&ctx(), &omega_model(), &data, &start(0.1)).unwrap();
        assert!(out.summary.converged);
        let omega = &out.fit[&RateName::Omega];
        assert_relative_eq!(omega.get(0, 0), 0.01, max_relative = 1e-6);
        assert_relative_eq!(omega.get(1, 0), 0.02, max_relative = 1e-6);
        assert_relative_eq!(omega.get(2, 0), 0.2, max_relative = 1e-6);
        assert_eq!(out.data_residuals.len(), 3);
        assert_eq!(out.fit_data, data);
        assert!(out.excluded_data.is_empty());
        assert_eq!(out.data_residuals[1].location, 2);
    }

    #[test]
    fn convergence_needs_a_stationary_point() {
        let (ctx, model) = (ctx(), omega_model());
        // The best omega(50) sits below the lower bound.
        let data = vec![row(Integrand::Mtother, 1, 50.0, -0.01)];
        let problem = Problem::new(&ctx, &model, &data, vec![0], &start(0.1));
        let weights = vec![1.0; problem.term_count()];
        let stationary = |x: &[f64]| {
            let r = problem.residuals(x, &weights).unwrap();
            let jac = problem.jacobian(x, &r, &weights).unwrap();
            problem.stationary(x, &jac, &r)
        };
        assert!(!stationary(&problem.start));
        let mut at_bound = problem.start.clone();
        at_bound[1] = 1e-6;
        assert!(stationary(&at_bound));
        at_bound[1] = 0.02;
        assert!(!stationary(&at_bound));

        let out = fit(&ctx, &model, &data, &start(0.1)).unwrap();
        assert!(out.summary.converged);
        assert_relative_eq!(out.fit[&RateName::Omega].get(1, 0), 1e-6, max_relative = 1e-3);
    }

    #[test]
    fn reports_every_prior_with_neighbours() {
        let data = vec![row(Integrand::Mtother, 1, 50.0, 0.05)];
        let out = fit(&ctx(), &omega_model(), &data, &start(0.1)).unwrap();
        // 3 value priors plus 2 dage priors; a single time has no dtime.
        assert_eq!(out.prior_residuals.len(), 5);
        assert!(out.prior_residuals.iter().all(|p| p.residual.is_none()));
        assert_eq!(
            out.prior_residuals
                .iter()
                .filter(|p| p.kind == PriorKind::Dage)
                .count(),
            2
        );
    }

    #[test]
    fn held_out_and_foreign_rows_are_excluded() {
        let mut model = omega_model();
        model.parent_location = 2;
        let mut held = row(Integrand::Mtother, 2, 0.0, 0.01);
        held.hold_out = true;
        let data = vec![
            held.clone(),
            row(Integrand::Mtother, 1, 50.0, 0.02),
            row(Integrand::Mtother, 2, 100.0, 0.2),
        ];
        let out = fit(&ctx(), &model, &data, &start(0.1)).unwrap();
        assert_eq!(out.excluded_data, vec![held, data[1].clone()]);
        assert_eq!(out.data_residuals.len(), 1);
        assert_eq!(out.data_residuals[0].data_index, 2);
    }

    #[test]
    fn constant_priors_fix_variables() {
        let mut model = omega_model();
        if let Some(smooth) = model.rates.get_mut(&RateName::Omega) {
            smooth.set_prior(PriorKind::Value, 0, 0, Prior::constant(0.03).unwrap());
        }
        let data = vec![row(Integrand::Mtother, 1, 0.0, 0.01)];
        let out = fit(&ctx(), &model, &data, &start(0.1)).unwrap();
        assert_eq!(out.fit[&RateName::Omega].get(0, 0), 0.03);
    }

    #[test]
    fn survival_data_identifies_mortality() {
        let truth = 0.02f64;
        let data: Vec<DataRecord> = [20.0, 50.0, 80.0, 100.0]
            .iter()
            .map(|&a| {
                let mut r = row(Integrand::Susceptible, 1, a, (-truth * a).exp());
                r.uncertainty.std = 1e-4;
                r
            })
            .collect();
        let mut model = omega_model();
        if let Some(smooth) = model.rates.get_mut(&RateName::Omega) {
            smooth.fill(PriorKind::Dage, Prior::gaussian(0.0, 1e-3).unwrap());
        }
        let out = fit(&ctx(), &model, &data, &start(0.05)).unwrap();
        for v in out.fit[&RateName::Omega].values() {
            assert_relative_eq!(*v, truth, max_relative = 1e-3);
        }
        assert!(out.prior_residuals.iter().any(|p| p.residual.is_some()));
    }

    #[test]
    fn laplace_rows_downweight_outliers() {
        let mut data: Vec<DataRecord> = (0..8)
            .map(|k| row(Integrand::Mtother, 1, 50.0 + k as f64 * 0.1, 0.02))
            .collect();
        data.push(row(Integrand::Mtother, 1, 50.0, 0.2));
        for r in &mut data {
            r.uncertainty.density = Density::Laplace;
        }
        let out = fit(&ctx(), &omega_model(), &data, &start(0.1)).unwrap();
        let mid = out.fit[&RateName::Omega].get(1, 0);
        // A Gaussian fit would land near the mean, 0.04.
        assert!((mid - 0.02).abs() < 0.01, "omega(50) = {mid}");
    }

    #[test]
    fn rejects_misaligned_start_and_bad_rows() {
        let mut wrong = start(0.1);
        let curve = wrong.remove(&RateName::Omega).unwrap();
        wrong.insert(RateName::Chi, curve);
        assert!(matches!(
            fit(&ctx(), &omega_model(), &[], &wrong),
            Err(EngineError::Misaligned(_))
        ));

        let mut bad = row(Integrand::Mtother, 1, 0.0, 0.01);
        bad.uncertainty.std = 0.0;
        assert!(matches!(
            fit(&ctx(), &omega_model(), &[bad], &start(0.1)),
            Err(EngineError::InvalidRow { index: 0, .. })
        ));

        let mut uniform = row(Integrand::Mtother, 1, 0.0, 0.01);
        uniform.uncertainty.density = Density::Uniform;
        assert!(fit(&ctx(), &omega_model(), &[uniform], &start(0.1)).is_err());

        assert!(matches!(
            fit(&ctx(), &Model::new(1, vec![]), &[], &Vars::new()),
            Err(EngineError::EmptyModel)
        ));
    }

    #[test]
    fn difference_residual_uses_log_scale_for_log_densities() {
        let p = Prior::log_gaussian(0.0, 0.5, 1e-5).unwrap();
        let r = difference_residual(&p, 0.01, 0.02).unwrap();
        let expected = -((0.02f64 + 1e-5).ln() - (0.01f64 + 1e-5).ln()) / 0.5;
        assert_relative_eq!(r, expected, max_relative = 1e-12);
        assert_eq!(difference_residual(&crate::models::NO_PRIOR, 0.0, 1.0), None);
    }
}
