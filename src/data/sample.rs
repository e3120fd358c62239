//! Prediction requests and synthetic observations derived from predictions.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{
    DataRecord, Integrand, ObservationWindow, PredictedRecord, ScenarioConfig, Uncertainty,
};
use crate::error::AppError;

/// Integrands requested from predict, in request order.
pub const REQUESTED_INTEGRANDS: [Integrand; 2] = [Integrand::Susceptible, Integrand::Mtother];

/// Multiplies selected rows by a constant factor.
///
/// A row is selected when its integrand matches and
/// `lower < age_lower < upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corruption {
    pub integrand: Integrand,
    pub lower: f64,
    pub upper: f64,
    pub factor: f64,
}

impl Corruption {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            integrand: config.mess_integrand,
            lower: config.mess_lower,
            upper: config.mess_upper,
            factor: config.mess_factor,
        }
    }

    pub fn selects(&self, window: &ObservationWindow) -> bool {
        window.integrand == self.integrand
            && self.lower < window.age_lower
            && window.age_lower < self.upper
    }
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub data: Vec<DataRecord>,
    /// Number of rows multiplied by the corruption factor.
    pub corrupted: usize,
    pub held_out: usize,
}

/// `data_points` evenly spaced ages from zero through `age_max`.
pub fn data_ages(config: &ScenarioConfig) -> Vec<f64> {
    let n = config.data_points;
    if n <= 1 {
        return vec![0.0; n];
    }
    let last = (n - 1) as f64;
    (0..n).map(|i| config.age_max * i as f64 / last).collect()
}

/// Every `every`-th row is held out, offset by half a period so the first
/// and last ages of each integrand stay in the fit.
fn is_held_out(k: usize, every: usize) -> bool {
    every > 0 && k % every == every / 2
}

/// Point windows at every data age for each requested integrand, at the
/// scenario's single time.
pub fn prediction_requests(config: &ScenarioConfig) -> Vec<ObservationWindow> {
    let ages = data_ages(config);
    REQUESTED_INTEGRANDS
        .iter()
        .flat_map(|&integrand| {
            ages.iter().map(move |&age| {
                ObservationWindow::point(integrand, config.location_id, age, config.time)
            })
        })
        .collect()
}

/// Turn predictions into observations: randomized time windows, the
/// configured uncertainty model, the corruption rule and hold-out flags.
pub fn synthesize(predicted: &[PredictedRecord], config: &ScenarioConfig) -> Result<SampleData, AppError> {
    validate(config)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let noise = if config.noise_cv > 0.0 {
        Some(
            Normal::new(0.0, config.noise_cv)
                .map_err(|e| AppError::new(2, format!("Noise distribution error: {e}")))?,
        )
    } else {
        None
    };
    let corruption = Corruption::from_config(config);

    let mut data = Vec::with_capacity(predicted.len());
    let mut corrupted = 0;
    let mut held_out = 0;

    for (k, p) in predicted.iter().enumerate() {
        let mut window = p.window.clone();
        window.time_lower = config.time - rng.gen_range(0.0..=config.time_jitter);
        window.time_upper = config.time + rng.gen_range(0.0..=config.time_jitter);

        let mut mean = p.mean;
        if let Some(noise) = &noise {
            mean *= (1.0 + noise.sample(&mut rng)).max(0.0);
        }

        if corruption.selects(&window) {
            mean *= corruption.factor;
            corrupted += 1;
        }

        let hold_out = is_held_out(k, config.hold_out_every);
        if hold_out {
            held_out += 1;
        }

        data.push(DataRecord {
            window,
            mean,
            uncertainty: Uncertainty {
                density: config.density,
                std: (config.data_cv * mean.abs()).max(config.data_std_floor),
                eta: config.eta,
                nu: config.nu,
            },
            hold_out,
        });
    }

    log::info!(
        "synthesized {} rows ({corrupted} corrupted, {held_out} held out)",
        data.len()
    );
    Ok(SampleData {
        data,
        corrupted,
        held_out,
    })
}

fn validate(config: &ScenarioConfig) -> Result<(), AppError> {
    if !(config.data_cv.is_finite() && config.data_cv >= 0.0) {
        return Err(AppError::new(2, "Data coefficient of variation must be finite and >= 0."));
    }
    if !(config.data_std_floor.is_finite() && config.data_std_floor > 0.0) {
        return Err(AppError::new(2, "Data std floor must be finite and > 0."));
    }
    if !(config.time_jitter.is_finite() && config.time_jitter >= 0.0) {
        return Err(AppError::new(2, "Time jitter must be finite and >= 0."));
    }
    if !(config.noise_cv.is_finite() && config.noise_cv >= 0.0) {
        return Err(AppError::new(2, "Noise coefficient of variation must be finite and >= 0."));
    }
    if !config.mess_factor.is_finite() {
        return Err(AppError::new(2, "Mess factor must be finite."));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predictions(config: &ScenarioConfig) -> Vec<PredictedRecord> {
        prediction_requests(config)
            .into_iter()
            .enumerate()
            .map(|(i, window)| PredictedRecord {
                sample_index: 0,
                avgint_index: i,
                window,
                mean: 0.5,
            })
            .collect()
    }

    #[test]
    fn default_requests_cover_two_integrands_at_sixty_ages() {
        let config = ScenarioConfig::default();
        let ages = data_ages(&config);
        assert_eq!(ages.len(), 60);
        assert_eq!(ages[0], 0.0);
        assert_eq!(ages[1], 120.0 / 59.0);
        assert_eq!(ages[59], 120.0);
        assert_eq!(data_ages(&ScenarioConfig { data_points: 1, ..config.clone() }), vec![0.0]);

        let requests = prediction_requests(&config);
        assert_eq!(requests.len(), 120);
        assert_eq!(requests[0].integrand, Integrand::Susceptible);
        assert_eq!(requests[60].integrand, Integrand::Mtother);
        assert!(requests.iter().all(|w| w.time_lower == 2000.0 && w.time_upper == 2000.0));
    }

    #[test]
    fn corruption_is_applied_once_per_selected_row() {
        let config = ScenarioConfig {
            mess_factor: 3.0,
            ..ScenarioConfig::default()
        };
        let sample = synthesize(&predictions(&config), &config).unwrap();
        // mtother rows 10..=19, ages 20.3 through 38.6.
        assert_eq!(sample.corrupted, 10);
        for row in &sample.data {
            let in_band = row.window.integrand == Integrand::Mtother
                && row.window.age_lower > 20.0
                && row.window.age_lower < 40.0;
            let expected = if in_band { 1.5 } else { 0.5 };
            assert_eq!(row.mean, expected);
        }
    }

    #[test]
    fn band_edges_are_exclusive() {
        let c = Corruption {
            integrand: Integrand::Mtother,
            lower: 20.0,
            upper: 40.0,
            factor: 2.0,
        };
        let at = |age| ObservationWindow::point(Integrand::Mtother, 1, age, 2000.0);
        assert!(!c.selects(&at(20.0)));
        assert!(c.selects(&at(20.5)));
        assert!(!c.selects(&at(40.0)));
        assert!(!c.selects(&ObservationWindow::point(Integrand::Susceptible, 1, 30.0, 2000.0)));
    }

    #[test]
    fn unit_factor_leaves_means_unchanged() {
        let config = ScenarioConfig::default();
        let sample = synthesize(&predictions(&config), &config).unwrap();
        assert!(sample.data.iter().all(|r| r.mean == 0.5));
        assert_eq!(sample.held_out, 10);
        assert!(sample.data[6].hold_out);
        assert!(!sample.data[5].hold_out);
    }

    #[test]
    fn hold_out_keeps_the_age_range_ends() {
        let config = ScenarioConfig::default();
        let sample = synthesize(&predictions(&config), &config).unwrap();
        for integrand in sample.data.chunks(config.data_points) {
            assert!(!integrand[0].hold_out);
            assert!(!integrand[config.data_points - 1].hold_out);
        }
        assert!(!is_held_out(3, 0));
        assert!(is_held_out(1, 2) && !is_held_out(0, 2));
    }

    #[test]
    fn time_windows_are_seeded_and_contain_the_knot() {
        let config = ScenarioConfig::default();
        let a = synthesize(&predictions(&config), &config).unwrap();
        let b = synthesize(&predictions(&config), &config).unwrap();
        assert_eq!(a.data, b.data);
        for row in &a.data {
            assert!(row.window.time_lower <= 2000.0 && row.window.time_upper >= 2000.0);
            assert!(row.window.time_upper - row.window.time_lower <= 10.0);
        }
        let std = a.data[0].uncertainty.std;
        assert!((std - 0.05).abs() < 1e-15);
    }

    #[test]
    fn rejects_negative_cv() {
        let config = ScenarioConfig {
            data_cv: -0.1,
            ..ScenarioConfig::default()
        };
        let err = synthesize(&[], &config).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
