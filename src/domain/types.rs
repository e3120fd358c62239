//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - handed to the engine during predict/fit
//! - persisted into the session store
//! - exported to JSON/CSV and reloaded later for plotting

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Integer identifier of a node in the location hierarchy.
pub type LocationId = i64;

/// Named covariate values attached to an observation row.
pub type Covariates = BTreeMap<String, f64>;

/// Underlying rates of the two-compartment model.
///
/// `pini` is the initial prevalence at age zero; the others are hazards:
/// incidence (`iota`), remission (`rho`), excess mortality (`chi`) and
/// other-cause mortality (`omega`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RateName {
    Pini,
    Iota,
    Rho,
    Chi,
    Omega,
}

impl RateName {
    pub fn as_str(self) -> &'static str {
        match self {
            RateName::Pini => "pini",
            RateName::Iota => "iota",
            RateName::Rho => "rho",
            RateName::Chi => "chi",
            RateName::Omega => "omega",
        }
    }
}

impl fmt::Display for RateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurable quantities computed from the rates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum Integrand {
    /// Incidence per susceptible (`iota`).
    #[serde(rename = "Sincidence")]
    #[value(name = "sincidence")]
    Sincidence,
    #[serde(rename = "remission")]
    #[value(name = "remission")]
    Remission,
    #[serde(rename = "mtexcess")]
    #[value(name = "mtexcess")]
    Mtexcess,
    /// Other-cause mortality (`omega`).
    #[serde(rename = "mtother")]
    #[value(name = "mtother")]
    Mtother,
    #[serde(rename = "mtwith")]
    #[value(name = "mtwith")]
    Mtwith,
    /// Fraction of the cohort still alive and without the condition.
    #[serde(rename = "susceptible")]
    #[value(name = "susceptible")]
    Susceptible,
    #[serde(rename = "withC")]
    #[value(name = "withc")]
    WithC,
    #[serde(rename = "prevalence")]
    #[value(name = "prevalence")]
    Prevalence,
    /// Incidence per total population.
    #[serde(rename = "Tincidence")]
    #[value(name = "tincidence")]
    Tincidence,
    #[serde(rename = "mtspecific")]
    #[value(name = "mtspecific")]
    Mtspecific,
    #[serde(rename = "mtall")]
    #[value(name = "mtall")]
    Mtall,
    #[serde(rename = "relrisk")]
    #[value(name = "relrisk")]
    Relrisk,
}

impl Integrand {
    /// Engine-facing name, as stored in the session file.
    pub fn as_str(self) -> &'static str {
        match self {
            Integrand::Sincidence => "Sincidence",
            Integrand::Remission => "remission",
            Integrand::Mtexcess => "mtexcess",
            Integrand::Mtother => "mtother",
            Integrand::Mtwith => "mtwith",
            Integrand::Susceptible => "susceptible",
            Integrand::WithC => "withC",
            Integrand::Prevalence => "prevalence",
            Integrand::Tincidence => "Tincidence",
            Integrand::Mtspecific => "mtspecific",
            Integrand::Mtall => "mtall",
            Integrand::Relrisk => "relrisk",
        }
    }

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            Integrand::Susceptible => "fraction surviving",
            Integrand::Mtother => "other-cause mortality",
            Integrand::Mtall => "all-cause mortality",
            Integrand::Prevalence => "prevalence",
            other => other.as_str(),
        }
    }

    /// Whether the integrand needs the ODE solution (compartment sizes) or only
    /// the rates at the evaluation point.
    pub fn needs_ode(self) -> bool {
        matches!(
            self,
            Integrand::Susceptible
                | Integrand::WithC
                | Integrand::Prevalence
                | Integrand::Tincidence
                | Integrand::Mtspecific
                | Integrand::Mtall
        )
    }
}

impl fmt::Display for Integrand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Density families, in the engine's density-table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Density {
    Uniform,
    Gaussian,
    Laplace,
    Students,
    LogGaussian,
    LogLaplace,
    LogStudents,
}

impl Density {
    pub const ALL: [Density; 7] = [
        Density::Uniform,
        Density::Gaussian,
        Density::Laplace,
        Density::Students,
        Density::LogGaussian,
        Density::LogLaplace,
        Density::LogStudents,
    ];

    /// Row id in the engine's density table.
    pub fn id(self) -> usize {
        match self {
            Density::Uniform => 0,
            Density::Gaussian => 1,
            Density::Laplace => 2,
            Density::Students => 3,
            Density::LogGaussian => 4,
            Density::LogLaplace => 5,
            Density::LogStudents => 6,
        }
    }

    pub fn from_id(id: usize) -> Option<Density> {
        Density::ALL.get(id).copied()
    }

    pub fn is_log(self) -> bool {
        matches!(
            self,
            Density::LogGaussian | Density::LogLaplace | Density::LogStudents
        )
    }

    pub fn needs_nu(self) -> bool {
        matches!(self, Density::Students | Density::LogStudents)
    }
}

/// Where and when a measurement applies: the "avgint" row of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationWindow {
    pub integrand: Integrand,
    pub location: LocationId,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub covariates: Covariates,
}

impl ObservationWindow {
    pub fn point(integrand: Integrand, location: LocationId, age: f64, time: f64) -> Self {
        Self {
            integrand,
            location,
            age_lower: age,
            age_upper: age,
            time_lower: time,
            time_upper: time,
            covariates: Covariates::new(),
        }
    }

    pub fn age_mid(&self) -> f64 {
        0.5 * (self.age_lower + self.age_upper)
    }

    pub fn time_mid(&self) -> f64 {
        0.5 * (self.time_lower + self.time_upper)
    }
}

/// Measurement uncertainty for one data row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Uncertainty {
    pub density: Density,
    pub std: f64,
    /// Offset for log densities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<f64>,
    /// Degrees of freedom for Student's densities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nu: Option<f64>,
}

/// A supplied observation: window plus measured mean and its uncertainty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub window: ObservationWindow,
    pub mean: f64,
    pub uncertainty: Uncertainty,
    #[serde(default)]
    pub hold_out: bool,
}

/// A satisfied prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedRecord {
    pub sample_index: usize,
    /// Index of the request in the submitted window list.
    pub avgint_index: usize,
    pub window: ObservationWindow,
    pub mean: f64,
}

/// Fitted-minus-true value at one grid point of a rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridResidual {
    pub rate: RateName,
    pub age: f64,
    pub time: f64,
    pub truth: f64,
    pub fit: f64,
    pub residual: f64,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub location_name: String,
    pub location_id: LocationId,

    /// Upper end of the age grid (years).
    pub age_max: f64,
    /// Spacing of the age knots (years).
    pub age_step: f64,
    /// The single time knot.
    pub time: f64,
    /// Number of distinct ages requested for each integrand.
    pub data_points: usize,

    pub density: Density,
    /// Data std as a fraction of the mean.
    pub data_cv: f64,
    /// Absolute floor on the data std.
    pub data_std_floor: f64,
    pub eta: Option<f64>,
    pub nu: Option<f64>,
    /// Each row's time window is drawn inside `time +/- time_jitter`.
    pub time_jitter: f64,
    /// Multiplicative gaussian noise on the data means; zero disables it.
    pub noise_cv: f64,
    pub seed: u64,

    /// Rows of this integrand with `mess_lower < age_lower < mess_upper` are
    /// multiplied by `mess_factor`.
    pub mess_integrand: Integrand,
    pub mess_lower: f64,
    pub mess_upper: f64,
    pub mess_factor: f64,
    /// Every n-th row is held out of the fit; zero holds out nothing.
    pub hold_out_every: usize,

    pub prior_mean_ratio: f64,
    pub prior_lower_ratio: f64,
    pub prior_upper_ratio: f64,
    pub dage_std: f64,
    pub dtime_std: f64,
    pub center_differences_on_truth: bool,

    pub ode_step_size: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub session_path: PathBuf,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub svg_dir: Option<PathBuf>,
    pub export_results: Option<PathBuf>,
    pub export_data: Option<PathBuf>,
    pub export_run: Option<PathBuf>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            location_name: "global".to_string(),
            location_id: 1,
            age_max: 120.0,
            age_step: 1.0,
            time: 2000.0,
            data_points: 60,
            density: Density::Gaussian,
            data_cv: 0.1,
            data_std_floor: 1e-4,
            eta: None,
            nu: None,
            time_jitter: 5.0,
            noise_cv: 0.0,
            seed: 42,
            mess_integrand: Integrand::Mtother,
            mess_lower: 20.0,
            mess_upper: 40.0,
            mess_factor: 1.0,
            hold_out_every: 12,
            prior_mean_ratio: 1.0,
            prior_lower_ratio: 0.1,
            prior_upper_ratio: 10.0,
            dage_std: 1.0,
            dtime_std: 1.0,
            center_differences_on_truth: false,
            ode_step_size: 0.5,
            max_iterations: 500,
            tolerance: 1e-10,
            session_path: PathBuf::from("cascade_session.json"),
            plot: true,
            plot_width: 100,
            plot_height: 25,
            svg_dir: None,
            export_results: None,
            export_data: None,
            export_run: None,
        }
    }
}
