//! Command-line parsing for the predict/fit demonstration.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the engine and scenario code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{Density, Integrand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "cascade",
    version,
    about = "Predict-then-fit mortality demonstration against a Dismod-AT style engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full scenario: truth, predict, synthesize, fit, residuals, plots.
    Run(RunArgs),
    /// Run the prediction stage only and print the predicted table.
    Predict(RunArgs),
    /// Plot a previously exported run JSON.
    Plot(PlotArgs),
    /// Run a Dismod-AT binary (image, local install or container) with these arguments.
    Dmat(DmatArgs),
}

/// Scenario options shared by `run` and `predict`.
#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Name of the single location.
    #[arg(long, default_value = "global")]
    pub location: String,

    /// Id of the single location.
    #[arg(long, default_value_t = 1)]
    pub location_id: i64,

    /// Upper end of the age grid (years).
    #[arg(long, default_value_t = 120.0)]
    pub age_max: f64,

    /// Spacing of the age knots (years).
    #[arg(long, default_value_t = 1.0)]
    pub age_step: f64,

    /// The single time knot (year).
    #[arg(long, default_value_t = 2000.0)]
    pub time: f64,

    /// Number of ages requested for each integrand.
    #[arg(short = 'n', long, default_value_t = 60)]
    pub data_points: usize,

    /// Density of the synthesized data.
    #[arg(long, value_enum, default_value_t = Density::Gaussian)]
    pub density: Density,

    /// Data std as a fraction of the mean.
    #[arg(long, default_value_t = 0.1)]
    pub data_cv: f64,

    /// Absolute floor on the data std.
    #[arg(long, default_value_t = 1e-4)]
    pub data_std_floor: f64,

    /// Offset for log densities.
    #[arg(long)]
    pub eta: Option<f64>,

    /// Degrees of freedom for Student's densities.
    #[arg(long)]
    pub nu: Option<f64>,

    /// Half-width of the random time window around the time knot.
    #[arg(long, default_value_t = 5.0)]
    pub time_jitter: f64,

    /// Multiplicative gaussian noise on data means (0 disables).
    #[arg(long, default_value_t = 0.0)]
    pub noise_cv: f64,

    /// Random seed for data synthesis.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Integrand whose rows get corrupted.
    #[arg(long, value_enum, default_value_t = Integrand::Mtother)]
    pub mess_integrand: Integrand,

    /// Corrupt rows with age_lower above this age.
    #[arg(long, default_value_t = 20.0)]
    pub mess_lower: f64,

    /// Corrupt rows with age_lower below this age.
    #[arg(long, default_value_t = 40.0)]
    pub mess_upper: f64,

    /// Factor applied to corrupted rows (1 leaves the data unchanged).
    #[arg(long, default_value_t = 1.0)]
    pub mess_factor: f64,

    /// Hold every n-th row out of the fit (0 disables).
    #[arg(long, default_value_t = 12)]
    pub hold_out_every: usize,

    /// Value prior mean as a multiple of the truth.
    #[arg(long, default_value_t = 1.0)]
    pub prior_mean_ratio: f64,

    /// Value prior lower bound as a multiple of the truth.
    #[arg(long, default_value_t = 0.1)]
    pub prior_lower_ratio: f64,

    /// Value prior upper bound as a multiple of the truth.
    #[arg(long, default_value_t = 10.0)]
    pub prior_upper_ratio: f64,

    /// Std of the age-difference priors.
    #[arg(long, default_value_t = 1.0)]
    pub dage_std: f64,

    /// Std of the time-difference priors.
    #[arg(long, default_value_t = 1.0)]
    pub dtime_std: f64,

    /// Center difference priors on the truth's own differences.
    #[arg(long)]
    pub center_differences: bool,

    /// ODE and averaging step (years).
    #[arg(long, default_value_t = 0.5)]
    pub ode_step: f64,

    /// Iteration cap for the fit.
    #[arg(long, default_value_t = 500)]
    pub max_iterations: usize,

    /// Relative objective decrease that counts as converged.
    #[arg(long, default_value_t = 1e-10)]
    pub tolerance: f64,

    /// Session store file.
    #[arg(long, value_name = "JSON", default_value = "cascade_session.json")]
    pub session: PathBuf,

    /// Show the top-N worst data residuals on each side.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Render ASCII plots in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plots.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Write SVG charts into this directory.
    #[arg(long, value_name = "DIR")]
    pub svg_dir: Option<PathBuf>,

    /// Export grid residuals to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export data residuals to CSV.
    #[arg(long = "export-data", value_name = "CSV")]
    pub export_data: Option<PathBuf>,

    /// Export the run (config, truth, fit, data, residuals) to JSON.
    #[arg(long = "export-run", value_name = "JSON")]
    pub export_run: Option<PathBuf>,
}

/// Options for plotting a saved run.
#[derive(Debug, Args)]
pub struct PlotArgs {
    /// Run JSON file produced by `cascade run --export-run`.
    #[arg(long, value_name = "JSON")]
    pub run: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

/// Arguments forwarded to the engine binary.
#[derive(Debug, Args)]
pub struct DmatArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub args: Vec<String>,
}
