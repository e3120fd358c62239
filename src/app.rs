//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - runs the scenario pipeline (or its prediction stage)
//! - prints reports/plots
//! - writes optional exports
//! - forwards `dmat` to the engine launcher

use clap::Parser;

use crate::cli::{Command, PlotArgs, RunArgs};
use crate::domain::{RateName, ScenarioConfig};
use crate::error::AppError;
use crate::models::{RateCurve, Vars};

pub mod pipeline;

/// Entry point for the `cascade` binary. Returns the process exit code.
pub fn run() -> Result<u8, AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // `cascade` and `cascade --seed 7` behave like `cascade run ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Run(args) => handle_run(args).map(|()| 0),
        Command::Predict(args) => handle_predict(args).map(|()| 0),
        Command::Plot(args) => handle_plot(args).map(|()| 0),
        Command::Dmat(args) => Ok(crate::launcher::run(&args.args)?),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = scenario_config_from_args(&args);
    let run = pipeline::run_scenario(&config)?;

    println!(
        "{}",
        crate::report::format_run_summary(&config, &run.prediction, &run.sample, &run.fit, &run.band)
    );
    let outliers = crate::report::rank_outliers(&run.fit.data_residuals, args.top);
    println!("{}", crate::report::format_outliers(&outliers));

    let (truth, fit) = omega_curves(&run.truth, &run.fit.fit)?;
    if config.plot {
        let plot = crate::plot::render_run_plots(
            truth,
            fit,
            &run.sample.data,
            &run.residuals,
            config.plot_width,
            config.plot_height,
        );
        println!("{plot}");
    }

    // Optional exports.
    if let Some(dir) = &config.svg_dir {
        crate::plot::write_run_svgs(dir, truth, fit, &run.sample.data, &run.residuals)?;
    }
    if let Some(path) = &config.export_results {
        crate::io::write_grid_residuals_csv(path, &run.residuals)?;
    }
    if let Some(path) = &config.export_data {
        crate::io::write_data_residuals_csv(path, &run.fit.data_residuals)?;
    }
    if let Some(path) = &config.export_run {
        crate::io::write_run_json(path, &run.to_run_file(&config))?;
    }

    Ok(())
}

fn handle_predict(args: RunArgs) -> Result<(), AppError> {
    let config = scenario_config_from_args(&args);
    let out = pipeline::run_predict(&config)?;
    println!("{}", crate::report::format_prediction(&out.prediction));
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let run = crate::io::read_run_json(&args.run)?;
    let (truth, fit) = run.curves(RateName::Omega)?;
    let plot = crate::plot::render_run_plots(
        truth,
        fit,
        &run.data,
        &run.grid_residuals,
        args.width,
        args.height,
    );
    println!("{plot}");
    Ok(())
}

fn omega_curves<'a>(truth: &'a Vars, fit: &'a Vars) -> Result<(&'a RateCurve, &'a RateCurve), AppError> {
    match (truth.get(&RateName::Omega), fit.get(&RateName::Omega)) {
        (Some(t), Some(f)) => Ok((t, f)),
        _ => Err(AppError::new(4, "Fit has no omega curve.")),
    }
}

pub fn scenario_config_from_args(args: &RunArgs) -> ScenarioConfig {
    ScenarioConfig {
        location_name: args.location.clone(),
        location_id: args.location_id,
        age_max: args.age_max,
        age_step: args.age_step,
        time: args.time,
        data_points: args.data_points,
        density: args.density,
        data_cv: args.data_cv,
        data_std_floor: args.data_std_floor,
        eta: args.eta,
        nu: args.nu,
        time_jitter: args.time_jitter,
        noise_cv: args.noise_cv,
        seed: args.seed,
        mess_integrand: args.mess_integrand,
        mess_lower: args.mess_lower,
        mess_upper: args.mess_upper,
        mess_factor: args.mess_factor,
        hold_out_every: args.hold_out_every,
        prior_mean_ratio: args.prior_mean_ratio,
        prior_lower_ratio: args.prior_lower_ratio,
        prior_upper_ratio: args.prior_upper_ratio,
        dage_std: args.dage_std,
        dtime_std: args.dtime_std,
        center_differences_on_truth: args.center_differences,
        ode_step_size: args.ode_step,
        max_iterations: args.max_iterations,
        tolerance: args.tolerance,
        session_path: args.session.clone(),
        plot: args.plot && !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        svg_dir: args.svg_dir.clone(),
        export_results: args.export.clone(),
        export_data: args.export_data.clone(),
        export_run: args.export_run.clone(),
    }
}

/// Rewrite argv so `cascade` defaults to `cascade run`.
///
/// Rules:
/// - `cascade`                      -> `cascade run`
/// - `cascade --seed 7 ...`         -> `cascade run --seed 7 ...`
/// - `cascade --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("run".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "run" | "predict" | "plot" | "dmat");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "run flags".
    if arg1.starts_with('-') {
        argv.insert(1, "run".to_string());
        return argv;
    }

    // Otherwise, leave as-is.
    argv
}
