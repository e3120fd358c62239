//! Formatted terminal output for runs.
//!
//! We keep formatting code in one place so:
//! - the engine and driver code stay clean and testable
//! - output changes are localized

use crate::data::SampleData;
use crate::domain::ScenarioConfig;
use crate::engine::{DataResidual, FitResult, Prediction};
use crate::report::{BandSummary, Outliers};

/// Format the full run summary (scenario, data, fit diagnostics, band check).
pub fn format_run_summary(
    config: &ScenarioConfig,
    prediction: &Prediction,
    sample: &SampleData,
    fit: &FitResult,
    band: &BandSummary,
) -> String {
    let mut out = String::new();

    out.push_str("=== cascade - predict/fit demonstration ===\n");
    out.push_str(&format!(
        "Location: {} ({})\n",
        config.location_name, config.location_id
    ));
    out.push_str(&format!(
        "Grid: ages [0, {}] step {} | time {}\n",
        config.age_max, config.age_step, config.time
    ));
    out.push_str(&format!(
        "Predict: {} satisfied, {} unsatisfied\n",
        prediction.predicted.len(),
        prediction.not_predicted.len()
    ));
    out.push_str(&format!(
        "Data: n={} | density={:?} cv={} | corrupted={} (x{} {} in ({}, {})) | held out={}\n",
        sample.data.len(),
        config.density,
        config.data_cv,
        sample.corrupted,
        config.mess_factor,
        config.mess_integrand,
        config.mess_lower,
        config.mess_upper,
        sample.held_out
    ));

    out.push_str("\nFit diagnostics:\n");
    out.push_str(&format!(
        "- iterations={} objective={:.6e} converged={}\n",
        fit.summary.iterations, fit.summary.objective, fit.summary.converged
    ));
    out.push_str(&format!(
        "- fit_data={} excluded_data={} data_residuals={} prior_residuals={}\n",
        fit.fit_data.len(),
        fit.excluded_data.len(),
        fit.data_residuals.len(),
        fit.prior_residuals.len()
    ));
    let informative = fit
        .prior_residuals
        .iter()
        .filter(|p| p.residual.is_some())
        .count();
    out.push_str(&format!("- informative priors={informative}\n"));

    out.push_str("\nResiduals (fit - truth):\n");
    out.push_str(&format!("- max |residual| = {:.6}\n", band.max_abs));
    out.push_str(&format!(
        "- mean |fit/truth - 1| inside ({}, {}) = {:.4} over {} knots\n",
        band.lower, band.upper, band.inside_mean_abs, band.inside_count
    ));
    out.push_str(&format!(
        "- mean |fit/truth - 1| outside           = {:.4} over {} knots\n",
        band.outside_mean_abs, band.outside_count
    ));
    out.push('\n');

    out
}

/// Table of satisfied prediction requests.
pub fn format_prediction(prediction: &Prediction) -> String {
    let mut out = String::new();
    push_line(
        &mut out,
        format!("{:>6} {:<20} {:>8} {:>10} {:>14}", "index", "integrand", "age", "time", "mean"),
    );
    push_line(
        &mut out,
        format!("{:-<6} {:-<20} {:-<8} {:-<10} {:-<14}", "", "", "", "", ""),
    );
    for p in &prediction.predicted {
        push_line(
            &mut out,
            format!(
                "{:>6} {:<20} {:>8.2} {:>10.2} {:>14.6e}",
                p.avgint_index,
                truncate(p.window.integrand.display_name(), 20),
                p.window.age_mid(),
                p.window.time_mid(),
                p.mean
            ),
        );
    }
    if !prediction.not_predicted.is_empty() {
        out.push_str(&format!(
            "({} requests could not be predicted)\n",
            prediction.not_predicted.len()
        ));
    }
    out
}

/// Format the worst-explained data rows on each side.
pub fn format_outliers(outliers: &Outliers) -> String {
    let mut out = String::new();

    out.push_str("Data above the fit (positive residual):\n");
    out.push_str(&format_table(&outliers.above));
    out.push('\n');

    out.push_str("Data below the fit (negative residual):\n");
    out.push_str(&format_table(&outliers.below));

    out
}

fn format_table(rows: &[DataResidual]) -> String {
    let mut out = String::new();
    push_line(
        &mut out,
        format!(
            "{:>6} {:<20} {:>8} {:>14} {:>10}",
            "row", "integrand", "age", "model", "residual"
        ),
    );
    push_line(
        &mut out,
        format!("{:-<6} {:-<20} {:-<8} {:-<14} {:-<10}", "", "", "", "", ""),
    );
    for r in rows {
        push_line(
            &mut out,
            format!(
                "{:>6} {:<20} {:>8.2} {:>14.6e} {:>10.3}",
                r.data_index,
                truncate(r.integrand.display_name(), 20),
                r.age_mid,
                r.avg_integrand,
                r.weighted_residual
            ),
        );
    }
    out
}

fn push_line(out: &mut String, line: String) {
    out.push_str(line.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
