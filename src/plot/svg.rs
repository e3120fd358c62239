//! SVG charts of a run, rendered with Plotters.
//!
//! Two files are written into the target directory:
//! - `mortality.svg`: log10 of the true and fitted rate with the mtother data
//! - `residuals.svg`: relative residual `fit / truth - 1` against age

use std::error::Error;
use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::domain::{DataRecord, GridResidual, Integrand};
use crate::error::AppError;
use crate::models::RateCurve;
use crate::report::relative_residual;

const SIZE: (u32, u32) = (1200, 700);

/// Write both charts into `dir` (created if missing) and return their paths.
pub fn write_run_svgs(
    dir: &Path,
    truth: &RateCurve,
    fit: &RateCurve,
    data: &[DataRecord],
    residuals: &[GridResidual],
) -> Result<Vec<PathBuf>, AppError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        AppError::new(2, format!("Failed to create SVG directory '{}': {e}", dir.display()))
    })?;

    let mortality = dir.join("mortality.svg");
    draw_rate_chart(&mortality, truth, fit, data)
        .map_err(|e| AppError::new(2, format!("Failed to draw '{}': {e}", mortality.display())))?;

    let residual_path = dir.join("residuals.svg");
    draw_residual_chart(&residual_path, residuals).map_err(|e| {
        AppError::new(2, format!("Failed to draw '{}': {e}", residual_path.display()))
    })?;

    log::info!("wrote SVG charts to {}", dir.display());
    Ok(vec![mortality, residual_path])
}

fn log_points(curve: &RateCurve) -> Vec<(f64, f64)> {
    curve
        .grid()
        .ages()
        .iter()
        .enumerate()
        .map(|(i, &age)| (age, curve.get(i, 0)))
        .filter(|p| p.1 > 0.0)
        .map(|(age, y)| (age, y.log10()))
        .collect()
}

fn bounds(points: impl Iterator<Item = (f64, f64)>) -> Option<((f64, f64), (f64, f64))> {
    let mut x = (f64::INFINITY, f64::NEG_INFINITY);
    let mut y = (f64::INFINITY, f64::NEG_INFINITY);
    for (px, py) in points.filter(|p| p.0.is_finite() && p.1.is_finite()) {
        x = (x.0.min(px), x.1.max(px));
        y = (y.0.min(py), y.1.max(py));
    }
    if !(x.1 > x.0) {
        return None;
    }
    let pad = ((y.1 - y.0) * 0.05).max(1e-6);
    Some((x, (y.0 - pad, y.1 + pad)))
}

fn draw_rate_chart(
    path: &Path,
    truth: &RateCurve,
    fit: &RateCurve,
    data: &[DataRecord],
) -> Result<(), Box<dyn Error>> {
    let truth_line = log_points(truth);
    let fit_line = log_points(fit);
    let (fitted, held_out): (Vec<_>, Vec<_>) = data
        .iter()
        .filter(|r| r.window.integrand == Integrand::Mtother && r.mean > 0.0)
        .partition(|r| !r.hold_out);
    let to_point = |r: &&DataRecord| (r.window.age_mid(), r.mean.log10());
    let fitted: Vec<(f64, f64)> = fitted.iter().map(to_point).collect();
    let held_out: Vec<(f64, f64)> = held_out.iter().map(to_point).collect();

    let all = truth_line
        .iter()
        .chain(&fit_line)
        .chain(&fitted)
        .chain(&held_out)
        .copied();
    let Some(((x0, x1), (y0, y1))) = bounds(all) else {
        return Err("no finite positive values to plot".into());
    };

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Other-cause mortality", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x0..x1, y0..y1)?;

    chart
        .configure_mesh()
        .x_desc("age")
        .y_desc("log10 rate")
        .x_labels(12)
        .draw()?;

    chart
        .draw_series(LineSeries::new(truth_line, BLACK))?
        .label("truth")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));
    chart
        .draw_series(LineSeries::new(fit_line, BLUE))?
        .label("fit")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(fitted.iter().map(|&p| Circle::new(p, 3, RED.filled())))?
        .label("data")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, RED.filled()));
    chart
        .draw_series(held_out.iter().map(|&p| Circle::new(p, 3, RED)))?
        .label("held out")
        .legend(|(x, y)| Circle::new((x + 10, y), 3, RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

fn draw_residual_chart(path: &Path, residuals: &[GridResidual]) -> Result<(), Box<dyn Error>> {
    let points: Vec<(f64, f64)> = residuals
        .iter()
        .map(|r| (r.age, relative_residual(r)))
        .collect();
    // Keep the zero line inside the y range.
    let with_zero = points.iter().copied().chain(points.first().map(|p| (p.0, 0.0)));
    let Some(((x0, x1), (y0, y1))) = bounds(with_zero) else {
        return Err("no finite residuals to plot".into());
    };

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Relative residual (fit / truth - 1)", ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x0..x1, y0..y1)?;

    chart
        .configure_mesh()
        .x_desc("age")
        .y_desc("fit / truth - 1")
        .x_labels(12)
        .draw()?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(x0, 0.0), (x1, 0.0)],
        BLACK.mix(0.6),
    )))?;
    chart.draw_series(points.iter().map(|&p| Circle::new(p, 3, BLUE.filled())))?;

    root.present()?;
    Ok(())
}
