//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - fitted rate: `-` line
//! - true rate: `.` line
//! - observations: `o` (fitted), `x` (held out)
//! - residuals: `*`, with `=` marking zero

use crate::domain::{DataRecord, GridResidual, Integrand};
use crate::models::RateCurve;
use crate::report::relative_residual;

/// Age window and axis scale of one rate plot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeView {
    pub age_min: f64,
    pub age_max: f64,
    pub log_y: bool,
}

/// Render truth, fit and the direct observations of the rate (`integrand`).
pub fn render_rate_plot(
    truth: &RateCurve,
    fit: &RateCurve,
    data: &[DataRecord],
    integrand: Integrand,
    view: AgeView,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let (a_min, a_max) = (view.age_min, view.age_max);
    let scale = |y: f64| -> Option<f64> {
        if !view.log_y {
            Some(y)
        } else if y > 0.0 {
            Some(y.log10())
        } else {
            None
        }
    };

    let fit_points = sample_curve(fit, a_min, a_max, width, scale);
    let truth_points = sample_curve(truth, a_min, a_max, width, scale);
    let obs: Vec<(f64, f64, bool)> = data
        .iter()
        .filter(|r| r.window.integrand == integrand)
        .filter(|r| (a_min..=a_max).contains(&r.window.age_mid()))
        .filter_map(|r| scale(r.mean).map(|y| (r.window.age_mid(), y, r.hold_out)))
        .collect();

    let ys = fit_points
        .iter()
        .chain(&truth_points)
        .map(|p| p.1)
        .chain(obs.iter().map(|o| o.1));
    let (y_min, y_max) = y_range(ys).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Fit first so it wins where the two lines coincide.
    draw_curve(&mut grid, &fit_points, a_min, a_max, y_min, y_max, '-');
    draw_curve(&mut grid, &truth_points, a_min, a_max, y_min, y_max, '.');

    for &(age, y, held_out) in &obs {
        let x = map_x(age, a_min, a_max, width);
        let yy = map_y(y, y_min, y_max, height);
        grid[yy][x] = if held_out { 'x' } else { 'o' };
    }

    let axis = if view.log_y { " (log10)" } else { "" };
    let mut out = String::new();
    out.push_str(&format!(
        "Plot: age=[{a_min:.1}, {a_max:.1}] | y=[{y_min:.3e}, {y_max:.3e}]{axis}\n"
    ));
    push_grid(&mut out, grid);
    out
}

/// Scatter of relative residuals `fit / truth - 1` against age.
pub fn render_residual_plot(residuals: &[GridResidual], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let points: Vec<(f64, f64)> = residuals
        .iter()
        .map(|r| (r.age, relative_residual(r)))
        .filter(|p| p.1.is_finite())
        .collect();
    let (a_min, a_max) = x_range(points.iter().map(|p| p.0)).unwrap_or((0.0, 1.0));
    let ys = points.iter().map(|p| p.1).chain(std::iter::once(0.0));
    let (y_min, y_max) = y_range(ys).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    let zero = map_y(0.0, y_min, y_max, height);
    for cell in grid[zero].iter_mut() {
        *cell = '=';
    }
    for &(age, y) in &points {
        let x = map_x(age, a_min, a_max, width);
        let yy = map_y(y, y_min, y_max, height);
        grid[yy][x] = '*';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Residuals: age=[{a_min:.1}, {a_max:.1}] | fit/truth-1=[{y_min:.3}, {y_max:.3}]\n"
    ));
    push_grid(&mut out, grid);
    out
}

/// The standard set of plots for a run: full age range on a log axis, the
/// pediatric range on a linear axis, and the residual scatter.
pub fn render_run_plots(
    truth: &RateCurve,
    fit: &RateCurve,
    data: &[DataRecord],
    residuals: &[GridResidual],
    width: usize,
    height: usize,
) -> String {
    let ages = truth.grid().ages();
    let age_max = ages.last().copied().unwrap_or(0.0);
    let age_min = ages.first().copied().unwrap_or(0.0);
    let full = AgeView {
        age_min,
        age_max,
        log_y: true,
    };
    let pediatric = AgeView {
        age_min,
        age_max: age_max.min(20.0),
        log_y: false,
    };

    let mut out = String::new();
    out.push_str("Mortality, all ages:\n");
    out.push_str(&render_rate_plot(truth, fit, data, Integrand::Mtother, full, width, height));
    out.push('\n');
    out.push_str("Mortality, ages 0-20:\n");
    out.push_str(&render_rate_plot(truth, fit, data, Integrand::Mtother, pediatric, width, height));
    out.push('\n');
    out.push_str(&render_residual_plot(residuals, width, height));
    out
}

fn push_grid(out: &mut String, grid: Vec<Vec<char>>) {
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
}

fn sample_curve(
    curve: &RateCurve,
    a_min: f64,
    a_max: f64,
    n: usize,
    scale: impl Fn(f64) -> Option<f64>,
) -> Vec<(f64, f64)> {
    let time = curve.grid().times()[0];
    let n = n.max(2);
    (0..n)
        .filter_map(|i| {
            let u = i as f64 / (n as f64 - 1.0);
            let age = a_min + u * (a_max - a_min);
            scale(curve.evaluate(age, time)).map(|y| (age, y))
        })
        .collect()
}

fn x_range(xs: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = xs.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    (min.is_finite() && max.is_finite() && max > min).then_some((min, max))
}

fn y_range(ys: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    x_range(ys.filter(|y| y.is_finite()))
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((t - t_min) / (t_max - t_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(
    grid: &mut [Vec<char>],
    curve: &[(f64, f64)],
    a_min: f64,
    a_max: f64,
    y_min: f64,
    y_max: f64,
    ch: char,
) {
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(a, y) in curve {
        let x = map_x(a, a_min, a_max, width);
        let yy = map_y(y, y_min, y_max, height);
        match prev {
            Some((x0, y0)) => draw_line(grid, x0, y0, x, yy, ch),
            None if grid[yy][x] == ' ' => grid[yy][x] = ch,
            None => {}
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish). Only fills blank cells.
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Density, ObservationWindow, RateName, Uncertainty};
    use crate::models::AgeTimeGrid;

    fn grid() -> AgeTimeGrid {
        AgeTimeGrid::new(vec![0.0, 9.0], vec![2000.0]).unwrap()
    }

    fn observation(age: f64, mean: f64, hold_out: bool) -> DataRecord {
        DataRecord {
            window: ObservationWindow::point(Integrand::Mtother, 1, age, 2000.0),
            mean,
            uncertainty: Uncertainty {
                density: Density::Gaussian,
                std: 0.1,
                eta: None,
                nu: None,
            },
            hold_out,
        }
    }

    #[test]
    fn plot_golden_snapshot_small() {
        let truth = RateCurve::new(grid(), vec![0.0, 0.0]).unwrap();
        let fit = RateCurve::new(grid(), vec![0.0, 1.0]).unwrap();
        let data = vec![observation(9.0, 1.0, false)];
        let view = AgeView {
            age_min: 0.0,
            age_max: 9.0,
            log_y: false,
        };

        let txt = render_rate_plot(&truth, &fit, &data, Integrand::Mtother, view, 10, 5);
        let expected = concat!(
            "Plot: age=[0.0, 9.0] | y=[-5.000e-2, 1.050e0]\n",
            "         o\n",
            "      ---\x20\n",
            "    --    \n",
            " ---      \n",
            "-.........\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn log_axis_drops_non_positive_values_and_marks_hold_out() {
        let truth = RateCurve::new(grid(), vec![0.01, 1.0]).unwrap();
        let data = vec![observation(4.0, 0.0, false), observation(5.0, 0.1, true)];
        let view = AgeView {
            age_min: 0.0,
            age_max: 9.0,
            log_y: true,
        };
        let txt = render_rate_plot(&truth, &truth, &data, Integrand::Mtother, view, 20, 8);
        assert!(txt.starts_with("Plot: age=[0.0, 9.0]"));
        assert!(txt.lines().next().is_some_and(|l| l.ends_with("(log10)")));
        let body: String = txt.lines().skip(1).collect();
        assert_eq!(body.matches('x').count(), 1);
        assert_eq!(body.matches('o').count(), 0);
    }

    #[test]
    fn residual_plot_has_zero_line_and_one_star_per_knot() {
        let residuals: Vec<GridResidual> = (0..5)
            .map(|i| GridResidual {
                rate: RateName::Omega,
                age: i as f64 * 10.0,
                time: 2000.0,
                truth: 1.0,
                fit: 1.0 + 0.1 * i as f64,
                residual: 0.1 * i as f64,
            })
            .collect();
        let txt = render_residual_plot(&residuals, 41, 9);
        assert_eq!(txt.lines().count(), 10);
        // The zero residual at age 0 sits on the zero line.
        assert_eq!(txt.matches('*').count(), 5);
        assert!(txt.lines().any(|l| l.starts_with("*=")));
    }
}
