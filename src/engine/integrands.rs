//! Integrand values at a point and averaged over an observation window.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::domain::{Integrand, ObservationWindow};
use crate::engine::ode::{OdeSolution, RateSet, RatesAt, solve};

/// Integrand at one point given the rates and the compartment sizes there.
pub fn integrand_value(integrand: Integrand, r: RatesAt, s: f64, c: f64) -> f64 {
    let alive = s + c;
    let prevalence = if alive > 0.0 { c / alive } else { 0.0 };
    match integrand {
        Integrand::Sincidence => r.iota,
        Integrand::Remission => r.rho,
        Integrand::Mtexcess => r.chi,
        Integrand::Mtother => r.omega,
        Integrand::Mtwith => r.omega + r.chi,
        Integrand::Susceptible => s,
        Integrand::WithC => c,
        Integrand::Prevalence => prevalence,
        Integrand::Tincidence => r.iota * (1.0 - prevalence),
        Integrand::Mtspecific => r.chi * prevalence,
        Integrand::Mtall => r.omega + r.chi * prevalence,
        Integrand::Relrisk => (r.omega + r.chi) / r.omega.max(f64::MIN_POSITIVE),
    }
}

/// Averages integrands over windows for one set of rates.
///
/// ODE solutions are computed once per distinct evaluation time and shared by
/// every window that needs them. Time-invariant rates need a single solution.
pub struct WindowAverager<'a> {
    rates: RateSet<'a>,
    step: f64,
    time_invariant: bool,
    solutions: HashMap<u64, OdeSolution>,
}

impl<'a> WindowAverager<'a> {
    pub fn new(rates: RateSet<'a>, step: f64, windows: &[&ObservationWindow]) -> Self {
        let time_invariant = rates.is_time_invariant();
        let mut age_max = 0.0f64;
        let mut times: Vec<f64> = Vec::new();
        for w in windows.iter().filter(|w| w.integrand.needs_ode()) {
            age_max = age_max.max(w.age_upper);
            for (t, _) in time_nodes(w, time_invariant) {
                times.push(t);
            }
            if time_invariant {
                times.truncate(1);
            }
        }
        times.sort_by(|a, b| a.total_cmp(b));
        times.dedup_by(|a, b| a.to_bits() == b.to_bits());

        let solutions = times
            .par_iter()
            .map(|&t| (solution_key(t, time_invariant), solve(&rates, t, age_max, step)))
            .collect();

        Self {
            rates,
            step,
            time_invariant,
            solutions,
        }
    }

    /// Trapezoid average over the window's age span and time nodes.
    pub fn average(&self, window: &ObservationWindow) -> f64 {
        let ages = age_nodes(window, self.step);
        let mut total = 0.0;
        for (t, wt) in time_nodes(window, self.time_invariant) {
            let solution = self.solutions.get(&solution_key(t, self.time_invariant));
            for &(a, wa) in &ages {
                let (s, c) = solution.map_or((1.0, 0.0), |sol| sol.at(a));
                let r = self.rates.at(a, t);
                total += wt * wa * integrand_value(window.integrand, r, s, c);
            }
        }
        total
    }
}

fn solution_key(time: f64, time_invariant: bool) -> u64 {
    if time_invariant { 0 } else { time.to_bits() }
}

/// Age nodes with trapezoid weights summing to one.
fn age_nodes(window: &ObservationWindow, step: f64) -> Vec<(f64, f64)> {
    let (a0, a1) = (window.age_lower, window.age_upper);
    if a1 <= a0 {
        return vec![(a0, 1.0)];
    }
    let n = ((a1 - a0) / step).ceil().max(1.0) as usize;
    let h = (a1 - a0) / n as f64;
    (0..=n)
        .map(|k| {
            let w = if k == 0 || k == n { 0.5 } else { 1.0 };
            (a0 + h * k as f64, w / n as f64)
        })
        .collect()
}

/// Time nodes: the midpoint alone for point windows or time-invariant rates,
/// otherwise both ends and the midpoint with trapezoid weights.
fn time_nodes(window: &ObservationWindow, time_invariant: bool) -> Vec<(f64, f64)> {
    let (t0, t1) = (window.time_lower, window.time_upper);
    if time_invariant || t1 <= t0 {
        return vec![(window.time_mid(), 1.0)];
    }
    vec![(t0, 0.25), (window.time_mid(), 0.5), (t1, 0.25)]
}
