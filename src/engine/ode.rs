//! Susceptible / with-condition compartment ODE along age.
//!
//! ```text
//! S' = -(iota + omega) S + rho C
//! C' =  iota S - (rho + chi + omega) C
//! S(0) = 1 - pini,  C(0) = pini
//! ```
//!
//! Solved with classic RK4 at a fixed time, on a uniform age grid whose step is
//! the largest step not exceeding the session's `ode_step_size`.

use crate::domain::RateName;
use crate::models::{RateCurve, Vars};

/// Rates at one (age, time) point. Missing rates are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatesAt {
    pub iota: f64,
    pub rho: f64,
    pub chi: f64,
    pub omega: f64,
}

/// Borrowed view of the rate curves of a model, with zero for absent rates.
#[derive(Debug, Clone, Copy)]
pub struct RateSet<'a> {
    pini: Option<&'a RateCurve>,
    iota: Option<&'a RateCurve>,
    rho: Option<&'a RateCurve>,
    chi: Option<&'a RateCurve>,
    omega: Option<&'a RateCurve>,
}

impl<'a> RateSet<'a> {
    pub fn new(vars: &'a Vars) -> Self {
        Self {
            pini: vars.get(&RateName::Pini),
            iota: vars.get(&RateName::Iota),
            rho: vars.get(&RateName::Rho),
            chi: vars.get(&RateName::Chi),
            omega: vars.get(&RateName::Omega),
        }
    }

    pub fn at(&self, age: f64, time: f64) -> RatesAt {
        let eval = |c: Option<&RateCurve>| c.map_or(0.0, |c| c.evaluate(age, time));
        RatesAt {
            iota: eval(self.iota),
            rho: eval(self.rho),
            chi: eval(self.chi),
            omega: eval(self.omega),
        }
    }

    /// Initial prevalence at birth.
    pub fn pini(&self, time: f64) -> f64 {
        self.pini.map_or(0.0, |c| c.evaluate(0.0, time))
    }

    /// True when no rate can change with time.
    pub fn is_time_invariant(&self) -> bool {
        [self.pini, self.iota, self.rho, self.chi, self.omega]
            .into_iter()
            .flatten()
            .all(RateCurve::is_time_invariant)
    }
}

/// Compartment sizes on a uniform age grid starting at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct OdeSolution {
    step: f64,
    s: Vec<f64>,
    c: Vec<f64>,
}

impl OdeSolution {
    /// `(S, C)` at `age`, interpolated between steps and held flat outside.
    pub fn at(&self, age: f64) -> (f64, f64) {
        let last = self.s.len() - 1;
        if age <= 0.0 || last == 0 {
            return (self.s[0], self.c[0]);
        }
        let pos = age / self.step;
        let lo = (pos.floor() as usize).min(last);
        if lo == last {
            return (self.s[last], self.c[last]);
        }
        let u = pos - lo as f64;
        (
            self.s[lo] + u * (self.s[lo + 1] - self.s[lo]),
            self.c[lo] + u * (self.c[lo + 1] - self.c[lo]),
        )
    }

    pub fn step(&self) -> f64 {
        self.step
    }
}

/// Integrate from age 0 to `age_max` at `time`.
pub fn solve(rates: &RateSet<'_>, time: f64, age_max: f64, max_step: f64) -> OdeSolution {
    let n = if age_max > 0.0 {
        (age_max / max_step).ceil().max(1.0) as usize
    } else {
        0
    };
    let step = if n > 0 { age_max / n as f64 } else { max_step };

    let pini = rates.pini(time);
    let mut s = Vec::with_capacity(n + 1);
    let mut c = Vec::with_capacity(n + 1);
    s.push(1.0 - pini);
    c.push(pini);

    let deriv = |age: f64, y: (f64, f64)| -> (f64, f64) {
        let r = rates.at(age, time);
        (
            -(r.iota + r.omega) * y.0 + r.rho * y.1,
            r.iota * y.0 - (r.rho + r.chi + r.omega) * y.1,
        )
    };

    for k in 0..n {
        let a = k as f64 * step;
        let y = (s[k], c[k]);
        let k1 = deriv(a, y);
        let k2 = deriv(a + 0.5 * step, (y.0 + 0.5 * step * k1.0, y.1 + 0.5 * step * k1.1));
        let k3 = deriv(a + 0.5 * step, (y.0 + 0.5 * step * k2.0, y.1 + 0.5 * step * k2.1));
        let k4 = deriv(a + step, (y.0 + step * k3.0, y.1 + step * k3.1));
        s.push(y.0 + step / 6.0 * (k1.0 + 2.0 * k2.0 + 2.0 * k3.0 + k4.0));
        c.push(y.1 + step / 6.0 * (k1.1 + 2.0 * k2.1 + 2.0 * k3.1 + k4.1));
    }

    OdeSolution { step, s, c }
}
