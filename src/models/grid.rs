//! Age/time grids and rate curves defined on them.
//!
//! A `RateCurve` is the operational form of a hazard: knot values on a
//! rectangular grid, evaluated bilinearly inside the grid and held flat outside.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RateName;
use crate::math::{bracket, is_strictly_increasing};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("Grid ages must be non-empty, finite and strictly increasing: {0:?}")]
    InvalidAges(Vec<f64>),
    #[error("Grid times must be non-empty, finite and strictly increasing: {0:?}")]
    InvalidTimes(Vec<f64>),
    #[error("Grid has {expected} points but {found} values were supplied.")]
    ValueCount { expected: usize, found: usize },
    #[error("Rate value at age {age}, time {time} is not finite: {value}")]
    NonFiniteValue { age: f64, time: f64, value: f64 },
}

/// Rectangular set of knots. Points are stored age-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridKnots")]
pub struct AgeTimeGrid {
    ages: Vec<f64>,
    times: Vec<f64>,
}

impl AgeTimeGrid {
    pub fn new(ages: Vec<f64>, times: Vec<f64>) -> Result<Self, GridError> {
        if !is_strictly_increasing(&ages) {
            return Err(GridError::InvalidAges(ages));
        }
        if !is_strictly_increasing(&times) {
            return Err(GridError::InvalidTimes(times));
        }
        Ok(Self { ages, times })
    }

    pub fn ages(&self) -> &[f64] {
        &self.ages
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.ages.len() * self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of `(age_idx, time_idx)`.
    pub fn index(&self, age_idx: usize, time_idx: usize) -> usize {
        age_idx * self.times.len() + time_idx
    }

    /// All `(age_idx, time_idx)` pairs in storage order.
    pub fn indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let nt = self.times.len();
        (0..self.ages.len()).flat_map(move |i| (0..nt).map(move |j| (i, j)))
    }
}

/// A rate as knot values over an `AgeTimeGrid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveValues")]
pub struct RateCurve {
    grid: AgeTimeGrid,
    values: Vec<f64>,
}

impl RateCurve {
    pub fn new(grid: AgeTimeGrid, values: Vec<f64>) -> Result<Self, GridError> {
        if values.len() != grid.len() {
            return Err(GridError::ValueCount {
                expected: grid.len(),
                found: values.len(),
            });
        }
        let curve = Self { grid, values };
        curve.check_finite()?;
        Ok(curve)
    }

    /// Sample `f(age, time)` at every knot.
    pub fn from_fn(grid: AgeTimeGrid, f: impl Fn(f64, f64) -> f64) -> Result<Self, GridError> {
        let values = grid
            .indices()
            .map(|(i, j)| f(grid.ages[i], grid.times[j]))
            .collect();
        Self::new(grid, values)
    }

    pub fn constant(grid: AgeTimeGrid, value: f64) -> Result<Self, GridError> {
        Self::from_fn(grid, |_, _| value)
    }

    pub fn grid(&self) -> &AgeTimeGrid {
        &self.grid
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, age_idx: usize, time_idx: usize) -> f64 {
        self.values[self.grid.index(age_idx, time_idx)]
    }

    /// Bilinear evaluation with flat extrapolation in both directions.
    pub fn evaluate(&self, age: f64, time: f64) -> f64 {
        let (a0, a1, ua) = bracket(&self.grid.ages, age);
        let (t0, t1, ut) = bracket(&self.grid.times, time);
        let v00 = self.get(a0, t0);
        let v01 = self.get(a0, t1);
        let v10 = self.get(a1, t0);
        let v11 = self.get(a1, t1);
        let lo = v00 + ut * (v01 - v00);
        let hi = v10 + ut * (v11 - v10);
        lo + ua * (hi - lo)
    }

    /// True when the curve cannot vary with time.
    pub fn is_time_invariant(&self) -> bool {
        self.grid.times.len() == 1
    }

    fn check_finite(&self) -> Result<(), GridError> {
        for (i, j) in self.grid.indices() {
            let value = self.get(i, j);
            if !value.is_finite() {
                return Err(GridError::NonFiniteValue {
                    age: self.grid.ages[i],
                    time: self.grid.times[j],
                    value,
                });
            }
        }
        Ok(())
    }
}

// Unchecked wire forms. Deserialized grids and curves go through the same
// checks as `AgeTimeGrid::new` and `RateCurve::new`.
#[derive(Deserialize)]
struct GridKnots {
    ages: Vec<f64>,
    times: Vec<f64>,
}

impl TryFrom<GridKnots> for AgeTimeGrid {
    type Error = GridError;

    fn try_from(raw: GridKnots) -> Result<Self, Self::Error> {
        Self::new(raw.ages, raw.times)
    }
}

#[derive(Deserialize)]
struct CurveValues {
    grid: AgeTimeGrid,
    values: Vec<f64>,
}

impl TryFrom<CurveValues> for RateCurve {
    type Error = GridError;

    fn try_from(raw: CurveValues) -> Result<Self, Self::Error> {
        Self::new(raw.grid, raw.values)
    }
}

/// Values for each rate: a rate assignment for predict, an initial guess or a
/// fit output.
pub type Vars = BTreeMap<RateName, RateCurve>;

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(ages: &[f64], times: &[f64]) -> AgeTimeGrid {
        AgeTimeGrid::new(ages.to_vec(), times.to_vec()).unwrap()
    }

    #[test]
    fn rejects_non_increasing_knots() {
        assert!(matches!(
            AgeTimeGrid::new(vec![0.0, 0.0], vec![2000.0]),
            Err(GridError::InvalidAges(_))
        ));
        assert!(matches!(
            AgeTimeGrid::new(vec![0.0], vec![]),
            Err(GridError::InvalidTimes(_))
        ));
        assert!(AgeTimeGrid::new(vec![0.0, f64::NAN], vec![2000.0]).is_err());
    }

    #[test]
    fn rejects_value_count_mismatch() {
        let g = grid(&[0.0, 1.0], &[2000.0]);
        assert_eq!(
            RateCurve::new(g, vec![1.0]),
            Err(GridError::ValueCount { expected: 2, found: 1 })
        );
    }

    #[test]
    fn deserializing_checks_knots_and_values() {
        let curve: RateCurve = serde_json::from_str(
            r#"{"grid":{"ages":[0.0,50.0],"times":[2000.0]},"values":[0.01,0.02]}"#,
        )
        .unwrap();
        assert!((curve.evaluate(25.0, 2000.0) - 0.015).abs() < 1e-15);

        let empty = serde_json::from_str::<AgeTimeGrid>(r#"{"ages":[],"times":[2000.0]}"#);
        assert!(empty.unwrap_err().to_string().contains("Grid ages"));
        let short = serde_json::from_str::<RateCurve>(
            r#"{"grid":{"ages":[0.0,50.0],"times":[2000.0]},"values":[0.01]}"#,
        );
        assert!(short.unwrap_err().to_string().contains("2 points but 1 values"));
    }

    #[test]
    fn evaluates_bilinearly_inside_grid() {
        let g = grid(&[0.0, 10.0], &[2000.0, 2010.0]);
        let curve = RateCurve::from_fn(g, |a, t| a + (t - 2000.0) * 0.1).unwrap();
        assert!((curve.evaluate(5.0, 2005.0) - 5.5).abs() < 1e-12);
        assert!((curve.evaluate(2.5, 2000.0) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn evaluates_flat_outside_grid() {
        let g = grid(&[0.0, 10.0, 20.0], &[2000.0]);
        let curve = RateCurve::new(g, vec![0.1, 0.2, 0.4]).unwrap();
        assert_eq!(curve.evaluate(-3.0, 2000.0), 0.1);
        assert_eq!(curve.evaluate(99.0, 1950.0), 0.4);
        assert_eq!(curve.evaluate(10.0, 2050.0), 0.2);
        assert!(curve.is_time_invariant());
    }

    #[test]
    fn storage_is_age_major() {
        let g = grid(&[0.0, 1.0], &[2000.0, 2001.0, 2002.0]);
        let pairs: Vec<_> = g.indices().collect();
        assert_eq!(pairs[1], (0, 1));
        assert_eq!(g.index(1, 0), 3);
    }
}
