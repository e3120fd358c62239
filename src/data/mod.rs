//! Scenario inputs: the ground-truth hazard and the synthetic data built from
//! the engine's predictions of it.

pub mod sample;
pub mod truth;

pub use sample::{Corruption, SampleData, data_ages, prediction_requests, synthesize};
pub use truth::{Siler, knot_ages, truth_grid, truth_vars};
