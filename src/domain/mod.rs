//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - engine vocabulary (`RateName`, `Integrand`, `Density`)
//! - observation rows (`ObservationWindow`, `DataRecord`, `PredictedRecord`)
//! - driver inputs and outputs (`ScenarioConfig`, `GridResidual`)

pub mod types;

pub use types::*;
