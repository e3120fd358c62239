//! Model layer: what the engine is asked to predict from and fit.
//!
//! - rate curves on age/time grids (`grid`)
//! - priors and the per-point smooth grids that carry them (`priors`, `smooth_grid`)
//! - the location tree that scopes rows (`locations`)
//! - the fit model container (`model`)

pub mod grid;
pub mod locations;
pub mod model;
pub mod priors;
pub mod smooth_grid;

pub use grid::*;
pub use locations::*;
pub use model::*;
pub use priors::*;
pub use smooth_grid::*;
