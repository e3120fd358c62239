//! Mathematical utilities: interpolation and damped least squares.

pub mod interp;
pub mod ols;

pub use interp::*;
pub use ols::*;
