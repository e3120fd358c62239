//! Plotting: deterministic ASCII plots for the terminal and SVG chart files.

pub mod ascii;
pub mod svg;

pub use ascii::*;
pub use svg::write_run_svgs;
