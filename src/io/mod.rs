//! Input/output helpers.
//!
//! - residual exports (CSV) (`export`)
//! - run JSON read/write (`run_file`)

pub mod export;
pub mod run_file;

pub use export::*;
pub use run_file::*;
