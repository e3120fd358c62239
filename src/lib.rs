//! `cascade-demo` library crate.
//!
//! The binary (`cascade`) is a thin wrapper around this library so that:
//!
//! - the scenario and the engine are testable without spawning processes
//! - another engine backend can be plugged in behind [`engine::Engine`]
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod io;
pub mod launcher;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
