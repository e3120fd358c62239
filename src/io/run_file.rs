//! Read/write run JSON files.
//!
//! A run file is the portable record of one scenario run:
//! - the configuration it ran with
//! - the true and fitted rates on their grids
//! - the synthesized data and both residual tables
//!
//! `cascade plot --run <JSON>` re-renders the terminal plots from it.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DataRecord, GridResidual, RateName, ScenarioConfig};
use crate::engine::DataResidual;
use crate::error::AppError;
use crate::models::{RateCurve, Vars};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub config: ScenarioConfig,
    pub truth: Vars,
    pub fit: Vars,
    pub data: Vec<DataRecord>,
    pub grid_residuals: Vec<GridResidual>,
    pub data_residuals: Vec<DataResidual>,
}

impl RunFile {
    /// True and fitted curve of one rate.
    pub fn curves(&self, rate: RateName) -> Result<(&RateCurve, &RateCurve), AppError> {
        match (self.truth.get(&rate), self.fit.get(&rate)) {
            (Some(truth), Some(fit)) => Ok((truth, fit)),
            _ => Err(AppError::new(2, format!("Run file has no {rate} curves."))),
        }
    }
}

/// Write a run JSON file.
pub fn write_run_json(path: &Path, run: &RunFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create run JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), run)
        .map_err(|e| AppError::new(2, format!("Failed to write run JSON: {e}")))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// Read a run JSON file.
pub fn read_run_json(path: &Path) -> Result<RunFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open run JSON '{}': {e}", path.display())))?;
    let run: RunFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid run JSON: {e}")))?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgeTimeGrid;

    fn run_file() -> RunFile {
        let grid = AgeTimeGrid::new(vec![0.0, 60.0, 120.0], vec![2000.0]).unwrap();
        let truth = RateCurve::new(grid.clone(), vec![0.05, 0.01, 0.2]).unwrap();
        let fit = RateCurve::new(grid, vec![0.05, 0.012, 0.2]).unwrap();
        RunFile {
            tool: "cascade-demo".to_string(),
            created: Utc::now(),
            config: ScenarioConfig::default(),
            truth: Vars::from([(RateName::Omega, truth)]),
            fit: Vars::from([(RateName::Omega, fit)]),
            data: Vec::new(),
            grid_residuals: Vec::new(),
            data_residuals: Vec::new(),
        }
    }

    #[test]
    fn run_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let run = run_file();
        write_run_json(&path, &run).unwrap();
        let back = read_run_json(&path).unwrap();
        assert_eq!(back, run);
        let (truth, fit) = back.curves(RateName::Omega).unwrap();
        assert_eq!(truth.values()[1], 0.01);
        assert_eq!(fit.values()[1], 0.012);
    }

    #[test]
    fn missing_rate_is_reported() {
        let err = run_file().curves(RateName::Iota).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn garbage_is_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_run_json(&path).unwrap_err();
        assert!(err.to_string().starts_with("Invalid run JSON"));
    }

    #[test]
    fn curve_with_missing_values_is_rejected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        write_run_json(&path, &run_file()).unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        json["fit"]["omega"]["values"].as_array_mut().unwrap().pop();
        std::fs::write(&path, json.to_string()).unwrap();

        let err = read_run_json(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("3 points but 2 values"));
    }
}
