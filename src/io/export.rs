//! Export residuals to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream scripts.

use std::path::Path;

use serde::Serialize;

use crate::domain::GridResidual;
use crate::engine::DataResidual;
use crate::error::AppError;
use crate::report::relative_residual;

#[derive(Serialize)]
struct GridRow {
    rate: String,
    age: f64,
    time: f64,
    truth: f64,
    fit: f64,
    residual: f64,
    relative: f64,
}

/// Write one row per grid point: `rate,age,time,truth,fit,residual,relative`.
pub fn write_grid_residuals_csv(path: &Path, residuals: &[GridResidual]) -> Result<(), AppError> {
    let rows = residuals.iter().map(|r| GridRow {
        rate: r.rate.to_string(),
        age: r.age,
        time: r.time,
        truth: r.truth,
        fit: r.fit,
        residual: r.residual,
        relative: relative_residual(r),
    });
    write_rows(path, rows)
}

/// Write one row per included data row, as reported by the fit.
pub fn write_data_residuals_csv(path: &Path, residuals: &[DataResidual]) -> Result<(), AppError> {
    write_rows(path, residuals.iter())
}

fn write_rows<T: Serialize>(path: &Path, rows: impl Iterator<Item = T>) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV '{}': {e}", path.display())))?;
    log::info!("wrote {}", path.display());
    Ok(())
}
