//! Session store: one JSON document per session, rewritten after every call.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DataRecord, LocationId, ObservationWindow};
use crate::engine::{EngineError, FitResult, Prediction, SessionOptions};
use crate::models::{LocationHierarchy, Model, Vars};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub tool: String,
    pub engine: String,
    pub created: DateTime<Utc>,
    pub parent_location: LocationId,
    pub locations: LocationHierarchy,
    pub options: SessionOptions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionInputs {
    /// Windows of the latest predict call.
    #[serde(default)]
    pub avgint: Vec<ObservationWindow>,
    /// Rate values of the latest predict call.
    #[serde(default)]
    pub predict_vars: Option<Vars>,
    #[serde(default)]
    pub data: Vec<DataRecord>,
    #[serde(default)]
    pub model: Option<Model>,
    #[serde(default)]
    pub start_var: Option<Vars>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionOutputs {
    #[serde(default)]
    pub predict: Option<Prediction>,
    #[serde(default)]
    pub fit: Option<FitResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// Everything a session has been asked and has answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub metadata: SessionMetadata,
    pub inputs: SessionInputs,
    pub outputs: SessionOutputs,
    pub log: Vec<LogEntry>,
}

/// Owns a session file on disk.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    file: SessionFile,
}

impl SessionStore {
    /// Create or truncate the store at `path` and write the metadata.
    pub fn create(path: impl Into<PathBuf>, metadata: SessionMetadata) -> Result<Self, EngineError> {
        let store = Self {
            path: path.into(),
            file: SessionFile {
                metadata,
                inputs: SessionInputs::default(),
                outputs: SessionOutputs::default(),
                log: Vec::new(),
            },
        };
        store.flush()?;
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<SessionFile, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| store_error(path, e))?;
        serde_json::from_str(&text).map_err(|e| store_error(path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &SessionFile {
        &self.file
    }

    pub fn record_predict(
        &mut self,
        vars: &Vars,
        windows: &[ObservationWindow],
        prediction: &Prediction,
    ) -> Result<(), EngineError> {
        self.file.inputs.avgint = windows.to_vec();
        self.file.inputs.predict_vars = Some(vars.clone());
        self.file.outputs.predict = Some(prediction.clone());
        self.log("end predict");
        self.flush()
    }

    pub fn record_fit(
        &mut self,
        model: &Model,
        data: &[DataRecord],
        start: &Vars,
        result: &FitResult,
    ) -> Result<(), EngineError> {
        self.file.inputs.model = Some(model.clone());
        self.file.inputs.data = data.to_vec();
        self.file.inputs.start_var = Some(start.clone());
        self.file.outputs.fit = Some(result.clone());
        self.log("end fit");
        self.flush()
    }

    fn log(&mut self, message: &str) {
        self.file.log.push(LogEntry {
            time: Utc::now(),
            message: message.to_string(),
        });
    }

    fn flush(&self) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| store_error(&self.path, e))?;
        }
        let json = serde_json::to_string_pretty(&self.file).map_err(|e| store_error(&self.path, e))?;
        fs::write(&self.path, json).map_err(|e| store_error(&self.path, e))
    }
}

fn store_error(path: &Path, e: impl std::fmt::Display) -> EngineError {
    EngineError::Store {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}
