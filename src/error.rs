use crate::engine::EngineError;
use crate::launcher::LaunchError;
use crate::models::{GridError, HierarchyError, PriorError};

/// Application-level error: a message plus the process exit code.
///
/// - 2: usage, configuration or I/O problems
/// - 3: the prediction gate rejected the engine's answer
/// - 4: the engine (or the model it was given) failed
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        Self::new(4, format!("Engine error: {e}"))
    }
}

impl From<GridError> for AppError {
    fn from(e: GridError) -> Self {
        Self::new(4, format!("Invalid grid: {e}"))
    }
}

impl From<PriorError> for AppError {
    fn from(e: PriorError) -> Self {
        Self::new(4, format!("Invalid prior: {e}"))
    }
}

impl From<HierarchyError> for AppError {
    fn from(e: HierarchyError) -> Self {
        Self::new(4, format!("Invalid location hierarchy: {e}"))
    }
}

impl From<LaunchError> for AppError {
    fn from(e: LaunchError) -> Self {
        Self::new(e.exit_code(), e.to_string())
    }
}
