use thiserror::Error;

/// Main error type for the FDM design optimizer
#[derive(Error, Debug)]
pub enum FdmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Worker {worker_index} failed: {cause}")]
    WorkerFailure { worker_index: usize, cause: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl FdmError {
    /// True when no checkpoint exists for the requested run. The caller may
    /// start a fresh run instead.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FdmError::Checkpoint(CheckpointError::NotFound { .. }))
    }

    /// Only a missing checkpoint is recoverable; everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        self.is_not_found()
    }
}

/// Optimizer adapter errors
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Unknown strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("Invalid hyperparameter {parameter}: {message}")]
    InvalidHyperparameter { parameter: String, message: String },

    #[error("Candidate {ask_id} was not proposed by this optimizer or was already reported")]
    UnknownCandidate { ask_id: u64 },

    #[error("Optimizer state error: {message}")]
    State { message: String },
}

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("No checkpoint found for run {key}")]
    NotFound { key: String },

    #[error("Checkpoint corruption detected: {message}")]
    Corruption { message: String },

    #[error("Checkpoint belongs to run {found}, expected {expected}")]
    KeyMismatch { expected: String, found: String },
}

/// Result type alias for FDM operations
pub type FdmResult<T> = Result<T, FdmError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::FdmError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::FdmError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::FdmError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = FdmError::WorkerFailure {
            worker_index: 3,
            cause: "simulator exited with status 139".to_string(),
        };

        assert!(error.to_string().contains("Worker 3"));
        assert!(error.to_string().contains("139"));
    }

    #[test]
    fn test_error_conversion() {
        let optimizer_error = OptimizerError::UnknownStrategy {
            name: "Nelder".to_string(),
        };
        let fdm_error: FdmError = optimizer_error.into();

        match fdm_error {
            FdmError::Optimizer(OptimizerError::UnknownStrategy { name }) => assert_eq!(name, "Nelder"),
            _ => panic!("Expected Optimizer error"),
        }
    }

    #[test]
    fn test_not_found_is_recoverable() {
        let missing: FdmError = CheckpointError::NotFound { key: "run_DE_budget8".into() }.into();
        assert!(missing.is_not_found());
        assert!(missing.is_recoverable());

        let corrupt: FdmError = CheckpointError::Corruption { message: "short history".into() }.into();
        assert!(!corrupt.is_recoverable());
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, FdmError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, FdmError::Internal(_)));
        let config_err = config_error!("Missing required field: {}", "budget");
        assert!(config_err.to_string().contains("budget"));
    }
}
