//! Error types for voxflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxflowError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Pipeline composition errors
    #[error("Step id '{id}' is already registered")]
    DuplicateStepId { id: String },

    #[error("Unknown step id '{id}'")]
    UnknownStepId { id: String },

    #[error("Step '{id}' has no input queue and cannot be a connection target")]
    StepHasNoInput { id: String },

    #[error("Pipeline '{name}' is already running; wiring must complete before run()")]
    PipelineAlreadyRunning { name: String },

    #[error("Step '{id}' failed to initialize: {message}")]
    StepInitFailed { id: String, message: String },

    // Step runtime errors
    #[error("Step error: {message}")]
    Step { message: String },

    // Session registry errors
    #[error("Session registry is full ({capacity} sessions)")]
    SessionRegistryFull { capacity: usize },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VoxflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VoxflowError::DuplicateStepId {
            id: "asr".to_string(),
        };
        assert_eq!(err.to_string(), "Step id 'asr' is already registered");

        let err = VoxflowError::PipelineAlreadyRunning {
            name: "voice".to_string(),
        };
        assert!(err.to_string().contains("wiring must complete"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VoxflowError = io.into();
        assert!(matches!(err, VoxflowError::Io(_)));
    }
}
