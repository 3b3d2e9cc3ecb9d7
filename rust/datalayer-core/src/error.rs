// rust/datalayer-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataLayerError {

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Record store error: {message}")]
    Store {
        message: String,
    },

    #[error("No non-matching record for label {label} after {attempts} attempts; the label space is too small")]
    PairingExhausted {
        label: i32,
        attempts: usize,
    },

    #[error("No record with label {label} in the visited shard")]
    LabelNotFound {
        label: i32,
    },

    #[error("Primary published {actual} labels but this pipeline's batch size is {expected}")]
    LabelCountMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Malformed side-channel labels: {message}")]
    MalformedLabels {
        message: String,
    },

    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch {
        expected: usize,
        actual: usize,
    },

    #[error("Pipeline was cancelled")]
    Cancelled,

    #[error("Pipeline '{pipeline}' halted: {message}")]
    WorkerHalted {
        pipeline: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, DataLayerError>;

// Convenience constructors
impl DataLayerError {

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn malformed_labels(message: impl Into<String>) -> Self {
        Self::MalformedLabels {
            message: message.into(),
        }
    }

    pub fn worker_halted(pipeline: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerHalted {
            pipeline: pipeline.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that indicate a misconfigured data layer
    /// rather than a failing collaborator.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::PairingExhausted { .. }
                | Self::LabelNotFound { .. }
                | Self::LabelCountMismatch { .. }
                | Self::MalformedLabels { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(DataLayerError::config("bad").is_configuration());
        assert!(DataLayerError::PairingExhausted { label: 1, attempts: 3 }.is_configuration());
        assert!(DataLayerError::LabelCountMismatch { expected: 8, actual: 4 }.is_configuration());
        assert!(!DataLayerError::Cancelled.is_configuration());
        assert!(!DataLayerError::store("disk gone").is_configuration());
    }

    #[test]
    fn test_messages() {
        let err = DataLayerError::PairingExhausted { label: 7, attempts: 3 };
        assert!(err.to_string().contains("label 7"));
        assert!(err.to_string().contains("3 attempts"));

        let err = DataLayerError::worker_halted("primary", "boom");
        assert_eq!(err.to_string(), "Pipeline 'primary' halted: boom");
    }
}
