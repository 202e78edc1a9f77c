//! Error types for epochal.
//!
//! Uses `thiserror` for a top-level error with structured sub-enums covering
//! metric bookkeeping, configuration and checkpoint persistence.

use std::path::PathBuf;

/// Top-level error type for the epochal library.
#[derive(Debug, thiserror::Error)]
pub enum EpochalError {
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the metric aggregator.
///
/// Two families exist: configuration errors, which are raised while the
/// aggregator is built and are fatal to startup, and invalid-update errors,
/// which signal a mismatch between declared metrics and what the training loop
/// actually reports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricsError {
    #[error("Invalid best-metric entry '{metric}': {reason}")]
    InvalidBestSpec { metric: String, reason: String },

    #[error("Best metric '{metric}' declared more than once")]
    DuplicateBestMetric { metric: String },

    #[error("Metric '{metric}' listed more than once for stage {stage}")]
    DuplicateMetric { stage: String, metric: String },

    #[error("Non-positive weight {weight} for metric '{metric}' in stage {stage}")]
    NonPositiveWeight {
        stage: String,
        metric: String,
        weight: f64,
    },

    #[error("Metric '{metric}' is not declared in the best-metric spec")]
    UnknownBestMetric { metric: String },

    #[error("Epoch {epoch} recorded after epoch {last}")]
    EpochOutOfOrder { epoch: u64, last: u64 },

    #[error("No value recorded yet for best metric '{metric}'")]
    NoBestValue { metric: String },
}

impl MetricsError {
    /// Whether this error stems from static configuration rather than a bad call.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MetricsError::InvalidBestSpec { .. }
                | MetricsError::DuplicateBestMetric { .. }
                | MetricsError::DuplicateMetric { .. }
        )
    }
}

/// Errors from configuration loading and the glue derived from it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid run name '{name}': {reason}")]
    InvalidRunName { name: String, reason: String },

    #[error("Malformed override '{arg}': expected key=value")]
    MalformedOverride { arg: String },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Shorthand '{short}' is used by more than one key")]
    DuplicateShorthand { short: String },

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing required setting: one of {keys}")]
    Missing { keys: String },

    #[error("Template error in '{template}': {reason}")]
    Template { template: String, reason: String },

    #[error("Root directory does not exist: {}", path.display())]
    RootDirMissing { path: PathBuf },
}

/// Errors from checkpoint planning and persistence.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Resume file does not exist: {}", path.display())]
    ResumeNotFound { path: PathBuf },

    #[error("Unsupported resume value: {value}")]
    InvalidResume { value: String },

    #[error("Checkpoint {} is unreadable: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },
}

/// Convenience result alias for epochal operations.
pub type Result<T> = std::result::Result<T, EpochalError>;
