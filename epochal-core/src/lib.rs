//! # Epochal Core
//!
//! Bookkeeping for training loops: weighted per-stage metric meters, epoch
//! history, best-so-far tracking, run naming from command-line overrides,
//! checkpoint rotation, and the layered configuration tying them together.

pub mod backup;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod experiment;
pub mod format;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod run_name;
pub mod session;
pub mod summary;
pub mod template;

// Re-export commonly used types at the crate root.
pub use checkpoint::{
    CheckpointDocument, CheckpointLayout, CheckpointPolicy, CheckpointStore, MonitorMode,
    ResumeSetting, SavePlan,
};
pub use config::{EpochalConfig, load_config};
pub use error::{CheckpointError, ConfigError, EpochalError, MetricsError, Result};
pub use experiment::Experiment;
pub use logging::{LogLevel, MemoryRunLog, RunLog, TracingRunLog};
pub use metrics::{
    BestMetricSpec, BestValue, Direction, EpochRecord, MetricAggregator, MetricsState, Stage,
    StageSummary,
};
pub use run_name::{Override, derive_run_name};
pub use session::{BatchReport, TrainingSession};
