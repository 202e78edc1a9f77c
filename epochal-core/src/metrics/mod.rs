//! Metric bookkeeping: meters, epoch history and best-value tracking.

pub mod aggregator;
pub mod best;
pub mod meter;
pub mod record;
pub mod stage;

pub use aggregator::MetricAggregator;
pub use best::{BestMetricSpec, BestValue, Direction};
pub use meter::Meter;
pub use record::{EpochRecord, MetricsState, StageMetrics, StageSummary};
pub use stage::Stage;
