//! Per-epoch metric snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::metrics::best::BestValue;
use crate::metrics::stage::Stage;

/// Averages for one stage, keyed by short metric name (`acc1`, `loss`).
pub type StageMetrics = BTreeMap<String, f64>;

/// Merged per-stage metrics for one epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u64,
    #[serde(default)]
    pub train: StageMetrics,
    #[serde(default)]
    pub val: StageMetrics,
    #[serde(default)]
    pub test: StageMetrics,
}

impl EpochRecord {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageMetrics {
        match stage {
            Stage::Train => &self.train,
            Stage::Validation => &self.val,
            Stage::Test => &self.test,
        }
    }

    /// Replace the sub-map for `stage`.
    pub fn set_stage(&mut self, stage: Stage, metrics: StageMetrics) {
        let slot = match stage {
            Stage::Train => &mut self.train,
            Stage::Validation => &mut self.val,
            Stage::Test => &mut self.test,
        };
        *slot = metrics;
    }
}

/// Serializable aggregator state carried inside checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsState {
    #[serde(default)]
    pub metrics_history: Vec<EpochRecord>,
    #[serde(default)]
    pub best_metrics: BTreeMap<String, BestValue>,
}

/// Result of closing one stage of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub epoch: u64,
    /// Averages under fully qualified names (`val/acc1`).
    pub metrics: BTreeMap<String, f64>,
    /// Best values for tracked metrics under `val/best_acc1`-style names.
    pub best: BTreeMap<String, f64>,
}

impl StageSummary {
    /// Averages and best values in one map, as written to experiment logs.
    pub fn log_entries(&self) -> BTreeMap<String, f64> {
        let mut entries = self.metrics.clone();
        entries.extend(self.best.iter().map(|(k, v)| (k.clone(), *v)));
        entries
    }
}
