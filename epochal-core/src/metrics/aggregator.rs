//! Per-epoch metric aggregation and best-value tracking.
//!
//! The training loop drives the aggregator explicitly: reset at the start of a
//! stage pass, one `update` per batch and metric, then `record_epoch` and
//! `update_best` (or `finish_stage`, which does both) when the pass is over.

use std::collections::BTreeMap;

use crate::config::MetricsConfig;
use crate::error::MetricsError;
use crate::metrics::best::{BestMetricSpec, BestValue};
use crate::metrics::meter::Meter;
use crate::metrics::record::{EpochRecord, MetricsState, StageMetrics, StageSummary};
use crate::metrics::stage::Stage;

/// Accumulates per-batch scalars into per-epoch summaries.
#[derive(Debug, Clone)]
pub struct MetricAggregator {
    meters: BTreeMap<Stage, BTreeMap<String, Meter>>,
    /// Finer-grained train meters, reset every few steps rather than per epoch.
    step_meters: BTreeMap<String, Meter>,
    history: Vec<EpochRecord>,
    best_spec: BestMetricSpec,
    best: BTreeMap<String, BestValue>,
}

impl MetricAggregator {
    /// Create an aggregator tracking `stage_metrics` with the given best-metric spec.
    pub fn new(
        stage_metrics: &BTreeMap<Stage, Vec<String>>,
        best_spec: BestMetricSpec,
    ) -> Result<Self, MetricsError> {
        let mut meters = BTreeMap::new();
        for stage in Stage::ALL {
            let mut stage_meters = BTreeMap::new();
            for name in stage_metrics.get(&stage).into_iter().flatten() {
                if stage_meters.insert(name.clone(), Meter::new()).is_some() {
                    return Err(MetricsError::DuplicateMetric {
                        stage: stage.to_string(),
                        metric: name.clone(),
                    });
                }
            }
            meters.insert(stage, stage_meters);
        }
        let step_meters = meters[&Stage::Train].clone();

        Ok(Self {
            meters,
            step_meters,
            history: Vec::new(),
            best_spec,
            best: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let spec = BestMetricSpec::from_pairs(config.best.iter())?;
        Self::new(&config.stage_metrics(), spec)
    }

    pub fn best_spec(&self) -> &BestMetricSpec {
        &self.best_spec
    }

    pub fn reset(&mut self, stage: Stage) {
        if let Some(stage_meters) = self.meters.get_mut(&stage) {
            stage_meters.values_mut().for_each(Meter::reset);
        }
    }

    pub fn reset_all(&mut self) {
        for stage in Stage::ALL {
            self.reset(stage);
        }
    }

    pub fn reset_step(&mut self) {
        self.step_meters.values_mut().for_each(Meter::reset);
    }

    /// Fold one observation into the running average of `(stage, metric)`.
    ///
    /// Names not configured for the stage are ignored: training loops routinely
    /// emit diagnostic values that are not meant for aggregation.
    pub fn update(
        &mut self,
        stage: Stage,
        metric: &str,
        value: f64,
        weight: f64,
    ) -> Result<(), MetricsError> {
        check_weight(stage, metric, weight)?;
        if let Some(meter) = self
            .meters
            .get_mut(&stage)
            .and_then(|stage_meters| stage_meters.get_mut(metric))
        {
            meter.update(value, weight);
        }
        Ok(())
    }

    /// Fold a whole batch output map. Train outputs also feed the step meters.
    pub fn update_outputs(
        &mut self,
        stage: Stage,
        outputs: &BTreeMap<String, f64>,
        weight: f64,
    ) -> Result<(), MetricsError> {
        check_weight(stage, "<batch>", weight)?;
        for (name, value) in outputs {
            self.update(stage, name, *value, weight)?;
            if stage == Stage::Train {
                if let Some(meter) = self.step_meters.get_mut(name) {
                    meter.update(*value, weight);
                }
            }
        }
        Ok(())
    }

    /// Current averages of every meter in `stage` that has seen an update.
    pub fn epoch_average(&self, stage: Stage) -> StageMetrics {
        self.meters[&stage]
            .iter()
            .filter_map(|(name, meter)| meter.value().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Step-window train averages under `train/stepwise_{name}`.
    pub fn step_average(&self) -> BTreeMap<String, f64> {
        self.step_meters
            .iter()
            .filter_map(|(name, meter)| {
                meter
                    .value()
                    .map(|v| (Stage::Train.qualify(&format!("stepwise_{name}")), v))
            })
            .collect()
    }

    /// Store `averages` for `stage` in the record for `epoch`.
    ///
    /// Stages of one epoch arrive in separate calls; they merge into the last
    /// record when it carries the same index.
    pub fn record_epoch(
        &mut self,
        epoch: u64,
        stage: Stage,
        averages: StageMetrics,
    ) -> Result<(), MetricsError> {
        match self.history.last_mut() {
            Some(last) if last.epoch == epoch => last.set_stage(stage, averages),
            Some(last) if last.epoch > epoch => {
                return Err(MetricsError::EpochOutOfOrder {
                    epoch,
                    last: last.epoch,
                });
            }
            _ => {
                let mut record = EpochRecord::new(epoch);
                record.set_stage(stage, averages);
                self.history.push(record);
            }
        }
        Ok(())
    }

    /// Offer `value` as a new best for `metric`. Returns whether it was taken.
    pub fn update_best(
        &mut self,
        metric: &str,
        value: f64,
        epoch: u64,
    ) -> Result<bool, MetricsError> {
        let direction =
            self.best_spec
                .direction(metric)
                .ok_or_else(|| MetricsError::UnknownBestMetric {
                    metric: metric.to_string(),
                })?;

        let key = Stage::canonical_name(metric);
        let candidate = BestValue { value, epoch };
        match self.best.get_mut(&key) {
            Some(current) => {
                if direction.improves(value, current.value) {
                    *current = candidate;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => {
                self.best.insert(key, candidate);
                Ok(true)
            }
        }
    }

    pub fn best_value(&self, metric: &str) -> Result<&BestValue, MetricsError> {
        self.best
            .get(&Stage::canonical_name(metric))
            .ok_or_else(|| MetricsError::NoBestValue {
                metric: metric.to_string(),
            })
    }

    pub fn best(&self, metric: &str) -> Result<f64, MetricsError> {
        self.best_value(metric).map(|b| b.value)
    }

    pub fn best_epoch(&self, metric: &str) -> Result<u64, MetricsError> {
        self.best_value(metric).map(|b| b.epoch)
    }

    /// Short form such as `76.10 @ep87`.
    pub fn best_summary(&self, metric: &str) -> Result<String, MetricsError> {
        self.best_value(metric).map(ToString::to_string)
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    pub fn last_record(&self) -> Option<&EpochRecord> {
        self.history.last()
    }

    /// Close `stage` for `epoch`: record its averages and update the best
    /// values of every tracked metric qualified by this stage.
    pub fn finish_stage(&mut self, stage: Stage, epoch: u64) -> Result<StageSummary, MetricsError> {
        let averages = self.epoch_average(stage);
        self.record_epoch(epoch, stage, averages.clone())?;

        let tracked: Vec<String> = self
            .best_spec
            .for_stage(stage)
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut best = BTreeMap::new();
        for name in tracked {
            // nothing observed for it this pass
            let Some(&value) = averages.get(&name) else {
                continue;
            };
            let qualified = stage.qualify(&name);
            self.update_best(&qualified, value, epoch)?;
            best.insert(
                stage.qualify(&format!("best_{name}")),
                self.best(&qualified)?,
            );
        }
        let metrics = averages
            .into_iter()
            .map(|(name, value)| (stage.qualify(&name), value))
            .collect();

        Ok(StageSummary {
            stage,
            epoch,
            metrics,
            best,
        })
    }

    /// Snapshot of history and best values for checkpointing.
    pub fn state(&self) -> MetricsState {
        MetricsState {
            metrics_history: self.history.clone(),
            best_metrics: self.best.clone(),
        }
    }

    /// Rehydrate history and best values from a checkpoint, verbatim.
    pub fn restore(&mut self, state: MetricsState) {
        self.history = state.metrics_history;
        self.best = state.best_metrics;
    }
}

fn check_weight(stage: Stage, metric: &str, weight: f64) -> Result<(), MetricsError> {
    // NaN fails this comparison too
    if weight > 0.0 {
        Ok(())
    } else {
        Err(MetricsError::NonPositiveWeight {
            stage: stage.to_string(),
            metric: metric.to_string(),
            weight,
        })
    }
}
