//! Training-loop facade tying the aggregator to checkpoints, summaries and
//! progress output.
//!
//! The loop calls, per epoch:
//!
//! ```text
//! begin_epoch(e)
//!   begin_stage(Train); observe_batch(Train, ..)*; end_stage(Train)
//!   begin_stage(Validation); observe_batch(Validation, ..)*; end_stage(Validation)
//! end_epoch(payload, store)
//! ```
//!
//! Validation passes run before the first `begin_epoch` are treated as sanity
//! checks: meters update, but nothing is recorded.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::checkpoint::{CheckpointDocument, CheckpointLayout, CheckpointPolicy, CheckpointStore, SavePlan};
use crate::config::EpochalConfig;
use crate::error::EpochalError;
use crate::logging::RunLog;
use crate::metrics::{MetricAggregator, Stage, StageSummary};
use crate::progress::ProgressFormat;
use crate::summary::SummaryReporter;

const GLOBAL_STEP_KEY: &str = "system/global_step";
const EPOCH_KEY: &str = "system/epoch";

/// What one batch contributes to progress display and step logs.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Running epoch averages for the stage, without `loss`.
    pub progress: BTreeMap<String, f64>,
    /// `progress` formatted for a progress bar.
    pub postfix: String,
    /// Train only: step-window averages plus `system/*` entries.
    pub log: Option<BTreeMap<String, f64>>,
}

pub struct TrainingSession {
    aggregator: MetricAggregator,
    policy: CheckpointPolicy,
    summary: SummaryReporter,
    progress: ProgressFormat,
    run_log: Arc<dyn RunLog>,
    log_every_n_steps: u64,
    epoch: u64,
    global_step: u64,
    train_batch_idx: u64,
    training_started: bool,
}

impl std::fmt::Debug for TrainingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingSession")
            .field("epoch", &self.epoch)
            .field("global_step", &self.global_step)
            .field("training_started", &self.training_started)
            .finish_non_exhaustive()
    }
}

impl TrainingSession {
    pub fn new(
        config: &EpochalConfig,
        layout: CheckpointLayout,
        run_log: Arc<dyn RunLog>,
    ) -> Result<Self, EpochalError> {
        Ok(Self {
            aggregator: MetricAggregator::from_config(&config.metrics)?,
            policy: CheckpointPolicy::from_config(&config.checkpoint, layout)?,
            summary: SummaryReporter::from_config(&config.summary)?,
            progress: ProgressFormat::from_config(&config.progress)?,
            run_log,
            log_every_n_steps: config.run.log_every_n_steps,
            epoch: 0,
            global_step: 0,
            train_batch_idx: 0,
            training_started: false,
        })
    }

    pub fn aggregator(&self) -> &MetricAggregator {
        &self.aggregator
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// First epoch to run after `resume_from`, or 0 for a fresh run.
    pub fn next_epoch(&self) -> u64 {
        self.aggregator.last_record().map_or(0, |r| r.epoch + 1)
    }

    pub fn begin_epoch(&mut self, epoch: u64) {
        self.aggregator.reset_all();
        self.aggregator.reset_step();
        self.epoch = epoch;
        self.train_batch_idx = 0;
        self.training_started = true;
        self.summary.mark_training_started();
    }

    pub fn begin_stage(&mut self, stage: Stage) {
        self.aggregator.reset(stage);
        self.summary.stage_start(stage);
    }

    pub fn observe_batch(
        &mut self,
        stage: Stage,
        outputs: &BTreeMap<String, f64>,
        batch_size: u64,
    ) -> Result<BatchReport, EpochalError> {
        self.aggregator
            .update_outputs(stage, outputs, batch_size as f64)?;

        let mut progress = self.aggregator.epoch_average(stage);
        progress.remove("loss");
        let postfix = self.progress.postfix(&progress)?;

        let log = if stage == Stage::Train {
            let mut log = self.aggregator.step_average();
            self.add_system_entries(&mut log);
            // reset after logging so the window starts on the next batch
            if self.log_every_n_steps > 0 && self.train_batch_idx % self.log_every_n_steps == 0 {
                self.aggregator.reset_step();
            }
            self.train_batch_idx += 1;
            self.global_step += 1;
            Some(log)
        } else {
            None
        };

        Ok(BatchReport {
            progress,
            postfix,
            log,
        })
    }

    /// Close `stage`: record averages, update best values, emit the summary
    /// line. Returns `None` for sanity-check passes.
    pub fn end_stage(&mut self, stage: Stage) -> Result<Option<StageSummary>, EpochalError> {
        if !self.training_started {
            return Ok(None);
        }
        let summary = self.aggregator.finish_stage(stage, self.epoch)?;
        let averages = self.aggregator.epoch_average(stage);
        self.summary
            .stage_end(stage, self.epoch, &averages, self.run_log.as_ref());
        Ok(Some(summary))
    }

    /// Stage summary flattened for experiment logs, with `system/*` entries.
    pub fn stage_log(&self, summary: &StageSummary) -> BTreeMap<String, f64> {
        let mut log = summary.log_entries();
        self.add_system_entries(&mut log);
        log
    }

    /// Plan and write this epoch's checkpoints.
    pub fn end_epoch(
        &mut self,
        payload: serde_json::Value,
        store: &CheckpointStore,
    ) -> Result<SavePlan, EpochalError> {
        let metrics = self.epoch_metrics();
        let plan = self.policy.plan(self.epoch, &metrics)?;
        if plan.is_empty() {
            return Ok(plan);
        }

        let doc = CheckpointDocument {
            epoch: self.epoch,
            saved_at: Utc::now(),
            payload,
            extended: self.aggregator.state(),
            top_k: self.policy.top_k().entries().to_vec(),
        };
        store.apply(&plan, &doc)?;
        self.run_log.debug(&format!(
            "Epoch {}: wrote {} checkpoint(s), removed {}",
            self.epoch,
            plan.write.len(),
            plan.remove.len()
        ));
        Ok(plan)
    }

    /// Restore history, best values and best-file ranking verbatim.
    pub fn resume_from(&mut self, doc: &CheckpointDocument) {
        self.aggregator.restore(doc.extended.clone());
        self.policy.restore_top_k(doc.top_k.clone());
        self.epoch = doc.epoch;
        self.run_log.info(&format!(
            "Restored {} epoch record(s) and {} best value(s) from epoch {}",
            doc.extended.metrics_history.len(),
            doc.extended.best_metrics.len(),
            doc.epoch
        ));
    }

    /// The current epoch's record under qualified names.
    fn epoch_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        if let Some(record) = self
            .aggregator
            .last_record()
            .filter(|r| r.epoch == self.epoch)
        {
            for stage in Stage::ALL {
                for (name, value) in record.stage(stage) {
                    metrics.insert(stage.qualify(name), *value);
                }
            }
        }
        metrics
    }

    fn add_system_entries(&self, log: &mut BTreeMap<String, f64>) {
        log.insert(GLOBAL_STEP_KEY.into(), self.global_step as f64);
        log.insert(EPOCH_KEY.into(), self.epoch as f64);
    }
}
