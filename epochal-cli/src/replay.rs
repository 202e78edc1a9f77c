//! Replays recorded batch events through a training session.
//!
//! Each line of the events file is one batch:
//!
//! ```json
//! {"epoch": 0, "stage": "train", "batch_size": 32, "outputs": {"loss": 0.7}}
//! ```
//!
//! An event without `epoch` belongs to a sanity-check pass run before
//! training. A change of stage closes the previous stage, and a change of
//! epoch also closes the epoch and writes its checkpoints.

use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::Context as _;
use serde::Deserialize;

use epochal_core::checkpoint::CheckpointStore;
use epochal_core::metrics::Stage;
use epochal_core::session::TrainingSession;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchEvent {
    #[serde(default)]
    pub epoch: Option<u64>,
    pub stage: Stage,
    pub batch_size: u64,
    #[serde(default)]
    pub outputs: BTreeMap<String, f64>,
}

/// Counts reported once a replay finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub batches: u64,
    pub skipped: u64,
    pub epochs: u64,
    pub checkpoints_written: u64,
}

pub struct Replayer<'a> {
    session: &'a mut TrainingSession,
    store: &'a CheckpointStore,
    current: Option<(Option<u64>, Stage)>,
    stats: ReplayStats,
}

impl<'a> Replayer<'a> {
    pub fn new(session: &'a mut TrainingSession, store: &'a CheckpointStore) -> Self {
        Self {
            session,
            store,
            current: None,
            stats: ReplayStats::default(),
        }
    }

    pub fn run(mut self, reader: impl BufRead) -> anyhow::Result<ReplayStats> {
        let first_epoch = self.session.next_epoch();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: BatchEvent = serde_json::from_str(&line)
                .with_context(|| format!("invalid event on line {}", idx + 1))?;
            // already covered by the resumed checkpoint
            if event.epoch.is_some_and(|e| e < first_epoch) {
                self.stats.skipped += 1;
                continue;
            }
            self.observe(&event)
                .with_context(|| format!("failed to replay line {}", idx + 1))?;
        }
        self.close_stage()?;
        if let Some((Some(_), _)) = self.current {
            self.close_epoch()?;
        }
        Ok(self.stats)
    }

    fn observe(&mut self, event: &BatchEvent) -> anyhow::Result<()> {
        let key = (event.epoch, event.stage);
        if self.current != Some(key) {
            self.close_stage()?;
            let previous_epoch = self.current.and_then(|(epoch, _)| epoch);
            if previous_epoch.is_some() && previous_epoch != event.epoch {
                self.close_epoch()?;
            }
            if let Some(epoch) = event.epoch {
                if previous_epoch != Some(epoch) {
                    self.session.begin_epoch(epoch);
                }
            }
            self.session.begin_stage(event.stage);
            self.current = Some(key);
        }

        let report = self
            .session
            .observe_batch(event.stage, &event.outputs, event.batch_size)?;
        tracing::trace!(stage = %event.stage, postfix = %report.postfix, "batch");
        self.stats.batches += 1;
        Ok(())
    }

    fn close_stage(&mut self) -> anyhow::Result<()> {
        if let Some((_, stage)) = self.current {
            if let Some(summary) = self.session.end_stage(stage)? {
                tracing::debug!(
                    stage = %stage,
                    epoch = summary.epoch,
                    metrics = ?self.session.stage_log(&summary),
                    "stage finished"
                );
            }
        }
        Ok(())
    }

    fn close_epoch(&mut self) -> anyhow::Result<()> {
        let epoch = self.session.epoch();
        let payload = serde_json::json!({ "replayed_epoch": epoch });
        let plan = self.session.end_epoch(payload, self.store)?;
        self.stats.epochs += 1;
        self.stats.checkpoints_written += plan.write.len() as u64;
        Ok(())
    }
}
