//! Checkpoint naming, rotation and persistence.
//!
//! Checkpoints live under `<exp_dir>/ckpt/`:
//! - `last.ckpt`, rewritten every epoch when `always_save_last` is set
//! - `epoch=N.ckpt`, written every `save_epoch_interval` epochs
//! - `best/<template>.ckpt`, the top-k epochs by the monitored metric
//!
//! Each file is a JSON document carrying the framework's opaque payload and
//! the aggregator's history and best values under `extended`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, ConfigError, EpochalError};
use crate::metrics::{Direction, MetricsState, Stage};
use crate::template::{Template, TemplateValue, TemplateValues};

pub const CHECKPOINT_EXT: &str = "ckpt";
pub const LAST_CHECKPOINT: &str = "last";

/// How the monitored metric is ranked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Min,
    Max,
    /// `max` for accuracy-like names (containing `acc`), `min` otherwise.
    #[default]
    Auto,
}

impl MonitorMode {
    pub fn resolve(&self, metric: &str) -> Direction {
        match self {
            MonitorMode::Min => Direction::Min,
            MonitorMode::Max => Direction::Max,
            MonitorMode::Auto if metric.contains("acc") => Direction::Max,
            MonitorMode::Auto => Direction::Min,
        }
    }
}

/// Which checkpoint to resume from, as written in configuration.
///
/// - `false`: start from scratch
/// - `true`: `last.ckpt`
/// - an integer N: `epoch=N.ckpt`
/// - a string: absolute path (`~` allowed) or path relative to the checkpoint dir
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResumeSetting {
    Flag(bool),
    Epoch(u64),
    Path(String),
}

impl Default for ResumeSetting {
    fn default() -> Self {
        ResumeSetting::Flag(false)
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

fn with_ckpt_ext(path: PathBuf) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == CHECKPOINT_EXT) {
        path
    } else {
        let mut name = path.into_os_string();
        name.push(".");
        name.push(CHECKPOINT_EXT);
        PathBuf::from(name)
    }
}

/// File naming inside a run's checkpoint directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointLayout {
    dir: PathBuf,
}

impl CheckpointLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last(&self) -> PathBuf {
        self.named(LAST_CHECKPOINT)
    }

    pub fn epoch(&self, epoch: u64) -> PathBuf {
        self.named(&format!("epoch={epoch}"))
    }

    /// `name` relative to the checkpoint dir, with `.ckpt` appended if missing.
    pub fn named(&self, name: &str) -> PathBuf {
        with_ckpt_ext(self.dir.join(name))
    }

    /// Resolve a resume setting to an existing file.
    pub fn resolve_resume(&self, setting: &ResumeSetting) -> Result<Option<PathBuf>, CheckpointError> {
        let path = match setting {
            ResumeSetting::Flag(false) => return Ok(None),
            ResumeSetting::Flag(true) => self.last(),
            ResumeSetting::Epoch(epoch) => self.epoch(*epoch),
            ResumeSetting::Path(raw) if raw.trim().is_empty() => {
                return Err(CheckpointError::InvalidResume { value: raw.clone() });
            }
            ResumeSetting::Path(raw) => {
                let expanded = expand_home(raw);
                if expanded.is_absolute() {
                    with_ckpt_ext(expanded)
                } else {
                    self.named(raw)
                }
            }
        };
        if !path.exists() {
            return Err(CheckpointError::ResumeNotFound { path });
        }
        Ok(Some(path))
    }
}

/// A best-file entry ranked by the monitored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCheckpoint {
    pub path: PathBuf,
    pub epoch: u64,
    pub value: f64,
}

/// Bounded, best-first ranking of checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopK {
    k: usize,
    direction: Direction,
    entries: Vec<RankedCheckpoint>,
}

impl TopK {
    pub fn new(k: usize, direction: Direction) -> Self {
        Self {
            k,
            direction,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[RankedCheckpoint] {
        &self.entries
    }

    /// Offer a candidate. Returns `(kept, evicted)`.
    ///
    /// A candidate ranks ahead of entries it ties with, so among tied epochs
    /// the oldest is the first to be evicted.
    pub fn offer(&mut self, candidate: RankedCheckpoint) -> (bool, Option<RankedCheckpoint>) {
        if self.k == 0 || candidate.value.is_nan() {
            return (false, None);
        }
        let mut evicted = None;
        if self.entries.len() >= self.k {
            let worst = &self.entries[self.entries.len() - 1];
            if !self.direction.improves(candidate.value, worst.value) {
                return (false, None);
            }
            evicted = self.entries.pop();
        }
        let position = self
            .entries
            .iter()
            .position(|e| self.direction.improves(candidate.value, e.value))
            .unwrap_or(self.entries.len());
        self.entries.insert(position, candidate);
        (true, evicted)
    }
}

/// Files to write and remove at the end of one epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SavePlan {
    pub epoch: u64,
    pub write: Vec<PathBuf>,
    pub remove: Vec<PathBuf>,
}

impl SavePlan {
    pub fn is_empty(&self) -> bool {
        self.write.is_empty() && self.remove.is_empty()
    }
}

/// Decides which checkpoint files each epoch produces.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    layout: CheckpointLayout,
    monitor: String,
    save_epoch_interval: u64,
    always_save_last: bool,
    best_template: Template,
    top_k: TopK,
}

impl CheckpointPolicy {
    pub fn from_config(config: &CheckpointConfig, layout: CheckpointLayout) -> Result<Self, ConfigError> {
        let monitor = monitor_metric(config)?;
        let template = config
            .best_filename_template
            .clone()
            .unwrap_or_else(|| format!("best/{{epoch}}-{{{monitor}:.2f}}"));
        let direction = config.monitor_metric_mode.resolve(&monitor);

        Ok(Self {
            layout,
            monitor,
            save_epoch_interval: config.save_epoch_interval,
            always_save_last: config.always_save_last,
            best_template: Template::parse(&template)?,
            top_k: TopK::new(config.save_top_k, direction),
        })
    }

    pub fn layout(&self) -> &CheckpointLayout {
        &self.layout
    }

    pub fn direction(&self) -> Direction {
        self.top_k.direction
    }

    pub fn top_k(&self) -> &TopK {
        &self.top_k
    }

    /// Reinstate the ranking saved in a checkpoint when resuming.
    pub fn restore_top_k(&mut self, entries: Vec<RankedCheckpoint>) {
        self.top_k.entries = entries;
        self.top_k.entries.truncate(self.top_k.k);
    }

    /// Plan the files for `epoch` given its fully qualified metrics.
    ///
    /// Epochs are 0-based; interval files are written when `(epoch + 1)` is a
    /// multiple of the interval.
    pub fn plan(&mut self, epoch: u64, metrics: &BTreeMap<String, f64>) -> Result<SavePlan, ConfigError> {
        let mut plan = SavePlan {
            epoch,
            ..Default::default()
        };

        if self.save_epoch_interval > 0 && (epoch + 1) % self.save_epoch_interval == 0 {
            plan.write.push(self.layout.epoch(epoch));
        }
        if self.always_save_last {
            plan.write.push(self.layout.last());
        }

        if let Some(&value) = metrics.get(&self.monitor) {
            let mut values: TemplateValues = metrics
                .iter()
                .map(|(k, v)| (k.clone(), TemplateValue::Float(*v)))
                .collect();
            values.insert("epoch".into(), epoch.into());
            let path = self.layout.named(&self.best_template.render(&values)?);

            let (kept, evicted) = self.top_k.offer(RankedCheckpoint {
                path: path.clone(),
                epoch,
                value,
            });
            if kept {
                plan.write.push(path);
            }
            // a kept entry may render to the evicted file's name
            if let Some(evicted) = evicted {
                if !self.top_k.entries.iter().any(|e| e.path == evicted.path) {
                    plan.remove.push(evicted.path);
                }
            }
        }
        Ok(plan)
    }
}

/// The monitored metric with its canonical stage prefix (`validation/acc1`
/// becomes `val/acc1`).
pub fn monitor_metric(config: &CheckpointConfig) -> Result<String, ConfigError> {
    let (stage, name) =
        Stage::split_qualified(&config.monitor_metric).map_err(|reason| ConfigError::InvalidValue {
            key: "checkpoint.monitor_metric".into(),
            reason: format!("'{}': {reason}", config.monitor_metric),
        })?;
    Ok(stage.qualify(name))
}

/// On-disk checkpoint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub epoch: u64,
    pub saved_at: DateTime<Utc>,
    /// Model and optimizer state, owned by the training framework.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub extended: MetricsState,
    #[serde(default)]
    pub top_k: Vec<RankedCheckpoint>,
}

/// Reads and writes checkpoint documents.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore;

impl CheckpointStore {
    pub fn new() -> Self {
        Self
    }

    /// Write `doc` to `path` via a `.tmp` sibling and a rename.
    pub fn write(&self, path: &Path, doc: &CheckpointDocument) -> Result<(), EpochalError> {
        let json = serde_json::to_vec_pretty(doc)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn read(&self, path: &Path) -> Result<CheckpointDocument, EpochalError> {
        let data = std::fs::read(path).map_err(|e| CheckpointError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let doc = serde_json::from_slice(&data).map_err(|e| CheckpointError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(doc)
    }

    /// Perform a save plan: write every planned file, then drop evicted ones.
    pub fn apply(&self, plan: &SavePlan, doc: &CheckpointDocument) -> Result<(), EpochalError> {
        for path in &plan.write {
            self.write(path, doc)?;
            tracing::debug!(path = %path.display(), epoch = plan.epoch, "checkpoint written");
        }
        for path in &plan.remove {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "checkpoint evicted"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
