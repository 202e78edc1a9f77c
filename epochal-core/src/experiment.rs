//! Experiment directory layout and resume resolution.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::checkpoint::{CheckpointLayout, expand_home, monitor_metric};
use crate::config::EpochalConfig;
use crate::error::{ConfigError, EpochalError};
use crate::logging::RunLog;
use crate::metrics::Direction;
use crate::run_name::{Override, derive_run_name};

pub const CHECKPOINT_DIR: &str = "ckpt";
pub const CODE_DIR: &str = "code";

/// A resolved run: where it lives, where it resumes from, how it is seeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    pub run_name: String,
    pub exp_dir: PathBuf,
    pub layout: CheckpointLayout,
    pub log_file: Option<PathBuf>,
    pub code_dir: PathBuf,
    pub resume: Option<PathBuf>,
    pub monitor: String,
    pub direction: Direction,
    pub seed: u64,
}

impl Experiment {
    /// Derive the run name and paths from `config`, resolving the resume
    /// checkpoint. Does not touch the filesystem beyond existence checks.
    pub fn prepare(
        config: &EpochalConfig,
        overrides: &[Override],
        run_log: &dyn RunLog,
    ) -> Result<Self, EpochalError> {
        let run_name = derive_run_name(
            &config.run,
            &config.override_name,
            &config.shorthand,
            overrides,
        )?;

        let root_dir = expand_home(&config.run.root_dir);
        if !root_dir.is_dir() {
            return Err(ConfigError::RootDirMissing { path: root_dir }.into());
        }

        let monitor = monitor_metric(&config.checkpoint)?;
        let direction = config.checkpoint.monitor_metric_mode.resolve(&monitor);

        let exp_dir = root_dir.join(&run_name);
        let layout = CheckpointLayout::new(exp_dir.join(CHECKPOINT_DIR));
        let resume = layout.resolve_resume(&config.checkpoint.resume)?;

        if exp_dir.exists() {
            match &resume {
                None => run_log.warn(&format!(
                    "Experiment dir {} already exists, contents may be overwritten",
                    exp_dir.display()
                )),
                Some(path) if !path.starts_with(layout.dir()) => run_log.warn(&format!(
                    "Resuming from {} outside of existing experiment dir {}",
                    path.display(),
                    exp_dir.display()
                )),
                Some(_) => {}
            }
        }

        let seed = config.run.seed.unwrap_or_else(clock_seed);

        run_log.info(&format!("Run name: {run_name}"));
        run_log.info(&format!("Checkpoint dir: {}", layout.dir().display()));
        match &resume {
            Some(path) => run_log.info(&format!("Resuming from {}", path.display())),
            None => run_log.info("Starting from scratch"),
        }
        if config.run.seed.is_none() {
            run_log.info(&format!("Seed not set, using {seed}"));
        }

        Ok(Self {
            log_file: config.logging.log_file.as_ref().map(|f| exp_dir.join(f)),
            code_dir: exp_dir.join(CODE_DIR),
            run_name,
            exp_dir,
            layout,
            resume,
            monitor,
            direction,
            seed,
        })
    }

    pub fn ckpt_dir(&self) -> &Path {
        self.layout.dir()
    }

    /// Create the experiment and checkpoint directories.
    pub fn create_dirs(&self) -> Result<(), EpochalError> {
        std::fs::create_dir_all(self.layout.dir())?;
        Ok(())
    }
}

fn clock_seed() -> u64 {
    let now = Utc::now();
    ((now.timestamp() as u64) ^ u64::from(now.timestamp_subsec_nanos())) % (1 << 31)
}
