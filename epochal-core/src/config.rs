//! Configuration system for epochal.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! environment -> command-line `key=value` overrides. Configuration is loaded
//! from `~/.config/epochal/config.toml` and/or `.epochal/config.toml` in the
//! workspace directory, or from an explicit file.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::checkpoint::{MonitorMode, ResumeSetting};
use crate::error::ConfigError;
use crate::metrics::Stage;
use crate::run_name::{Override, expand_shorthand};

/// Top-level configuration for an experiment run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochalConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// How command-line overrides are folded into the run name.
    #[serde(default)]
    pub override_name: OverrideNameConfig,
    /// Short aliases for long config keys (`original -> short`).
    #[serde(default)]
    pub shorthand: BTreeMap<String, String>,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

/// Where and how long a run goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Experiment root folder; each run gets a sub-directory.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    /// Run-name template. `{override_name}` and every override key are
    /// available as placeholders.
    #[serde(default = "default_run_name")]
    pub run_name: String,
    #[serde(default = "default_epochs")]
    pub epochs: u64,
    /// Random seed; derived from the clock when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Step meters are reset after this many train batches.
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            run_name: default_run_name(),
            epochs: default_epochs(),
            seed: None,
            log_every_n_steps: default_log_every_n_steps(),
        }
    }
}

fn default_root_dir() -> String {
    "runs".to_string()
}

fn default_run_name() -> String {
    "run_{override_name}".to_string()
}

fn default_epochs() -> u64 {
    100
}

fn default_log_every_n_steps() -> u64 {
    50
}

/// Metric names tracked per stage plus the best-metric spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_stage_metrics")]
    pub train: Vec<String>,
    #[serde(default = "default_stage_metrics")]
    pub val: Vec<String>,
    /// Falls back to the validation list when unset.
    #[serde(default)]
    pub test: Option<Vec<String>>,
    /// `stage/name -> min|max`. Kept as strings so bad directions are
    /// reported by the aggregator with the offending metric name.
    #[serde(default)]
    pub best: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            train: default_stage_metrics(),
            val: default_stage_metrics(),
            test: None,
            best: BTreeMap::new(),
        }
    }
}

fn default_stage_metrics() -> Vec<String> {
    vec!["loss".to_string()]
}

impl MetricsConfig {
    pub fn stage_metrics(&self) -> BTreeMap<Stage, Vec<String>> {
        BTreeMap::from([
            (Stage::Train, self.train.clone()),
            (Stage::Validation, self.val.clone()),
            (
                Stage::Test,
                self.test.clone().unwrap_or_else(|| self.val.clone()),
            ),
        ])
    }
}

/// Checkpoint rotation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_monitor_metric")]
    pub monitor_metric: String,
    #[serde(default)]
    pub monitor_metric_mode: MonitorMode,
    /// Number of best checkpoints kept; 0 disables best files.
    #[serde(default = "default_save_top_k")]
    pub save_top_k: usize,
    /// Save `epoch=N.ckpt` every this many epochs; 0 disables.
    #[serde(default = "default_save_epoch_interval")]
    pub save_epoch_interval: u64,
    #[serde(default = "default_true")]
    pub always_save_last: bool,
    /// Defaults to `best/{epoch}-{<monitor_metric>:.2f}`.
    #[serde(default)]
    pub best_filename_template: Option<String>,
    #[serde(default)]
    pub resume: ResumeSetting,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            monitor_metric: default_monitor_metric(),
            monitor_metric_mode: MonitorMode::default(),
            save_top_k: default_save_top_k(),
            save_epoch_interval: default_save_epoch_interval(),
            always_save_last: true,
            best_filename_template: None,
            resume: ResumeSetting::default(),
        }
    }
}

fn default_monitor_metric() -> String {
    "val/loss".to_string()
}

fn default_save_top_k() -> usize {
    3
}

fn default_save_epoch_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error (`verbose`/`infov` mean debug).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// File name inside the experiment directory; `None` disables file logs.
    #[serde(default = "default_log_file")]
    pub log_file: Option<String>,
    #[serde(default = "default_true")]
    pub color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: default_log_file(),
            color: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<String> {
    Some("log.txt".to_string())
}

/// Controls how overrides are rendered into `{override_name}`.
///
/// `include_keys` takes precedence over `exclude_keys`; both accept glob
/// patterns such as `model.*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideNameConfig {
    #[serde(default = "default_kv_sep")]
    pub kv_sep: String,
    #[serde(default = "default_item_sep")]
    pub item_sep: String,
    #[serde(default)]
    pub use_shorthand: bool,
    #[serde(default)]
    pub include_keys: Option<Vec<String>>,
    #[serde(default)]
    pub exclude_keys: Vec<String>,
}

impl Default for OverrideNameConfig {
    fn default() -> Self {
        Self {
            kv_sep: default_kv_sep(),
            item_sep: default_item_sep(),
            use_shorthand: false,
            include_keys: None,
            exclude_keys: Vec::new(),
        }
    }
}

fn default_kv_sep() -> String {
    "=".to_string()
}

fn default_item_sep() -> String {
    ",".to_string()
}

/// Per-stage summary message templates, e.g. `"acc1 {acc1:.2f} loss {loss:.3f}"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default)]
    pub train: Option<String>,
    #[serde(default)]
    pub val: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
}

impl SummaryConfig {
    pub fn message(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Train => self.train.as_deref(),
            Stage::Validation => self.val.as_deref(),
            Stage::Test => self.test.as_deref(),
        }
    }
}

/// Progress-bar postfix formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_true")]
    pub remove_v_num: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Metric name -> format spec (e.g. `".3f"`).
    #[serde(default)]
    pub formatter: BTreeMap<String, String>,
    /// Render `val/acc1` as `v:acc1`.
    #[serde(default = "default_true")]
    pub use_short_name: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            remove_v_num: true,
            exclude: Vec::new(),
            formatter: BTreeMap::new(),
            use_short_name: true,
        }
    }
}

/// Loader sizes, given either per device or globally across devices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default)]
    pub batch_size: Option<u64>,
    #[serde(default)]
    pub global_batch_size: Option<u64>,
    #[serde(default)]
    pub eval_batch_size: Option<u64>,
    #[serde(default)]
    pub global_eval_batch_size: Option<u64>,
    #[serde(default)]
    pub num_workers: Option<u64>,
    #[serde(default)]
    pub global_num_workers: Option<u64>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Command-line overrides (`key=value`, dotted keys, shorthands expanded)
/// 2. Environment variables (prefixed with `EPOCHAL_`, `__` for nesting)
/// 3. Explicit config file, or workspace-local `.epochal/config.toml`
/// 4. User config (`~/.config/epochal/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: &[Override],
) -> Result<EpochalConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EpochalConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "epochal", "epochal") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    match config_file {
        Some(file) => {
            if !file.exists() {
                return Err(ConfigError::InvalidValue {
                    key: "config".into(),
                    reason: format!("file not found: {}", file.display()),
                });
            }
            figment = figment.merge(Toml::file(file));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(".epochal").join("config.toml");
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    // EPOCHAL_RUN__EPOCHS, EPOCHAL_CHECKPOINT__MONITOR_METRIC, ...
    figment = figment.merge(Env::prefixed("EPOCHAL_").split("__"));

    if !overrides.is_empty() {
        let shorthand: BTreeMap<String, String> = figment
            .extract_inner("shorthand")
            .map_err(|e| ConfigError::Load(Box::new(e)))?;
        for o in expand_shorthand(overrides, &shorthand)? {
            figment = figment.merge(Serialized::default(&o.key, o.toml_value()));
        }
    }

    figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(args: &[&str]) -> Vec<Override> {
        args.iter().map(|a| Override::parse(a).unwrap()).collect()
    }

    #[test]
    fn test_default_config() {
        let config = EpochalConfig::default();
        assert_eq!(config.run.epochs, 100);
        assert_eq!(config.checkpoint.monitor_metric, "val/loss");
        assert_eq!(config.checkpoint.monitor_metric_mode, MonitorMode::Auto);
        assert_eq!(config.override_name.kv_sep, "=");
        assert_eq!(config.logging.log_file.as_deref(), Some("log.txt"));
    }

    #[test]
    fn test_test_metrics_default_to_val() {
        let mut metrics = MetricsConfig {
            val: vec!["acc1".into(), "loss".into()],
            ..Default::default()
        };
        assert_eq!(metrics.stage_metrics()[&Stage::Test], metrics.val);

        metrics.test = Some(vec!["acc5".into()]);
        assert_eq!(metrics.stage_metrics()[&Stage::Test], vec!["acc5".to_string()]);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = EpochalConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: EpochalConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let epochal_dir = dir.path().join(".epochal");
        std::fs::create_dir_all(&epochal_dir).unwrap();
        std::fs::write(
            epochal_dir.join("config.toml"),
            r#"
[run]
root_dir = "/tmp/exp"
epochs = 90

[metrics]
train = ["loss", "acc1"]
val = ["loss", "acc1", "acc5"]

[metrics.best]
"val/acc1" = "max"
"val/loss" = "min"

[checkpoint]
monitor_metric = "val/acc1"
monitor_metric_mode = "max"
resume = "last"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None, &[]).unwrap();
        assert_eq!(config.run.epochs, 90);
        assert_eq!(config.metrics.val.len(), 3);
        assert_eq!(config.metrics.best["val/acc1"], "max");
        assert_eq!(config.checkpoint.monitor_metric_mode, MonitorMode::Max);
        assert_eq!(config.checkpoint.resume, ResumeSetting::Path("last".into()));
        // untouched sections keep their defaults
        assert_eq!(config.checkpoint.save_top_k, 3);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("exp.toml");
        std::fs::write(
            &file,
            r#"
[shorthand]
"run.epochs" = "ep"
"#,
        )
        .unwrap();

        let config = load_config(
            None,
            Some(&file),
            &overrides(&["ep=12", "checkpoint.save_top_k=1", "logging.color=false", "lr=0.1"]),
        )
        .unwrap();
        assert_eq!(config.run.epochs, 12);
        assert_eq!(config.checkpoint.save_top_k, 1);
        assert!(!config.logging.color);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = load_config(None, Some(Path::new("/nonexistent/epochal.toml")), &[]).unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_bad_override_type_fails_extraction() {
        let err = load_config(None, None, &overrides(&["run.epochs=many"])).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
