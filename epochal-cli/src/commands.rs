//! CLI subcommand handlers.

use std::fmt::Write as _;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use epochal_core::backup::{DEFAULT_INCLUDE, SourceBackup};
use epochal_core::checkpoint::{CheckpointDocument, CheckpointStore};
use epochal_core::config::{EpochalConfig, load_config};
use epochal_core::experiment::Experiment;
use epochal_core::format::human_readable_count;
use epochal_core::loader::LoaderSizes;
use epochal_core::logging::{self, LogGuard, MemoryRunLog, RunLog, TracingRunLog};
use epochal_core::metrics::{Stage, StageMetrics};
use epochal_core::run_name::{Override, derive_run_name};
use epochal_core::session::TrainingSession;

use crate::replay::Replayer;
use crate::{Commands, ConfigAction};

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub workspace: PathBuf,
    pub config_file: Option<PathBuf>,
    /// Replaces `logging.level` when set from `-v`/`-q`.
    pub level_override: Option<&'static str>,
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::RunName { overrides } => {
            let overrides = parse_overrides(&overrides)?;
            let config = load(ctx, &overrides)?;
            println!("{}", run_name(&config, &overrides)?);
            Ok(())
        }
        Commands::Plan {
            overrides,
            backup_source,
            devices,
        } => handle_plan(ctx, &overrides, backup_source.as_deref(), devices),
        Commands::Replay { events, overrides } => handle_replay(ctx, &events, &overrides),
        Commands::Inspect { checkpoint } => {
            let doc = CheckpointStore::new().read(&checkpoint)?;
            print!("{}", inspect_report(&checkpoint, &doc));
            Ok(())
        }
        Commands::Config { action } => handle_config(action, ctx),
    }
}

fn parse_overrides(args: &[String]) -> anyhow::Result<Vec<Override>> {
    args.iter()
        .map(|arg| Override::parse(arg).map_err(anyhow::Error::from))
        .collect()
}

fn load(ctx: &Context, overrides: &[Override]) -> anyhow::Result<EpochalConfig> {
    let mut config = load_config(Some(&ctx.workspace), ctx.config_file.as_deref(), overrides)
        .context("Failed to load config")?;
    if let Some(level) = ctx.level_override {
        config.logging.level = level.to_string();
    }
    Ok(config)
}

fn run_name(config: &EpochalConfig, overrides: &[Override]) -> anyhow::Result<String> {
    Ok(derive_run_name(
        &config.run,
        &config.override_name,
        &config.shorthand,
        overrides,
    )?)
}

/// Prepare the experiment while buffering its messages, since the log file
/// location is only known afterwards.
fn prepare(
    config: &EpochalConfig,
    overrides: &[Override],
    create_dirs: bool,
) -> anyhow::Result<(Experiment, LogGuard, Arc<dyn RunLog>)> {
    let buffer = MemoryRunLog::new();
    let exp = Experiment::prepare(config, overrides, &buffer)?;
    if create_dirs {
        exp.create_dirs()?;
    }
    let log_dir = create_dirs.then_some(exp.exp_dir.as_path());
    let guard = logging::init(&config.logging, log_dir)?;

    let run_log: Arc<dyn RunLog> = Arc::new(TracingRunLog::from_env());
    for (level, message) in buffer.entries() {
        run_log.log(level, &message);
    }
    Ok((exp, guard, run_log))
}

fn handle_plan(
    ctx: &Context,
    overrides: &[String],
    backup_source: Option<&Path>,
    devices: u64,
) -> anyhow::Result<()> {
    let overrides = parse_overrides(overrides)?;
    let config = load(ctx, &overrides)?;
    let (exp, _guard, _run_log) = prepare(&config, &overrides, backup_source.is_some())?;

    print!("{}", plan_report(&config, &exp, devices));

    if let Some(source) = backup_source {
        let backup = SourceBackup::new(&source.display().to_string(), &exp.code_dir, &DEFAULT_INCLUDE)?;
        let copied = backup.run()?;
        println!(
            "Backed up {} file(s) to {}",
            human_readable_count(copied as u64, 2),
            backup.dest_dir().display()
        );
    }
    Ok(())
}

fn plan_report(config: &EpochalConfig, exp: &Experiment, devices: u64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run name:       {}", exp.run_name);
    let _ = writeln!(out, "Experiment dir: {}", exp.exp_dir.display());
    let _ = writeln!(out, "Checkpoint dir: {}", exp.ckpt_dir().display());
    if let Some(log_file) = &exp.log_file {
        let _ = writeln!(out, "Log file:       {}", log_file.display());
    }
    let _ = writeln!(out, "Code backup:    {}", exp.code_dir.display());
    let _ = writeln!(out, "Monitor:        {} ({})", exp.monitor, exp.direction);
    let _ = writeln!(
        out,
        "Resume:         {}",
        exp.resume
            .as_ref()
            .map_or_else(|| "none".to_string(), |p| p.display().to_string())
    );
    let _ = writeln!(out, "Seed:           {}", exp.seed);
    let _ = writeln!(out, "Epochs:         {}", config.run.epochs);
    match LoaderSizes::resolve(&config.loader, devices) {
        Ok(sizes) => {
            let _ = writeln!(
                out,
                "Loader:         batch {} / eval {} / workers {} per device ({devices} device(s))",
                sizes.batch_size, sizes.eval_batch_size, sizes.num_workers
            );
        }
        Err(e) => {
            let _ = writeln!(out, "Loader:         {e}");
        }
    }
    out
}

fn handle_replay(ctx: &Context, events: &Path, overrides: &[String]) -> anyhow::Result<()> {
    let overrides = parse_overrides(overrides)?;
    let config = load(ctx, &overrides)?;
    let (exp, _guard, run_log) = prepare(&config, &overrides, true)?;

    let store = CheckpointStore::new();
    let mut session = TrainingSession::new(&config, exp.layout.clone(), run_log.clone())?;
    if let Some(resume) = &exp.resume {
        let doc = store.read(resume)?;
        session.resume_from(&doc);
    }

    let file = File::open(events)
        .with_context(|| format!("cannot open events file {}", events.display()))?;
    let stats = Replayer::new(&mut session, &store).run(BufReader::new(file))?;

    run_log.info(&format!(
        "Replayed {} batch(es) over {} epoch(s), skipped {}, wrote {} checkpoint file(s)",
        stats.batches, stats.epochs, stats.skipped, stats.checkpoints_written
    ));
    for (metric, _) in session.aggregator().best_spec().iter() {
        if let Ok(best) = session.aggregator().best_summary(metric) {
            run_log.info(&format!("Best {metric}: {best}"));
        }
    }
    Ok(())
}

fn format_metrics(metrics: &StageMetrics) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn inspect_report(path: &Path, doc: &CheckpointDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Checkpoint: {}", path.display());
    let _ = writeln!(
        out,
        "Epoch {} (saved {})",
        doc.epoch,
        doc.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let _ = writeln!(out, "History:");
    if doc.extended.metrics_history.is_empty() {
        let _ = writeln!(out, "  (empty)");
    }
    for record in &doc.extended.metrics_history {
        for stage in Stage::ALL {
            let metrics = record.stage(stage);
            if !metrics.is_empty() {
                let _ = writeln!(
                    out,
                    "  [{:>3}] {:<5} {}",
                    record.epoch,
                    stage.as_str(),
                    format_metrics(metrics)
                );
            }
        }
    }

    let _ = writeln!(out, "Best:");
    for (metric, best) in &doc.extended.best_metrics {
        let _ = writeln!(out, "  {metric}: {best}");
    }
    if !doc.top_k.is_empty() {
        let _ = writeln!(out, "Kept best files:");
        for (rank, entry) in doc.top_k.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. {} (epoch {}, {:.4})",
                rank + 1,
                entry.path.display(),
                entry.epoch,
                entry.value
            );
        }
    }
    out
}

fn handle_config(action: ConfigAction, ctx: &Context) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let path = init_config(&ctx.workspace)?;
            println!("Configuration file at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show { overrides } => {
            let overrides = parse_overrides(&overrides)?;
            let config = load(ctx, &overrides)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Write the default configuration unless one already exists.
fn init_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let config_dir = workspace.join(".epochal");
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join("config.toml");
    if !config_path.exists() {
        let toml_str = toml::to_string_pretty(&EpochalConfig::default())?;
        std::fs::write(&config_path, toml_str)?;
    }
    Ok(config_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use epochal_core::metrics::{BestValue, EpochRecord, MetricsState};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn ctx(workspace: &Path) -> Context {
        Context {
            workspace: workspace.to_path_buf(),
            config_file: None,
            level_override: Some("error"),
        }
    }

    #[test]
    fn test_config_init_is_loadable_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = init_config(dir.path()).unwrap();
        std::fs::write(&path, "[run]\nepochs = 7\n").unwrap();
        init_config(dir.path()).unwrap();

        let config = load(&ctx(dir.path()), &[]).unwrap();
        assert_eq!(config.run.epochs, 7);
        assert_eq!(config.logging.level, "error");
    }

    #[test]
    fn test_default_config_round_trips_through_init() {
        let dir = TempDir::new().unwrap();
        init_config(dir.path()).unwrap();
        let config = load(
            &Context {
                level_override: None,
                ..ctx(dir.path())
            },
            &[],
        )
        .unwrap();
        assert_eq!(config, EpochalConfig::default());
    }

    #[test]
    fn test_run_name_from_overrides() {
        let dir = TempDir::new().unwrap();
        let overrides = parse_overrides(&["wd=1e-4".into(), "lr=0.3".into()]).unwrap();
        let config = load(&ctx(dir.path()), &overrides).unwrap();
        assert_eq!(run_name(&config, &overrides).unwrap(), "run_lr=0.3,wd=1e-4");
        assert!(parse_overrides(&["oops".into()]).is_err());
    }

    #[test]
    fn test_plan_report_lists_layout() {
        let root = TempDir::new().unwrap();
        let mut config = EpochalConfig::default();
        config.run.root_dir = root.path().display().to_string();
        config.run.seed = Some(3);
        config.loader.global_batch_size = Some(128);

        let exp = Experiment::prepare(&config, &[], &MemoryRunLog::new()).unwrap();
        let report = plan_report(&config, &exp, 2);
        assert!(report.contains("Run name:       run\n"));
        assert!(report.contains("Monitor:        val/loss (min)"));
        assert!(report.contains("batch 64 / eval 64 / workers 8 per device (2 device(s))"));
        assert!(report.contains("Resume:         none"));
    }

    #[test]
    fn test_inspect_report() {
        let mut record = EpochRecord::new(0);
        record.set_stage(
            Stage::Validation,
            StageMetrics::from([("acc1".to_string(), 55.5)]),
        );
        let doc = CheckpointDocument {
            epoch: 0,
            saved_at: Utc::now(),
            payload: serde_json::Value::Null,
            extended: MetricsState {
                metrics_history: vec![record],
                best_metrics: BTreeMap::from([(
                    "val/acc1".to_string(),
                    BestValue {
                        value: 55.5,
                        epoch: 0,
                    },
                )]),
            },
            top_k: Vec::new(),
        };
        let report = inspect_report(Path::new("last.ckpt"), &doc);
        assert!(report.contains("  [  0] val   acc1=55.5000\n"));
        assert!(report.contains("  val/acc1: 55.50 @ep0\n"));
        assert!(!report.contains("Kept best files"));
    }
}
