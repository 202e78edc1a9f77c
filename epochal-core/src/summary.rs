//! End-of-stage summary lines.
//!
//! Each stage may carry a message template such as
//! `"acc1 {acc1:.2f} loss {loss:.3f}"`; at the end of the stage it is rendered
//! with that stage's averages and wrapped as
//! `Val summary [ 3] acc1 76.12 loss 0.912 (val time 00:01:02)`.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::config::SummaryConfig;
use crate::error::ConfigError;
use crate::format::format_elapsed;
use crate::logging::RunLog;
use crate::metrics::{Stage, StageMetrics};
use crate::template::{Template, TemplateValues};

#[derive(Debug, Clone)]
pub struct SummaryReporter {
    templates: BTreeMap<Stage, Template>,
    timers: BTreeMap<Stage, Instant>,
    training_started: bool,
}

impl SummaryReporter {
    pub fn from_config(config: &SummaryConfig) -> Result<Self, ConfigError> {
        let mut templates = BTreeMap::new();
        for stage in Stage::ALL {
            if let Some(message) = config.message(stage) {
                templates.insert(stage, Template::parse(message)?);
            }
        }
        Ok(Self {
            templates,
            timers: BTreeMap::new(),
            training_started: false,
        })
    }

    /// Summaries stay silent until this is called, so sanity-check validation
    /// passes before the first epoch produce no output.
    pub fn mark_training_started(&mut self) {
        self.training_started = true;
    }

    pub fn stage_start(&mut self, stage: Stage) {
        self.timers.insert(stage, Instant::now());
    }

    pub fn elapsed(&self, stage: Stage) -> Duration {
        self.timers
            .get(&stage)
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    /// Render the summary line, or `None` when there is nothing to report.
    pub fn render(
        &self,
        stage: Stage,
        epoch: u64,
        metrics: &StageMetrics,
        elapsed: Duration,
    ) -> Result<Option<String>, ConfigError> {
        let Some(template) = self.templates.get(&stage) else {
            return Ok(None);
        };
        if !self.training_started {
            return Ok(None);
        }

        let mut values: TemplateValues = metrics
            .iter()
            .map(|(k, v)| (k.clone(), (*v).into()))
            .collect();
        values.insert("epoch".into(), epoch.into());
        let body = template.render(&values)?;

        Ok(Some(format!(
            "{} summary [{epoch:>2}] {body} ({stage} time {})",
            stage.title(),
            format_elapsed(elapsed)
        )))
    }

    /// Render with the stage's timer and log the line at info.
    /// Log the summary line for `stage` at info level.
    ///
    /// A line that cannot be rendered, e.g. because a placeholder names a metric
    /// this pass never produced, is reported as a warning and skipped.
    pub fn stage_end(
        &self,
        stage: Stage,
        epoch: u64,
        metrics: &StageMetrics,
        run_log: &dyn RunLog,
    ) -> Option<String> {
        match self.render(stage, epoch, metrics, self.elapsed(stage)) {
            Ok(Some(line)) => {
                run_log.info(&line);
                Some(line)
            }
            Ok(None) => None,
            Err(e) => {
                run_log.warn(&format!("Skipping {stage} summary for epoch {epoch}: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MemoryRunLog};

    fn reporter() -> SummaryReporter {
        SummaryReporter::from_config(&SummaryConfig {
            val: Some("acc1 {acc1:.2f} loss {loss:.3f}".into()),
            ..Default::default()
        })
        .unwrap()
    }

    fn val_metrics() -> StageMetrics {
        StageMetrics::from([("acc1".to_string(), 76.1234), ("loss".to_string(), 0.91234)])
    }

    #[test]
    fn test_render_format() {
        let mut reporter = reporter();
        reporter.mark_training_started();
        let line = reporter
            .render(Stage::Validation, 3, &val_metrics(), Duration::from_secs(62))
            .unwrap();
        assert_eq!(
            line.as_deref(),
            Some("Val summary [ 3] acc1 76.12 loss 0.912 (val time 00:01:02)")
        );
    }

    #[test]
    fn test_silent_before_training() {
        let reporter = reporter();
        let line = reporter
            .render(Stage::Validation, 0, &val_metrics(), Duration::ZERO)
            .unwrap();
        assert_eq!(line, None);
    }

    #[test]
    fn test_silent_without_template() {
        let mut reporter = reporter();
        reporter.mark_training_started();
        let line = reporter
            .render(Stage::Train, 1, &val_metrics(), Duration::ZERO)
            .unwrap();
        assert_eq!(line, None);
    }

    #[test]
    fn test_missing_metric_is_error() {
        let mut reporter = reporter();
        reporter.mark_training_started();
        let metrics = StageMetrics::from([("acc1".to_string(), 1.0)]);
        assert!(
            reporter
                .render(Stage::Validation, 1, &metrics, Duration::ZERO)
                .is_err()
        );
    }

    #[test]
    fn test_stage_end_logs() {
        let mut reporter = reporter();
        reporter.mark_training_started();
        reporter.stage_start(Stage::Validation);
        let log = MemoryRunLog::new();
        reporter.stage_end(Stage::Validation, 12, &val_metrics(), &log);
        let infos = log.messages(LogLevel::Info);
        assert_eq!(infos.len(), 1);
        assert!(infos[0].starts_with("Val summary [12] acc1 76.12"));
    }

    #[test]
    fn test_stage_end_warns_on_missing_metric() {
        let mut reporter = reporter();
        reporter.mark_training_started();
        let log = MemoryRunLog::new();
        let metrics = StageMetrics::from([("acc1".to_string(), 50.0)]);
        let line = reporter.stage_end(Stage::Validation, 2, &metrics, &log);
        assert_eq!(line, None);
        assert!(log.messages(LogLevel::Info).is_empty());
        let warnings = log.messages(LogLevel::Warn);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("loss"));
    }

    #[test]
    fn test_bad_template_fails_early() {
        let config = SummaryConfig {
            train: Some("loss {loss".into()),
            ..Default::default()
        };
        assert!(SummaryReporter::from_config(&config).is_err());
    }
}
