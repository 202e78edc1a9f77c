//! Logging setup and the run log handle passed to experiment components.
//!
//! Two tracing layers are installed: a human-readable stderr layer and, once
//! the experiment directory exists, a plain-text file layer writing
//! `<exp_dir>/log.txt` through a non-blocking appender.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

const TIME_FORMAT: &str = "%m-%d-%y %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" | "verbose" | "infov" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" | "critical" => Ok(LogLevel::Error),
            other => Err(ConfigError::InvalidValue {
                key: "logging.level".into(),
                reason: format!("unknown log level '{other}'"),
            }),
        }
    }
}

/// Keeps the file appender flushing; drop it at the end of `main`.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

impl fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogGuard")
            .field("file", &self._file.is_some())
            .finish()
    }
}

/// Install the global subscriber.
///
/// `exp_dir` enables the file layer when `config.log_file` is set. Fails if a
/// global subscriber is already installed.
pub fn init(config: &LoggingConfig, exp_dir: Option<&Path>) -> Result<LogGuard, ConfigError> {
    let level: LogLevel = config.level.parse()?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(config.color)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(level.as_str()));

    let mut guard = None;
    let file_layer = match (exp_dir, config.log_file.as_deref()) {
        (Some(dir), Some(file_name)) => {
            std::fs::create_dir_all(dir).map_err(|e| ConfigError::InvalidValue {
                key: "logging.log_file".into(),
                reason: format!("cannot create {}: {e}", dir.display()),
            })?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                    .with_writer(non_blocking)
                    .with_filter(EnvFilter::new(level.as_str())),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ConfigError::InvalidValue {
            key: "logging".into(),
            reason: e.to_string(),
        })?;

    Ok(LogGuard { _file: guard })
}

/// Destination for experiment-level messages.
///
/// Components receive one of these instead of reaching for a process-wide
/// logger, so tests can capture what a run reported.
pub trait RunLog: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Forwards to `tracing`, but only from the rank-0 process.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunLog {
    rank: u64,
}

impl TracingRunLog {
    pub fn new(rank: u64) -> Self {
        Self { rank }
    }

    /// Rank from `RANK`, then `LOCAL_RANK`, defaulting to 0.
    pub fn from_env() -> Self {
        let rank = ["RANK", "LOCAL_RANK"]
            .iter()
            .find_map(|var| std::env::var(var).ok()?.parse().ok())
            .unwrap_or(0);
        Self { rank }
    }

    pub fn rank(&self) -> u64 {
        self.rank
    }

    pub fn is_zero_rank(&self) -> bool {
        self.rank == 0
    }
}

impl RunLog for TracingRunLog {
    fn log(&self, level: LogLevel, message: &str) {
        if !self.is_zero_rank() {
            return;
        }
        match level {
            LogLevel::Trace => tracing::trace!("{message}"),
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Info => tracing::info!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Collects messages in memory.
#[derive(Debug, Default)]
pub struct MemoryRunLog {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }
}

impl RunLog for MemoryRunLog {
    fn log(&self, level: LogLevel, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((level, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_levels() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("INFOV".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("verbose".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_memory_log_collects() {
        let log = MemoryRunLog::new();
        log.info("started");
        log.warn("seed not set");
        log.info("done");
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.messages(LogLevel::Warn), vec!["seed not set".to_string()]);
    }

    #[test]
    fn test_tracing_log_rank() {
        assert!(TracingRunLog::new(0).is_zero_rank());
        assert!(!TracingRunLog::new(3).is_zero_rank());
        // non-zero ranks stay silent without panicking
        TracingRunLog::new(3).info("ignored");
    }
}
