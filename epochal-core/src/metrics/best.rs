//! Best-so-far tracking policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::MetricsError;
use crate::metrics::stage::Stage;

/// Whether a tracked metric improves upwards or downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Min,
    Max,
}

impl Direction {
    /// Non-strict comparison: a tie counts as an improvement so the newest
    /// occurrence of the best value wins.
    pub fn improves(&self, candidate: f64, current: f64) -> bool {
        match self {
            Direction::Max => candidate >= current,
            Direction::Min => candidate <= current,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Min => write!(f, "min"),
            Direction::Max => write!(f, "max"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(Direction::Min),
            "max" => Ok(Direction::Max),
            other => Err(format!("direction must be 'min' or 'max', got '{other}'")),
        }
    }
}

/// Static declaration of which metrics are tracked for best-so-far values.
///
/// Keys are fully qualified with the canonical stage prefix (`val/acc1`).
/// Entries are validated once at construction and never change afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestMetricSpec {
    entries: BTreeMap<String, Direction>,
}

impl BestMetricSpec {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(metric, direction)` pairs.
    ///
    /// Rejects names without a known `stage/name` prefix, directions other than
    /// exactly `min` or `max`, and names declared twice. A `validation/` prefix
    /// is stored as `val/`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, MetricsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut entries = BTreeMap::new();
        for (metric, direction) in pairs {
            let metric = metric.as_ref();
            let (stage, name) =
                Stage::split_qualified(metric).map_err(|reason| MetricsError::InvalidBestSpec {
                    metric: metric.to_string(),
                    reason,
                })?;
            let key = stage.qualify(name);
            let direction: Direction =
                direction
                    .as_ref()
                    .parse()
                    .map_err(|reason| MetricsError::InvalidBestSpec {
                        metric: metric.to_string(),
                        reason,
                    })?;
            if entries.insert(key.clone(), direction).is_some() {
                return Err(MetricsError::DuplicateBestMetric { metric: key });
            }
        }
        Ok(Self { entries })
    }

    pub fn direction(&self, metric: &str) -> Option<Direction> {
        self.entries.get(&Stage::canonical_name(metric)).copied()
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.direction(metric).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Direction)> {
        self.entries.iter().map(|(k, d)| (k.as_str(), *d))
    }

    /// Bare names of the tracked metrics qualified by `stage` (`acc1` for
    /// `val/acc1`).
    pub fn for_stage(&self, stage: Stage) -> Vec<&str> {
        self.entries
            .keys()
            .filter_map(|key| key.strip_prefix(stage.as_str())?.strip_prefix('/'))
            .collect()
    }
}

/// Best value observed for a tracked metric and the epoch it occurred at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestValue {
    pub value: f64,
    pub epoch: u64,
}

impl fmt::Display for BestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} @ep{}", self.value, self.epoch)
    }
}
