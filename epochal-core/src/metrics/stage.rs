//! Training stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// One phase of a model evaluation cycle.
///
/// The canonical key for validation is `val`, which is also the prefix used in
/// fully qualified metric names such as `val/acc1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Stage {
    #[serde(rename = "train")]
    Train,
    #[serde(rename = "val", alias = "validation")]
    Validation,
    #[serde(rename = "test")]
    Test,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Train, Stage::Validation, Stage::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Validation => "val",
            Stage::Test => "test",
        }
    }

    /// Capitalized label used in summary lines ("Train", "Val", "Test").
    pub fn title(&self) -> &'static str {
        match self {
            Stage::Train => "Train",
            Stage::Validation => "Val",
            Stage::Test => "Test",
        }
    }

    /// Prefix this stage puts in front of its fully qualified metric names.
    pub fn qualify(&self, metric: &str) -> String {
        format!("{}/{}", self.as_str(), metric)
    }

    /// Split `val/acc1` into its stage and bare metric name. The stage prefix
    /// may use the `validation` alias.
    pub fn split_qualified(metric: &str) -> Result<(Stage, &str), String> {
        let (prefix, name) = metric
            .split_once('/')
            .filter(|(prefix, name)| !prefix.is_empty() && !name.is_empty())
            .ok_or_else(|| "expected a stage-qualified name like 'val/acc'".to_string())?;
        let stage = prefix
            .parse::<Stage>()
            .map_err(|_| format!("unknown stage '{prefix}' (expected train, val or test)"))?;
        Ok((stage, name))
    }

    /// Rewrite a qualified name with the canonical stage prefix
    /// (`validation/acc1` becomes `val/acc1`). Other names are returned as is.
    pub fn canonical_name(metric: &str) -> String {
        match Stage::split_qualified(metric) {
            Ok((stage, name)) => stage.qualify(name),
            Err(_) => metric.to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Stage::Train),
            "val" | "validation" => Ok(Stage::Validation),
            "test" => Ok(Stage::Test),
            other => Err(ConfigError::InvalidValue {
                key: "stage".into(),
                reason: format!("unknown stage '{other}' (expected train, val or test)"),
            }),
        }
    }
}
