//! Per-device loader sizing.
//!
//! Sizes may be given per device (`batch_size`) or across all devices
//! (`global_batch_size`), in which case they are split evenly.

use crate::config::LoaderConfig;
use crate::error::ConfigError;
use crate::metrics::Stage;

pub const DEFAULT_NUM_WORKERS: u64 = 8;

/// Loader sizes for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSizes {
    pub batch_size: u64,
    pub eval_batch_size: u64,
    pub num_workers: u64,
}

impl LoaderSizes {
    pub fn resolve(config: &LoaderConfig, devices: u64) -> Result<Self, ConfigError> {
        if devices == 0 {
            return Err(ConfigError::InvalidValue {
                key: "devices".into(),
                reason: "at least one device is required".into(),
            });
        }
        let batch_size = per_device(
            "batch_size",
            config.batch_size,
            config.global_batch_size,
            devices,
        )?
        .ok_or_else(|| ConfigError::Missing {
            keys: "loader.batch_size or loader.global_batch_size".into(),
        })?;
        let eval_batch_size = per_device(
            "eval_batch_size",
            config.eval_batch_size,
            config.global_eval_batch_size,
            devices,
        )?
        .unwrap_or(batch_size);
        let num_workers = per_device(
            "num_workers",
            config.num_workers,
            config.global_num_workers,
            devices,
        )?
        .unwrap_or(DEFAULT_NUM_WORKERS);

        Ok(Self {
            batch_size,
            eval_batch_size,
            num_workers,
        })
    }

    pub fn batch_size_for(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Train => self.batch_size,
            Stage::Validation | Stage::Test => self.eval_batch_size,
        }
    }
}

/// The local value wins over the global one.
fn per_device(
    name: &str,
    local: Option<u64>,
    global: Option<u64>,
    devices: u64,
) -> Result<Option<u64>, ConfigError> {
    match (local, global) {
        (Some(0), _) => Err(ConfigError::InvalidValue {
            key: format!("loader.{name}"),
            reason: "must be > 0".into(),
        }),
        (Some(value), _) => Ok(Some(value)),
        (None, Some(total)) if total % devices != 0 => Err(ConfigError::InvalidValue {
            key: format!("loader.global_{name}"),
            reason: format!("{total} is not divisible by {devices} devices"),
        }),
        (None, Some(total)) => Ok(Some(total / devices)),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_values() {
        let config = LoaderConfig {
            batch_size: Some(64),
            ..Default::default()
        };
        let sizes = LoaderSizes::resolve(&config, 4).unwrap();
        assert_eq!(
            sizes,
            LoaderSizes {
                batch_size: 64,
                eval_batch_size: 64,
                num_workers: 8,
            }
        );
    }

    #[test]
    fn test_global_values_split() {
        let config = LoaderConfig {
            global_batch_size: Some(256),
            global_eval_batch_size: Some(512),
            global_num_workers: Some(16),
            ..Default::default()
        };
        let sizes = LoaderSizes::resolve(&config, 4).unwrap();
        assert_eq!(sizes.batch_size, 64);
        assert_eq!(sizes.batch_size_for(Stage::Validation), 128);
        assert_eq!(sizes.num_workers, 4);
    }

    #[test]
    fn test_local_wins_over_global() {
        let config = LoaderConfig {
            batch_size: Some(32),
            global_batch_size: Some(999),
            ..Default::default()
        };
        assert_eq!(LoaderSizes::resolve(&config, 2).unwrap().batch_size, 32);
    }

    #[test]
    fn test_errors() {
        let indivisible = LoaderConfig {
            global_batch_size: Some(10),
            ..Default::default()
        };
        assert!(LoaderSizes::resolve(&indivisible, 4).is_err());

        let zero = LoaderConfig {
            batch_size: Some(0),
            ..Default::default()
        };
        assert!(LoaderSizes::resolve(&zero, 1).is_err());

        let missing = LoaderSizes::resolve(&LoaderConfig::default(), 1).unwrap_err();
        assert!(matches!(missing, ConfigError::Missing { .. }));
        assert!(LoaderSizes::resolve(&zero, 0).is_err());
    }
}
