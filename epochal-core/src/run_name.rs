//! Run names derived from command-line overrides.
//!
//! A launch such as `train lr=0.2 model.depth=50` yields the override name
//! `lr=0.2,model.depth=50`, which the run-name template can embed so that
//! every hyperparameter sweep point lands in its own experiment directory.

use glob::Pattern;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{OverrideNameConfig, RunConfig};
use crate::error::ConfigError;
use crate::template::{self, TemplateValue, TemplateValues};

/// Characters a run name may not contain, since it becomes a directory name.
pub const FORBIDDEN_RUN_NAME_CHARS: &str = "\\/$#&|\"'~!^*:<>";

/// One `key=value` command-line override.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Override {
    pub key: String,
    pub value: String,
}

impl Override {
    /// Parse `key=value`, splitting on the first `=`.
    pub fn parse(arg: &str) -> Result<Self, ConfigError> {
        match arg.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => Ok(Self {
                key: key.trim().to_string(),
                value: value.to_string(),
            }),
            _ => Err(ConfigError::MalformedOverride {
                arg: arg.to_string(),
            }),
        }
    }

    /// The value as a TOML scalar (`0.2`, `true`, `[1, 2]`), or a plain string
    /// when it does not parse as one.
    pub fn toml_value(&self) -> toml::Value {
        format!("v = {}", self.value)
            .parse::<toml::Table>()
            .ok()
            .and_then(|mut table| table.remove("v"))
            .unwrap_or_else(|| toml::Value::String(self.value.clone()))
    }
}

impl FromStr for Override {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Override::parse(s)
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Reverse lookup `short -> original`, rejecting shorthands used twice.
fn longhand(shorthand: &BTreeMap<String, String>) -> Result<BTreeMap<&str, &str>, ConfigError> {
    let mut reverse = BTreeMap::new();
    for (original, short) in shorthand {
        if reverse.insert(short.as_str(), original.as_str()).is_some() {
            return Err(ConfigError::DuplicateShorthand {
                short: short.clone(),
            });
        }
    }
    Ok(reverse)
}

/// Rewrite shorthand keys to the original keys they stand for.
pub fn expand_shorthand(
    overrides: &[Override],
    shorthand: &BTreeMap<String, String>,
) -> Result<Vec<Override>, ConfigError> {
    let reverse = longhand(shorthand)?;
    Ok(overrides
        .iter()
        .map(|o| Override {
            key: reverse
                .get(o.key.as_str())
                .map_or_else(|| o.key.clone(), |k| k.to_string()),
            value: o.value.clone(),
        })
        .collect())
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn matches_any(patterns: &[Pattern], key: &str) -> bool {
    patterns.iter().any(|p| p.matches(key))
}

/// Render the overrides selected by `config` as one sorted string.
pub fn override_name(
    overrides: &[Override],
    config: &OverrideNameConfig,
    shorthand: &BTreeMap<String, String>,
) -> Result<String, ConfigError> {
    let reverse = longhand(shorthand)?;
    let include = config
        .include_keys
        .as_deref()
        .map(compile_patterns)
        .transpose()?;
    let exclude = compile_patterns(&config.exclude_keys)?;

    let mut items = Vec::new();
    for o in overrides {
        let key = reverse.get(o.key.as_str()).copied().unwrap_or(o.key.as_str());
        let keep = match &include {
            Some(include) => matches_any(include, key),
            None => !matches_any(&exclude, key),
        };
        if !keep {
            continue;
        }
        let key = if config.use_shorthand {
            shorthand.get(key).map_or(key, String::as_str)
        } else {
            key
        };
        items.push((key.to_string(), o.value.clone()));
    }
    items.sort();

    Ok(items
        .iter()
        .map(|(k, v)| format!("{k}{}{v}", config.kv_sep))
        .collect::<Vec<_>>()
        .join(&config.item_sep))
}

/// Strip leading and trailing spaces and underscores.
pub fn normalize_run_name(name: &str) -> String {
    name.trim_matches(|c| c == ' ' || c == '_').to_string()
}

pub fn validate_run_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidRunName {
            name: name.to_string(),
            reason: "run name is empty".into(),
        });
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_RUN_NAME_CHARS.contains(*c)) {
        return Err(ConfigError::InvalidRunName {
            name: name.to_string(),
            reason: format!("cannot contain special character {c}"),
        });
    }
    Ok(())
}

/// Render the configured run-name template, then normalize and validate it.
pub fn derive_run_name(
    run: &RunConfig,
    name_config: &OverrideNameConfig,
    shorthand: &BTreeMap<String, String>,
    overrides: &[Override],
) -> Result<String, ConfigError> {
    let mut values = TemplateValues::new();
    for o in expand_shorthand(overrides, shorthand)? {
        values.insert(o.key, TemplateValue::Text(o.value));
    }
    values.insert(
        "override_name".into(),
        override_name(overrides, name_config, shorthand)?.into(),
    );

    let name = normalize_run_name(&template::render(&run.run_name, &values)?);
    validate_run_name(&name)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn overrides(args: &[&str]) -> Vec<Override> {
        args.iter().map(|a| Override::parse(a).unwrap()).collect()
    }

    #[test]
    fn test_override_parse() {
        let o = Override::parse("optim.lr=1e-3=x").unwrap();
        assert_eq!(o.key, "optim.lr");
        assert_eq!(o.value, "1e-3=x");
        assert!(Override::parse("no_equals").is_err());
        assert!(Override::parse("=5").is_err());
        assert_eq!(o.to_string(), "optim.lr=1e-3=x");
    }

    #[test]
    fn test_override_toml_value() {
        assert_eq!(Override::parse("a=3").unwrap().toml_value(), toml::Value::Integer(3));
        assert_eq!(Override::parse("a=0.5").unwrap().toml_value(), toml::Value::Float(0.5));
        assert_eq!(Override::parse("a=true").unwrap().toml_value(), toml::Value::Boolean(true));
        assert_eq!(
            Override::parse("a=resnet18").unwrap().toml_value(),
            toml::Value::String("resnet18".into())
        );
    }

    #[test]
    fn test_override_name_sorted() {
        let name = override_name(
            &overrides(&["lr=0.2", "dropout=0.7", "arch=resnet18"]),
            &OverrideNameConfig::default(),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(name, "arch=resnet18,dropout=0.7,lr=0.2");
    }

    #[test]
    fn test_override_name_separators_and_exclude() {
        let config = OverrideNameConfig {
            kv_sep: "-".into(),
            item_sep: "_".into(),
            exclude_keys: vec!["gpus".into(), "loader.*".into()],
            ..Default::default()
        };
        let name = override_name(
            &overrides(&["gpus=4", "lr=0.1", "loader.num_workers=8", "wd=5e-4"]),
            &config,
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(name, "lr-0.1_wd-5e-4");
    }

    #[test]
    fn test_include_takes_precedence() {
        let config = OverrideNameConfig {
            include_keys: Some(vec!["model.*".into()]),
            exclude_keys: vec!["model.depth".into()],
            ..Default::default()
        };
        let name = override_name(
            &overrides(&["model.depth=50", "model.width=2", "lr=0.1"]),
            &config,
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(name, "model.depth=50,model.width=2");
    }

    #[test]
    fn test_shorthand_round_trip() {
        let shorthand = BTreeMap::from([("optim.learning_rate".to_string(), "lr".to_string())]);
        let args = overrides(&["lr=0.3", "bs=64"]);

        let long = override_name(&args, &OverrideNameConfig::default(), &shorthand).unwrap();
        assert_eq!(long, "bs=64,optim.learning_rate=0.3");

        let config = OverrideNameConfig {
            use_shorthand: true,
            ..Default::default()
        };
        let short = override_name(&args, &config, &shorthand).unwrap();
        assert_eq!(short, "bs=64,lr=0.3");

        let expanded = expand_shorthand(&args, &shorthand).unwrap();
        assert_eq!(expanded[0].key, "optim.learning_rate");
    }

    #[test]
    fn test_duplicate_shorthand() {
        let shorthand = BTreeMap::from([
            ("optim.lr".to_string(), "lr".to_string()),
            ("sched.lr".to_string(), "lr".to_string()),
        ]);
        let err = expand_shorthand(&[], &shorthand).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateShorthand { .. }));
    }

    #[test]
    fn test_invalid_pattern() {
        let config = OverrideNameConfig {
            exclude_keys: vec!["[unclosed".into()],
            ..Default::default()
        };
        assert!(override_name(&[], &config, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_validate_run_name() {
        assert!(validate_run_name("resnet_lr=0.1,wd=5e-4").is_ok());
        assert!(validate_run_name("").is_err());
        for bad in ["a/b", "a:b", "x*", "~home", "a<b"] {
            assert!(validate_run_name(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_derive_run_name() {
        let run = RunConfig {
            run_name: "resnet_{override_name}".into(),
            ..Default::default()
        };
        let name = derive_run_name(
            &run,
            &OverrideNameConfig::default(),
            &BTreeMap::new(),
            &overrides(&["lr=0.1"]),
        )
        .unwrap();
        assert_eq!(name, "resnet_lr=0.1");

        // empty override name leaves a trailing separator that gets trimmed
        let name = derive_run_name(&run, &OverrideNameConfig::default(), &BTreeMap::new(), &[])
            .unwrap();
        assert_eq!(name, "resnet");
    }

    #[test]
    fn test_derive_run_name_uses_override_keys() {
        let run = RunConfig {
            run_name: "{arch}_bs{bs}".into(),
            ..Default::default()
        };
        let name = derive_run_name(
            &run,
            &OverrideNameConfig::default(),
            &BTreeMap::new(),
            &overrides(&["arch=vit", "bs=128"]),
        )
        .unwrap();
        assert_eq!(name, "vit_bs128");

        let err = derive_run_name(
            &run,
            &OverrideNameConfig::default(),
            &BTreeMap::new(),
            &overrides(&["arch=a/b", "bs=1"]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRunName { .. }));
    }
}
