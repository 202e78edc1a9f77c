//! Progress-bar postfix formatting.

use std::collections::BTreeMap;

use crate::config::ProgressConfig;
use crate::error::ConfigError;
use crate::template::{Template, TemplateValues};

const VERSION_KEY: &str = "v_num";
const DEFAULT_SPEC: &str = ".3f";

/// Turns a flat metric map into the `key=value` pairs shown next to a
/// progress bar.
#[derive(Debug, Clone)]
pub struct ProgressFormat {
    remove_v_num: bool,
    exclude: Vec<String>,
    formatters: BTreeMap<String, Template>,
    default_formatter: Template,
    use_short_name: bool,
}

/// Accepts `.3f` as well as `{:.3f}`.
fn value_template(spec: &str) -> Result<Template, ConfigError> {
    let spec = spec
        .strip_prefix("{:")
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(spec);
    Template::parse(&format!("{{v:{spec}}}"))
}

/// `val/acc1` becomes `v:acc1`; names without a prefix are unchanged.
pub fn short_name(key: &str) -> String {
    match key.split_once('/') {
        Some((prefix, name)) => match prefix.chars().next() {
            Some(first) => format!("{first}:{name}"),
            None => name.to_string(),
        },
        None => key.to_string(),
    }
}

impl ProgressFormat {
    pub fn from_config(config: &ProgressConfig) -> Result<Self, ConfigError> {
        let formatters = config
            .formatter
            .iter()
            .map(|(key, spec)| Ok((key.clone(), value_template(spec)?)))
            .collect::<Result<_, ConfigError>>()?;
        Ok(Self {
            remove_v_num: config.remove_v_num,
            exclude: config.exclude.clone(),
            formatters,
            default_formatter: value_template(DEFAULT_SPEC)?,
            use_short_name: config.use_short_name,
        })
    }

    /// Ordered `(display_key, text)` pairs.
    pub fn render(&self, values: &BTreeMap<String, f64>) -> Result<Vec<(String, String)>, ConfigError> {
        let mut out = Vec::with_capacity(values.len());
        for (key, value) in values {
            if (self.remove_v_num && key == VERSION_KEY) || self.exclude.contains(key) {
                continue;
            }
            let template = self.formatters.get(key).unwrap_or(&self.default_formatter);
            let text = template.render(&TemplateValues::from([("v".to_string(), (*value).into())]))?;
            let display_key = if self.use_short_name {
                short_name(key)
            } else {
                key.clone()
            };
            out.push((display_key, text));
        }
        Ok(out)
    }

    /// `k=v, k=v`.
    pub fn postfix(&self, values: &BTreeMap<String, f64>) -> Result<String, ConfigError> {
        Ok(self
            .render(values)?
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", "))
    }
}
