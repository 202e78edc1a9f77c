//! Placeholder templates for file names and log lines.
//!
//! Supports `{key}` and `{key:spec}` placeholders where `spec` is
//! `[<|>|^][width][.precision][f|d|s]`, e.g. `best/{epoch}-{val/acc1:.2f}` or
//! `[{epoch:>3}]`. Keys may contain `/` and `.`; `{{` and `}}` are literal
//! braces.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// A value substituted into a template placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl From<f64> for TemplateValue {
    fn from(v: f64) -> Self {
        TemplateValue::Float(v)
    }
}

impl From<i64> for TemplateValue {
    fn from(v: i64) -> Self {
        TemplateValue::Int(v)
    }
}

impl From<u64> for TemplateValue {
    fn from(v: u64) -> Self {
        TemplateValue::Int(v as i64)
    }
}

impl From<&str> for TemplateValue {
    fn from(v: &str) -> Self {
        TemplateValue::Text(v.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(v: String) -> Self {
        TemplateValue::Text(v)
    }
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Float(v) => write!(f, "{v}"),
            TemplateValue::Int(v) => write!(f, "{v}"),
            TemplateValue::Text(v) => f.write_str(v),
        }
    }
}

pub type TemplateValues = BTreeMap<String, TemplateValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FormatSpec {
    align: Option<Align>,
    width: Option<usize>,
    precision: Option<usize>,
    kind: Option<char>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder { key: String, spec: FormatSpec },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let err = |reason: &str| ConfigError::Template {
            template: source.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(err("nested '{' in placeholder")),
                            Some(ch) => body.push(ch),
                            None => return Err(err("unclosed '{'")),
                        }
                    }
                    let (key, spec) = match body.split_once(':') {
                        Some((key, spec)) => (key, parse_spec(spec).map_err(|r| err(&r))?),
                        None => (body.as_str(), FormatSpec::default()),
                    };
                    if key.is_empty() {
                        return Err(err("empty placeholder"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder {
                        key: key.to_string(),
                        spec,
                    });
                }
                '}' => return Err(err("unmatched '}'")),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Keys referenced by the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder { key, .. } => Some(key.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn render(&self, values: &TemplateValues) -> Result<String, ConfigError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { key, spec } => {
                    let value = values.get(key).ok_or_else(|| ConfigError::Template {
                        template: self.source.clone(),
                        reason: format!("no value for '{key}'"),
                    })?;
                    let formatted = apply_spec(value, spec).map_err(|reason| {
                        ConfigError::Template {
                            template: self.source.clone(),
                            reason,
                        }
                    })?;
                    out.push_str(&formatted);
                }
            }
        }
        Ok(out)
    }
}

/// Parse and render in one step.
pub fn render(template: &str, values: &TemplateValues) -> Result<String, ConfigError> {
    Template::parse(template)?.render(values)
}

fn parse_spec(spec: &str) -> Result<FormatSpec, String> {
    let mut out = FormatSpec::default();
    let mut rest = spec;

    if let Some(first) = rest.chars().next() {
        out.align = match first {
            '<' => Some(Align::Left),
            '>' => Some(Align::Right),
            '^' => Some(Align::Center),
            _ => None,
        };
        if out.align.is_some() {
            rest = &rest[1..];
        }
    }

    let width_len = rest.chars().take_while(char::is_ascii_digit).count();
    if width_len > 0 {
        out.width = rest[..width_len].parse().ok();
        rest = &rest[width_len..];
    }

    if let Some(after_dot) = rest.strip_prefix('.') {
        let precision_len = after_dot.chars().take_while(char::is_ascii_digit).count();
        if precision_len == 0 {
            return Err(format!("missing precision in '{spec}'"));
        }
        out.precision = after_dot[..precision_len].parse().ok();
        rest = &after_dot[precision_len..];
    }

    match rest {
        "" => {}
        "f" | "d" | "s" => out.kind = rest.chars().next(),
        other => return Err(format!("unsupported format '{other}' in '{spec}'")),
    }
    Ok(out)
}

fn apply_spec(value: &TemplateValue, spec: &FormatSpec) -> Result<String, String> {
    let body = match (value, spec.kind) {
        (TemplateValue::Text(_), Some('f' | 'd')) => {
            return Err(format!("cannot format text '{value}' as a number"));
        }
        (TemplateValue::Float(_), Some('d')) => {
            return Err(format!("cannot format float {value} as an integer"));
        }
        (TemplateValue::Float(v), _) => match spec.precision {
            Some(p) => format!("{v:.p$}"),
            None if spec.kind == Some('f') => format!("{v:.6}"),
            None => v.to_string(),
        },
        (TemplateValue::Int(v), Some('f')) => format!("{:.*}", spec.precision.unwrap_or(6), *v as f64),
        (TemplateValue::Int(v), _) => match spec.precision {
            Some(p) => format!("{:.p$}", *v as f64),
            None => v.to_string(),
        },
        (TemplateValue::Text(v), _) => match spec.precision {
            Some(p) => v.chars().take(p).collect(),
            None => v.clone(),
        },
    };

    let width = spec.width.unwrap_or(0);
    let align = spec.align.unwrap_or(match value {
        TemplateValue::Text(_) => Align::Left,
        _ => Align::Right,
    });
    Ok(match align {
        Align::Left => format!("{body:<width$}"),
        Align::Right => format!("{body:>width$}"),
        Align::Center => format!("{body:^width$}"),
    })
}
