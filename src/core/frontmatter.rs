use lazy_static::lazy_static;
use regex::Regex;
use serde_yaml::{Mapping, Value};

use super::model::{MetaValue, Metadata};
use crate::error::{Result, SkeinError};

lazy_static! {
    static ref FRONTMATTER_RE: Regex =
        Regex::new(r"(?sm)\A---[ \t]*\r?\n(.*?)^---[ \t]*(?:\r?\n|\z)").unwrap();
}

/// YAML header of a markdown document
#[derive(Debug, Default, Clone)]
pub struct Frontmatter {
    pub fields: Mapping,
    pub raw: String,
}

impl Frontmatter {
    /// Split `content` into its frontmatter (if any) and the remaining body.
    ///
    /// A header that is present but not a YAML mapping is an error.
    pub fn split(content: &str) -> Result<(Option<Self>, &str)> {
        let caps = match FRONTMATTER_RE.captures(content) {
            Some(caps) => caps,
            None => return Ok((None, content)),
        };
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or("");

        let fields = if raw.trim().is_empty() {
            Mapping::new()
        } else {
            match serde_yaml::from_str::<Value>(raw)? {
                Value::Mapping(map) => map,
                Value::Null => Mapping::new(),
                other => {
                    return Err(SkeinError::validation(format!(
                        "frontmatter must be a mapping, got {}",
                        value_kind(&other)
                    )))
                }
            }
        };

        Ok((
            Some(Self {
                fields,
                raw: raw.to_string(),
            }),
            &content[whole..],
        ))
    }

    /// Scalar field rendered as text (numbers and bools included)
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// All scalar fields except `skip`, as node metadata
    pub fn scalar_metadata(&self, skip: &[&str]) -> Metadata {
        let mut meta = Metadata::new();
        for (key, value) in &self.fields {
            let key = match key.as_str() {
                Some(k) if !skip.contains(&k) => k,
                _ => continue,
            };
            let value = match value {
                Value::String(s) => MetaValue::Text(s.clone()),
                Value::Bool(b) => MetaValue::Bool(*b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => MetaValue::Int(i),
                    None => match n.as_f64() {
                        Some(f) => MetaValue::Float(f),
                        None => continue,
                    },
                },
                _ => continue,
            };
            meta.insert(key.to_string(), value);
        }
        meta
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
