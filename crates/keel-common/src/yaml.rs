//! YAML parsing via yaml-rust2
//!
//! Addon manifests arrive as multi-document YAML. Documents are converted to
//! `serde_json::Value` so they can be fed straight into server-side apply.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Error type for YAML parsing
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct YamlError(String);

/// Parse every document of a multi-document YAML string.
///
/// Empty documents (a bare `---` or trailing separator) are dropped.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError(e.to_string()))?;
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match to_json(doc)? {
            Value::Null => {}
            value => out.push(value),
        }
    }
    Ok(out)
}

fn to_json(yaml: Yaml) -> Result<Value, YamlError> {
    let value = match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::from(i),
        Yaml::String(s) => Value::String(s),
        Yaml::Real(raw) => {
            let f = raw
                .parse::<f64>()
                .map_err(|e| YamlError(format!("invalid float {raw}: {e}")))?;
            Number::from_f64(f).map_or(Value::Null, Value::Number)
        }
        Yaml::Array(items) => {
            Value::Array(items.into_iter().map(to_json).collect::<Result<Vec<_>, _>>()?)
        }
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(key_string(k)?, to_json(v)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(YamlError("aliases are not supported".to_string())),
        Yaml::BadValue => return Err(YamlError("bad YAML value".to_string())),
    };
    Ok(value)
}

/// Mapping keys become strings; collections are rejected
fn key_string(key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        other => Err(YamlError(format!("unsupported mapping key {other:?}"))),
    }
}
