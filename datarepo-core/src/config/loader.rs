use std::collections::HashMap;
use std::path::Path;

use super::value::ConfigValue;
use super::ConfigError;

/// Flatten `path` into `values` when the file exists; later files override
/// earlier keys.
pub(super) fn load_yaml_file(path: &Path, values: &mut HashMap<String, ConfigValue>) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
    load_yaml_str(&content, values).map_err(|e| match e {
        ConfigError::Load(msg) => ConfigError::Load(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub(super) fn load_yaml_str(content: &str, values: &mut HashMap<String, ConfigValue>) -> Result<(), ConfigError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
    flatten("", &yaml, values);
    Ok(())
}

/// `data: { backend: sqlite }` becomes `data.backend = "sqlite"`. Sequences
/// are stored whole and per index (`key.0`, `key.1`).
fn flatten(prefix: &str, node: &serde_yaml::Value, out: &mut HashMap<String, ConfigValue>) {
    match node {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let segment = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    other => format!("{other:?}"),
                };
                let key = if prefix.is_empty() {
                    segment
                } else {
                    format!("{prefix}.{segment}")
                };
                flatten(&key, v, out);
            }
        }
        serde_yaml::Value::Sequence(items) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), ConfigValue::from_yaml(node));
            for (i, item) in items.iter().enumerate() {
                flatten(&format!("{prefix}.{i}"), item, out);
            }
        }
        serde_yaml::Value::Tagged(tagged) => flatten(prefix, &tagged.value, out),
        leaf if !prefix.is_empty() => {
            out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
        }
        _ => {}
    }
}
