use super::ConfigError;

/// A flattened configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    pub(super) fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Bool(b) => ConfigValue::Bool(*b),
            serde_yaml::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => ConfigValue::Integer(i),
                (None, Some(f)) => ConfigValue::Float(f),
                (None, None) => ConfigValue::String(n.to_string()),
            },
            serde_yaml::Value::String(s) => ConfigValue::String(s.clone()),
            serde_yaml::Value::Null => ConfigValue::Null,
            serde_yaml::Value::Sequence(items) => ConfigValue::List(items.iter().map(ConfigValue::from_yaml).collect()),
            serde_yaml::Value::Tagged(tagged) => ConfigValue::from_yaml(&tagged.value),
            serde_yaml::Value::Mapping(_) => ConfigValue::Null,
        }
    }

    pub(super) fn resolve_placeholders(&mut self) -> Result<(), ConfigError> {
        match self {
            ConfigValue::String(s) if s.contains("${") => {
                *s = super::placeholders::resolve_placeholders(s)?;
            }
            ConfigValue::List(items) => {
                for item in items {
                    item.resolve_placeholders()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn mismatch<T>(key: &str, expected: &'static str) -> Result<T, ConfigError> {
        Err(ConfigError::TypeMismatch {
            key: key.to_string(),
            expected,
        })
    }
}

/// Conversion from a [`ConfigValue`]. Strings parse into numbers and
/// booleans, since environment overrides are always strings.
pub trait FromConfigValue: Sized {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError>;
}

impl FromConfigValue for String {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::String(s) => Ok(s.clone()),
            ConfigValue::Integer(i) => Ok(i.to_string()),
            ConfigValue::Float(f) => Ok(f.to_string()),
            ConfigValue::Bool(b) => Ok(b.to_string()),
            ConfigValue::Null | ConfigValue::List(_) => ConfigValue::mismatch(key, "String"),
        }
    }
}

impl FromConfigValue for i64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Integer(i) => Ok(*i),
            ConfigValue::String(s) => s.trim().parse().or_else(|_| ConfigValue::mismatch(key, "i64")),
            _ => ConfigValue::mismatch(key, "i64"),
        }
    }
}

impl FromConfigValue for f64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Integer(i) => Ok(*i as f64),
            ConfigValue::String(s) => s.trim().parse().or_else(|_| ConfigValue::mismatch(key, "f64")),
            _ => ConfigValue::mismatch(key, "f64"),
        }
    }
}

impl FromConfigValue for bool {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => ConfigValue::mismatch(key, "bool"),
            },
            _ => ConfigValue::mismatch(key, "bool"),
        }
    }
}

impl<T: FromConfigValue> FromConfigValue for Option<T> {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Null => Ok(None),
            other => T::from_config_value(other, key).map(Some),
        }
    }
}

impl<T: FromConfigValue> FromConfigValue for Vec<T> {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| T::from_config_value(v, &format!("{key}.{i}")))
                .collect(),
            ConfigValue::String(s) => s
                .split(',')
                .map(|part| T::from_config_value(&ConfigValue::String(part.trim().to_string()), key))
                .collect(),
            other => Ok(vec![T::from_config_value(other, key)?]),
        }
    }
}

macro_rules! impl_from_config_int {
    ($($ty:ty),+) => {
        $(
            impl FromConfigValue for $ty {
                fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
                    let i = i64::from_config_value(value, key)?;
                    <$ty>::try_from(i).or_else(|_| ConfigValue::mismatch(key, stringify!($ty)))
                }
            }
        )+
    };
}

impl_from_config_int!(u16, u32, u64, i32, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_strings_parse() {
        let v = ConfigValue::String("25".into());
        assert_eq!(u64::from_config_value(&v, "k").unwrap(), 25);
        assert!(bool::from_config_value(&ConfigValue::String("yes".into()), "k").unwrap());
        assert!(u32::from_config_value(&ConfigValue::Integer(-1), "k").is_err());
    }

    #[test]
    fn lists_accept_comma_separated_strings() {
        let v = ConfigValue::String("a, b".into());
        assert_eq!(Vec::<String>::from_config_value(&v, "k").unwrap(), vec!["a", "b"]);
    }
}
