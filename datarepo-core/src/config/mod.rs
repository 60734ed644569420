mod loader;
mod placeholders;
mod settings;
mod value;

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};

pub use placeholders::resolve_placeholders;
pub use settings::{DataSettings, StorageKind};
pub use value::{ConfigValue, FromConfigValue};

/// Environment variable naming the active profile.
pub const PROFILE_ENV: &str = "DATAREPO_PROFILE";

/// Prefix of the environment variables overlaid on the `data.*` keys.
const ENV_PREFIX: &str = "DATA_";

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested key was not found in the configuration.
    NotFound(String),
    /// The value could not be converted to the requested type.
    TypeMismatch { key: String, expected: &'static str },
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
    /// A value is present but outside what the section accepts.
    Invalid { key: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Config key not found: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "Config type mismatch for '{key}': expected {expected}")
            }
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
            ConfigError::Invalid { key, message } => write!(f, "Invalid config value for '{key}': {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A typed configuration section read from a [`DataConfig`].
///
/// ```ignore
/// impl ConfigProperties for DataSettings {
///     const PREFIX: &'static str = "data";
///     fn from_config(config: &DataConfig) -> Result<Self, ConfigError> { ... }
/// }
/// ```
pub trait ConfigProperties: Sized {
    /// Key prefix of the section (`"data"`).
    const PREFIX: &'static str;

    fn from_config(config: &DataConfig) -> Result<Self, ConfigError>;

    /// Absolute key of a property of this section.
    fn key(property: &str) -> String {
        format!("{}.{property}", Self::PREFIX)
    }
}

/// Layered configuration.
///
/// `DataConfig` (= `DataConfig<()>`) gives raw key access; `DataConfig<T>`
/// adds a typed section reachable through `Deref<Target = T>`.
///
/// Resolution order (lowest to highest priority):
/// 1. `application.yaml`
/// 2. `application-{profile}.yaml`
/// 3. `.env`, then `.env.{profile}` (never overwriting set variables)
/// 4. `${VAR}`, `${env:VAR}` and `${file:/path}` placeholders in strings
/// 5. `DATA_*` environment variables (`DATA_BACKEND` overrides `data.backend`,
///    `DATA_MAX_PAGE_SIZE` overrides `data.max_page_size`)
///
/// The profile comes from `DATAREPO_PROFILE`, then the argument.
#[derive(Debug, Clone)]
pub struct DataConfig<T = ()> {
    values: HashMap<String, ConfigValue>,
    profile: String,
    typed: T,
}

impl DataConfig {
    /// Load from the current working directory.
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        Self::load_from(Path::new("."), profile)
    }

    /// Load from `dir`: YAML files and `.env` files are looked up there.
    pub fn load_from(dir: &Path, profile: &str) -> Result<Self, ConfigError> {
        let profile = std::env::var(PROFILE_ENV).unwrap_or_else(|_| profile.to_string());
        let mut values = HashMap::new();

        loader::load_yaml_file(&dir.join("application.yaml"), &mut values)?;
        loader::load_yaml_file(&dir.join(format!("application-{profile}.yaml")), &mut values)?;

        let dotenv: [PathBuf; 2] = [dir.join(".env"), dir.join(format!(".env.{profile}"))];
        for path in &dotenv {
            if path.exists() {
                dotenvy::from_path(path).map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
            }
        }

        for value in values.values_mut() {
            value.resolve_placeholders()?;
        }

        for (name, raw) in std::env::vars() {
            if let Some(rest) = name.strip_prefix(ENV_PREFIX) {
                let key = format!("data.{}", rest.to_lowercase());
                values.insert(key, ConfigValue::String(raw));
            }
        }

        tracing::debug!(%profile, keys = values.len(), "Configuration loaded");
        Ok(DataConfig {
            values,
            profile,
            typed: (),
        })
    }

    /// Parse a YAML document; no files or environment are read.
    pub fn from_yaml_str(yaml: &str, profile: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        loader::load_yaml_str(yaml, &mut values)?;
        Ok(DataConfig {
            values,
            profile: profile.to_string(),
            typed: (),
        })
    }

    pub fn empty() -> Self {
        DataConfig {
            values: HashMap::new(),
            profile: "test".to_string(),
            typed: (),
        }
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    /// Attach a typed section built from the raw values.
    ///
    /// ```ignore
    /// let config = DataConfig::load("dev")?.with_typed::<DataSettings>()?;
    /// config.max_page_size
    /// ```
    pub fn with_typed<C: ConfigProperties>(self) -> Result<DataConfig<C>, ConfigError> {
        let typed = C::from_config(&self)?;
        Ok(DataConfig {
            values: self.values,
            profile: self.profile,
            typed,
        })
    }
}

impl<T> DataConfig<T> {
    /// Typed value of a dot-separated key.
    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V, ConfigError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        V::from_config_value(value, key)
    }

    /// Typed value, or `default` when the key is absent. A present value of
    /// the wrong type is still an error.
    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> Result<V, ConfigError> {
        match self.values.get(key) {
            Some(value) => V::from_config_value(value, key),
            None => Ok(default),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn typed(&self) -> &T {
        &self.typed
    }
}

impl<T> Deref for DataConfig<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.typed
    }
}
