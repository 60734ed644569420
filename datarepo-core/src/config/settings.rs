use super::{ConfigError, ConfigProperties, DataConfig};

/// Which storage engine a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Sqlite,
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageKind::Memory),
            "sqlite" => Ok(StorageKind::Sqlite),
            other => Err(format!("unknown backend '{other}', expected memory or sqlite")),
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StorageKind::Memory => "memory",
            StorageKind::Sqlite => "sqlite",
        })
    }
}

/// The `data.*` section.
///
/// ```yaml
/// data:
///   backend: sqlite
///   url: "sqlite://members.db?mode=rwc"
///   max_connections: 5
///   default_page_size: 20
///   max_page_size: 2000
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DataSettings {
    pub backend: StorageKind,
    /// Connection URL; required for `sqlite`.
    pub url: Option<String>,
    pub max_connections: u32,
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            backend: StorageKind::Memory,
            url: None,
            max_connections: 5,
            default_page_size: 20,
            max_page_size: 2000,
        }
    }
}

impl ConfigProperties for DataSettings {
    const PREFIX: &'static str = "data";

    fn from_config(config: &DataConfig) -> Result<Self, ConfigError> {
        let defaults = DataSettings::default();
        let backend = match config.get_or::<Option<String>>(&Self::key("backend"), None)? {
            Some(raw) => raw.parse().map_err(|message| ConfigError::Invalid {
                key: Self::key("backend"),
                message,
            })?,
            None => defaults.backend,
        };
        let settings = DataSettings {
            backend,
            url: config.get_or(&Self::key("url"), None)?,
            max_connections: config.get_or(&Self::key("max_connections"), defaults.max_connections)?,
            default_page_size: config.get_or(&Self::key("default_page_size"), defaults.default_page_size)?,
            max_page_size: config.get_or(&Self::key("max_page_size"), defaults.max_page_size)?,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl DataSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |property: &str, message: &str| ConfigError::Invalid {
            key: Self::key(property),
            message: message.to_string(),
        };
        if self.backend == StorageKind::Sqlite && self.url.is_none() {
            return Err(invalid("url", "required when data.backend is sqlite"));
        }
        if self.max_connections == 0 {
            return Err(invalid("max_connections", "must be at least 1"));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(invalid("max_page_size", "page sizes must be at least 1"));
        }
        if self.default_page_size > self.max_page_size {
            return Err(invalid("default_page_size", "must not exceed data.max_page_size"));
        }
        Ok(())
    }
}
