//! Ambient pieces shared by the datarepo crates: layered configuration and
//! tracing setup.

pub mod config;
mod tracing_setup;

pub use config::{ConfigError, ConfigProperties, DataConfig, DataSettings, StorageKind};
pub use tracing_setup::init_tracing;
