//! datarepo: declarative repositories over a unit of work.
//!
//! This facade crate re-exports the datarepo sub-crates through a single
//! dependency with feature flags. Import everything you need with:
//!
//! ```ignore
//! use datarepo::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Default | Crate                |
//! |----------|---------|----------------------|
//! | `sqlite` | no      | `datarepo-data-sqlx` |
//! | `full`   | no      | All of the above     |

// The derives use `proc-macro-crate` to detect whether the user depends on
// `datarepo` (facade) or on `datarepo-data`, and generate the matching paths.
pub extern crate datarepo_core;
pub extern crate datarepo_macros;

/// The data layer: entities, queries, repositories, backends.
pub use datarepo_data as data;

pub use datarepo_core::{config, init_tracing, ConfigError, ConfigProperties, DataConfig, DataSettings, StorageKind};
pub use datarepo_macros::{Entity, Projection};

#[cfg(feature = "sqlite")]
pub use datarepo_data_sqlx as sqlx_backend;

pub mod prelude {
    //! Re-exports of the most commonly used types.
    pub use crate::data::prelude::*;
    pub use crate::data::{MemoryBackend, StorageBackend};
    pub use crate::{DataConfig, DataSettings, StorageKind};
    pub use datarepo_macros::{Entity, Projection};

    #[cfg(feature = "sqlite")]
    pub use datarepo_data_sqlx::SqliteBackend;
}
