//! # datarepo-data-sqlx
//!
//! SQLite storage for the datarepo data layer. Compiled statements are
//! rendered by [`SqlRenderer`](datarepo_data::SqlRenderer) and run through an
//! `sqlx` pool.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SqliteBackend`] | [`StorageBackend`](datarepo_data::StorageBackend) over a `SqlitePool` |
//! | [`SqlxErrorExt`] | Converts `sqlx::Error` → `DataError` (`.into_data_error()`) |
//!
//! ```ignore
//! use datarepo_data_sqlx::SqliteBackend;
//!
//! let backend = SqliteBackend::connect("sqlite::memory:", 1).await?;
//! backend.create_schema(&catalog).await?;
//! let mut uow = UnitOfWork::begin(&backend).await?;
//! let member = members.save(&mut uow, Member::new("member1", 10)).await?;
//! uow.commit().await?;
//! ```

pub mod error;
pub mod sqlite;

pub use error::SqlxErrorExt;
pub use sqlite::SqliteBackend;

/// Re-exports of the most commonly used types from both `datarepo-data` and this crate.
pub mod prelude {
    pub use crate::{SqliteBackend, SqlxErrorExt};
    pub use datarepo_data::prelude::*;
}
