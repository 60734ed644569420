//! Declarative repositories: derived and explicit queries, paging,
//! projections and bulk mutations over a unit of work.

#[macro_use]
mod args;
pub mod backend;
pub mod catalog;
pub mod entity;
pub mod error;
pub mod method;
pub mod page;
pub mod query;
pub mod related;
pub mod repository;
pub mod shape;
pub mod sql;
pub mod uow;
pub mod value;

#[cfg(test)]
mod testing;

pub use args::Args;
pub use backend::{Connection, EntityRow, MemoryBackend, Row, StatementStats, StorageBackend, Window};
pub use catalog::EntityCatalog;
pub use entity::{Attribute, Entity, EntityMeta, FetchType, FetchedRecords, Record, Relation, RelationKind};
pub use error::{DataError, RegistrationError, RegistrationErrorKind};
pub use method::{Method, Modifying, Returns};
pub use page::{Direction, Order, Page, Pageable, Slice, Sort};
pub use related::{Related, RelatedMany};
pub use repository::{CrudRepository, EntityRepository, RepositoryDefinition, DEFAULT_MAX_PAGE_SIZE};
pub use shape::Projection;
pub use sql::{Dialect, SqlRenderer};
pub use uow::UnitOfWork;
pub use value::{FromValue, Value, ValueKind, ValueType};

pub mod prelude {
    //! Re-exports of the most commonly used data types.
    pub use crate::{
        args, Args, CrudRepository, DataError, Direction, Entity, EntityCatalog, EntityRepository, Method,
        Modifying, Page, Pageable, Projection, Related, RelatedMany, RepositoryDefinition, Returns, Slice, Sort,
        UnitOfWork,
    };
}
