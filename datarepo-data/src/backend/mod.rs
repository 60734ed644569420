//! Storage backends.
//!
//! A backend executes compiled [`Statement`]s; it never sees method names
//! or query text. [`MemoryBackend`] ships here, the SQLite backend lives in
//! `datarepo-data-sqlx`.

pub mod memory;

pub use memory::{MemoryBackend, StatementStats};

use crate::entity::{EntityMeta, FetchedRecords, Record};
use crate::error::DataError;
use crate::query::{Select, Selection, Statement};
use crate::value::Value;
use async_trait::async_trait;

/// Row window requested by a paged or capped read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Apply a `Top N` cap: the window never reaches past the first `top`
    /// rows of the full result.
    pub fn capped(self, top: Option<u64>) -> Self {
        let Some(top) = top else { return self };
        let remaining = top.saturating_sub(self.offset);
        Self {
            offset: self.offset,
            limit: Some(self.limit.map_or(remaining, |l| l.min(remaining))),
        }
    }
}

/// An entity row plus the related rows fetched with it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub record: Record,
    /// Keyed by relation name on the root entity.
    pub fetched: Vec<(&'static str, FetchedRecords)>,
}

impl EntityRow {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            fetched: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Entity(EntityRow),
    Tuple(Vec<Value>),
}

/// Entry point of a storage engine.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn Connection>, DataError>;

    fn name(&self) -> &'static str;
}

/// One open transaction.
#[async_trait]
pub trait Connection: Send {
    /// Insert a row and return its identifier. A `Null` identifier in
    /// `record` asks the backend to generate one.
    async fn insert(&mut self, meta: &'static EntityMeta, record: &Record) -> Result<Value, DataError>;

    /// Overwrite the row with the identifier found in `record`.
    async fn update(&mut self, meta: &'static EntityMeta, record: &Record) -> Result<u64, DataError>;

    async fn delete(&mut self, meta: &'static EntityMeta, id: &Value) -> Result<u64, DataError>;

    /// Run a select. `params` are indexed like the statement's placeholders.
    async fn select(&mut self, select: &Select, params: &[Value], window: Window) -> Result<Vec<Row>, DataError>;

    /// Run a bulk update or delete and return the affected row count.
    async fn execute(&mut self, statement: &Statement, params: &[Value]) -> Result<u64, DataError>;

    async fn commit(self: Box<Self>) -> Result<(), DataError>;

    async fn rollback(self: Box<Self>) -> Result<(), DataError>;
}

/// Run a count select and read its single value.
pub async fn count(conn: &mut dyn Connection, select: &Select, params: &[Value]) -> Result<u64, DataError> {
    if !matches!(select.selection, Selection::Count { .. }) {
        return Err(DataError::Other(format!(
            "count requested on a non-count select of {}",
            select.root.name
        )));
    }
    let rows = conn.select(select, params, Window::all()).await?;
    match rows.into_iter().next() {
        Some(Row::Tuple(values)) => match values.first() {
            Some(Value::Int(n)) => u64::try_from(*n).map_err(|_| DataError::Other(format!("negative count {n}"))),
            Some(Value::Null) | None => Ok(0),
            Some(other) => Err(DataError::Other(format!("count returned {other}"))),
        },
        Some(Row::Entity(_)) => Err(DataError::Other("count returned an entity row".into())),
        None => Ok(0),
    }
}
