//! SQLite storage engine.

use crate::error::SqlxErrorExt;
use async_trait::async_trait;
use datarepo_core::{DataSettings, StorageKind};
use datarepo_data::backend::{Connection, EntityRow, Row, StorageBackend, Window};
use datarepo_data::query::{Select, Statement};
use datarepo_data::sql::{Layout, RenderedSql};
use datarepo_data::{
    DataError, Dialect, EntityCatalog, EntityMeta, FetchedRecords, Record, Relation, SqlRenderer, Value,
    ValueKind,
};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteQueryResult, SqliteRow,
};
use sqlx::{Row as _, Sqlite, Transaction, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// [`StorageBackend`] over an `sqlx` SQLite pool.
///
/// Each unit of work runs in one pool transaction. `LIKE` is case sensitive
/// on pools opened by [`connect`](Self::connect), matching the in-memory
/// engine.
///
/// ```ignore
/// let backend = SqliteBackend::connect("sqlite::memory:", 1).await?;
/// backend.create_schema(&catalog).await?;
/// let mut uow = UnitOfWork::begin(&backend).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    renderer: SqlRenderer,
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

impl SqliteBackend {
    /// Open a pool. An in-memory database lives in a single connection that
    /// is kept open, so the pool is capped at one connection.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DataError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(SqlxErrorExt::into_data_error)?
            .create_if_missing(true)
            .pragma("case_sensitive_like", "ON");

        let mut pool = SqlitePoolOptions::new();
        if is_in_memory(url) {
            pool = pool
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool = pool.max_connections(max_connections.max(1));
        }
        let pool = pool
            .connect_with(options)
            .await
            .map_err(SqlxErrorExt::into_data_error)?;
        info!(url, max_connections, "SQLite backend connected");
        Ok(Self::from_pool(pool))
    }

    /// Open the pool described by the `data.*` settings.
    pub async fn from_settings(settings: &DataSettings) -> Result<Self, DataError> {
        if settings.backend != StorageKind::Sqlite {
            return Err(DataError::Other(format!(
                "data.backend is '{}', not 'sqlite'",
                settings.backend
            )));
        }
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| DataError::Other("data.url is required for the sqlite backend".into()))?;
        Self::connect(url, settings.max_connections).await
    }

    /// Wrap an existing pool. `LIKE` follows the pool's own pragmas.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            renderer: SqlRenderer::new(Dialect::Sqlite),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the table of every registered entity.
    pub async fn create_schema(&self, catalog: &EntityCatalog) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await.map_err(SqlxErrorExt::into_data_error)?;
        for meta in catalog.iter() {
            let ddl = self.renderer.create_table(meta);
            debug!(sql = %ddl, "Creating table");
            sqlx::query(&ddl)
                .execute(&mut *tx)
                .await
                .map_err(SqlxErrorExt::into_data_error)?;
        }
        tx.commit().await.map_err(SqlxErrorExt::into_data_error)?;
        info!(tables = catalog.len(), "Schema created");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn begin(&self) -> Result<Box<dyn Connection>, DataError> {
        let tx = self.pool.begin().await.map_err(SqlxErrorExt::into_data_error)?;
        Ok(Box::new(SqliteConnection {
            tx,
            renderer: self.renderer,
        }))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

/// One open SQLite transaction. Dropping it without commit rolls back.
struct SqliteConnection {
    tx: Transaction<'static, Sqlite>,
    renderer: SqlRenderer,
}

fn bind<'q>(query: SqliteQuery<'q>, value: &Value) -> Result<SqliteQuery<'q>, DataError> {
    Ok(match value {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::List(_) => {
            return Err(DataError::binding("list parameter outside of an IN expression"));
        }
    })
}

fn prepare<'q>(sql: &'q str, params: &[Value]) -> Result<SqliteQuery<'q>, DataError> {
    params.iter().try_fold(sqlx::query(sql), bind)
}

/// Read column `index`, converted to `kind` when known, otherwise to the
/// storage class SQLite reports.
fn decode(row: &SqliteRow, index: usize, kind: Option<ValueKind>) -> Result<Value, DataError> {
    let kind = {
        let raw = row.try_get_raw(index).map_err(SqlxErrorExt::into_data_error)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match kind {
            Some(kind) => kind,
            None => match raw.type_info().name() {
                "INTEGER" => ValueKind::Int,
                "REAL" => ValueKind::Float,
                "BOOLEAN" => ValueKind::Bool,
                _ => ValueKind::Text,
            },
        }
    };
    let value = match kind {
        ValueKind::Int => row.try_get_unchecked::<i64, _>(index).map(Value::Int),
        ValueKind::Float => row.try_get_unchecked::<f64, _>(index).map(Value::Float),
        ValueKind::Bool => row.try_get_unchecked::<bool, _>(index).map(Value::Bool),
        ValueKind::Text => row.try_get_unchecked::<String, _>(index).map(Value::Text),
    };
    value.map_err(SqlxErrorExt::into_data_error)
}

fn read_record(row: &SqliteRow, columns: &[(&'static str, ValueKind)], next: &mut usize) -> Result<Record, DataError> {
    let mut record = Record::new();
    for (column, kind) in columns {
        record.insert(*column, decode(row, *next, Some(*kind))?);
        *next += 1;
    }
    Ok(record)
}

impl SqliteConnection {
    async fn run(&mut self, rendered: &RenderedSql) -> Result<SqliteQueryResult, DataError> {
        debug!(sql = %rendered.sql, params = rendered.params.len(), "Executing statement");
        prepare(&rendered.sql, &rendered.params)?
            .execute(&mut *self.tx)
            .await
            .map_err(SqlxErrorExt::into_data_error)
    }

    async fn fetch(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqliteRow>, DataError> {
        debug!(sql = %sql, params = params.len(), "Executing select");
        prepare(sql, params)?
            .fetch_all(&mut *self.tx)
            .await
            .map_err(SqlxErrorExt::into_data_error)
    }

    /// Every row of a one-to-many collection owned by `owner`.
    async fn load_collection(&mut self, relation: &'static Relation, owner: Value) -> Result<Vec<Record>, DataError> {
        let select = Select::by_foreign_key(relation).ok_or_else(|| {
            DataError::Other(format!(
                "relation '{}' has no inverse many-to-one '{}'",
                relation.name, relation.mapped_by
            ))
        })?;
        let rendered = self.renderer.select(&select, &[owner], Window::all())?;
        let Layout::Entity { root, .. } = &rendered.layout else {
            return Err(DataError::Other(format!("collection '{}' rendered as a tuple", relation.name)));
        };
        let rows = self.fetch(&rendered.sql, &rendered.params).await?;
        rows.iter()
            .map(|row| read_record(row, root, &mut 0))
            .collect()
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn insert(&mut self, meta: &'static EntityMeta, record: &Record) -> Result<Value, DataError> {
        let rendered = self.renderer.insert_row(meta, record);
        let result = self.run(&rendered).await?;
        let id = record.get(meta.id_column());
        if id.is_null() {
            Ok(Value::Int(result.last_insert_rowid()))
        } else {
            Ok(id.clone())
        }
    }

    async fn update(&mut self, meta: &'static EntityMeta, record: &Record) -> Result<u64, DataError> {
        let rendered = self.renderer.update_row(meta, record);
        Ok(self.run(&rendered).await?.rows_affected())
    }

    async fn delete(&mut self, meta: &'static EntityMeta, id: &Value) -> Result<u64, DataError> {
        let rendered = self.renderer.delete_row(meta, id);
        Ok(self.run(&rendered).await?.rows_affected())
    }

    async fn select(&mut self, select: &Select, params: &[Value], window: Window) -> Result<Vec<Row>, DataError> {
        let rendered = self.renderer.select(select, params, window)?;
        let rows = self.fetch(&rendered.sql, &rendered.params).await?;
        match rendered.layout {
            Layout::Tuple(kinds) => rows
                .iter()
                .map(|row| {
                    kinds
                        .iter()
                        .enumerate()
                        .map(|(index, kind)| decode(row, index, *kind))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Row::Tuple)
                })
                .collect(),
            Layout::Entity {
                root,
                fetched,
                collections,
            } => {
                let mut entities = Vec::with_capacity(rows.len());
                for row in &rows {
                    let mut next = 0;
                    let mut entity = EntityRow::new(read_record(row, &root, &mut next)?);
                    for columns in &fetched {
                        let record = read_record(row, &columns.columns, &mut next)?;
                        let present = !record.get(columns.relation.target().id_column()).is_null();
                        entity
                            .fetched
                            .push((columns.relation.name, FetchedRecords::One(present.then_some(record))));
                    }
                    entities.push(entity);
                }
                for relation in collections {
                    for entity in &mut entities {
                        let owner = entity.record.get(select.root.id_column()).clone();
                        let members = self.load_collection(relation, owner).await?;
                        entity.fetched.push((relation.name, FetchedRecords::Many(members)));
                    }
                }
                Ok(entities.into_iter().map(Row::Entity).collect())
            }
        }
    }

    async fn execute(&mut self, statement: &Statement, params: &[Value]) -> Result<u64, DataError> {
        let rendered = self.renderer.statement(statement, params)?;
        Ok(self.run(&rendered).await?.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        self.tx.commit().await.map_err(SqlxErrorExt::into_data_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataError> {
        self.tx.rollback().await.map_err(SqlxErrorExt::into_data_error)
    }
}

#[cfg(test)]
mod tests {
    use super::is_in_memory;

    #[test]
    fn detects_in_memory_urls() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file.db?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://data/app.db"));
    }
}
