//! Unit of work: one backend transaction plus an identity map.

use crate::backend::{Connection, EntityRow, Row, StorageBackend, Window};
use crate::entity::{Entity, EntityMeta, FetchedRecords, Record};
use crate::error::DataError;
use crate::query::{Select, Statement};
use crate::related::{Related, RelatedMany};
use crate::value::{FromValue, Value};
use std::collections::HashMap;

type IdentityKey = (&'static str, String);

fn identity_key(meta: &'static EntityMeta, id: &Value) -> IdentityKey {
    (meta.table, id.key())
}

#[derive(Debug)]
enum Pending {
    Update { meta: &'static EntityMeta, record: Record },
    Delete { meta: &'static EntityMeta, id: Value },
}

impl Pending {
    fn key(&self) -> IdentityKey {
        match self {
            Pending::Update { meta, record } => identity_key(meta, record.get(meta.id_column())),
            Pending::Delete { meta, id } => identity_key(meta, id),
        }
    }
}

/// A transactional scope tracking entity state.
///
/// New entities are inserted as soon as they are persisted, so they get
/// their identifier immediately. Updates and removals are queued and written
/// by [`flush`](Self::flush), which also runs before every query.
///
/// The identity map holds one snapshot per `(table, id)`. A row loaded for
/// an entity that is already tracked is replaced by the snapshot; call
/// [`clear`](Self::clear) to read storage again.
///
/// ```ignore
/// let mut uow = UnitOfWork::begin(&backend).await?;
/// let mut member = Member::new("member1", 10);
/// uow.persist(&mut member).await?;
/// uow.commit().await?;
/// ```
pub struct UnitOfWork {
    conn: Box<dyn Connection>,
    identity: HashMap<IdentityKey, Record>,
    pending: Vec<Pending>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tracked", &self.identity.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl UnitOfWork {
    pub async fn begin<B: StorageBackend + ?Sized>(backend: &B) -> Result<Self, DataError> {
        let conn = backend.begin().await?;
        tracing::trace!(backend = backend.name(), "Unit of work started");
        Ok(Self {
            conn,
            identity: HashMap::new(),
            pending: Vec::new(),
        })
    }

    /// Insert a new entity, or record the changes of a known one.
    ///
    /// An entity carrying an identifier that this unit of work does not
    /// track is looked up first and inserted when storage has no such row.
    pub async fn persist<T: Entity>(&mut self, entity: &mut T) -> Result<(), DataError> {
        let meta = T::meta();
        if let Some(relation) = entity.transient_relation() {
            return Err(DataError::Other(format!(
                "{}.{relation} references an entity that was never persisted",
                meta.name
            )));
        }
        let mut record = entity.to_record();
        let Some(id) = entity.id() else {
            record.insert(meta.id_column(), Value::Null);
            let generated = self.conn.insert(meta, &record).await?;
            entity.set_id(T::Id::from_value(&generated, meta.id)?);
            tracing::trace!(entity = meta.name, id = %generated, "Persisted new entity");
            record.insert(meta.id_column(), generated.clone());
            self.identity.insert(identity_key(meta, &generated), record);
            return Ok(());
        };

        let id: Value = id.into();
        let key = identity_key(meta, &id);
        match self.identity.get(&key) {
            Some(snapshot) if *snapshot == record => return Ok(()),
            Some(_) => {}
            None => {
                if !self.exists_in_storage(meta, &id).await? {
                    self.conn.insert(meta, &record).await?;
                    tracing::trace!(entity = meta.name, %id, "Persisted entity with assigned id");
                    self.identity.insert(key, record);
                    return Ok(());
                }
            }
        }
        self.enqueue(Pending::Update {
            meta,
            record: record.clone(),
        });
        self.identity.insert(key, record);
        Ok(())
    }

    /// Load an entity by identifier, from the identity map when tracked.
    pub async fn find<T: Entity>(&mut self, id: impl Into<Value>) -> Result<Option<T>, DataError> {
        let meta = T::meta();
        let id = id.into();
        if let Some(snapshot) = self.identity.get(&identity_key(meta, &id)) {
            tracing::trace!(entity = meta.name, %id, "Identity map hit");
            return T::from_record(snapshot).map(Some);
        }
        let rows = self
            .select(&Select::by_id(meta), std::slice::from_ref(&id), Window::new(0, 1))
            .await?;
        match rows.into_iter().next() {
            Some(Row::Entity(row)) => self.materialize::<T>(row, false).map(Some),
            Some(Row::Tuple(_)) => Err(DataError::Other(format!("{} lookup returned a tuple", meta.name))),
            None => Ok(None),
        }
    }

    /// Queue the removal of a persisted entity.
    pub fn remove<T: Entity>(&mut self, entity: &T) -> Result<(), DataError> {
        let id = entity.id().ok_or_else(|| {
            DataError::Other(format!("cannot remove a {} that was never persisted", T::meta().name))
        })?;
        self.remove_id(T::meta(), id.into());
        Ok(())
    }

    pub(crate) fn remove_id(&mut self, meta: &'static EntityMeta, id: Value) {
        self.identity.remove(&identity_key(meta, &id));
        self.enqueue(Pending::Delete { meta, id });
    }

    /// Write queued updates and removals.
    pub async fn flush(&mut self) -> Result<(), DataError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for op in pending {
            match op {
                Pending::Update { meta, record } => {
                    self.conn.update(meta, &record).await?;
                }
                Pending::Delete { meta, id } => {
                    self.conn.delete(meta, &id).await?;
                }
            }
        }
        tracing::debug!(statements = count, "Flushed unit of work");
        Ok(())
    }

    /// Forget every tracked snapshot. Queued writes are kept.
    pub fn clear(&mut self) {
        tracing::trace!(tracked = self.identity.len(), "Identity map cleared");
        self.identity.clear();
    }

    pub fn contains<T: Entity>(&self, entity: &T) -> bool {
        entity
            .id()
            .is_some_and(|id| self.identity.contains_key(&identity_key(T::meta(), &id.into())))
    }

    /// Number of tracked entities.
    pub fn tracked(&self) -> usize {
        self.identity.len()
    }

    /// Load the target of a many-to-one handle.
    ///
    /// A dangling foreign key is reported as [`DataError::NotFound`].
    pub async fn resolve<'a, T: Entity>(&mut self, handle: &'a mut Related<T>) -> Result<Option<&'a T>, DataError> {
        if let Related::Unresolved(key) = &*handle {
            let key = key.clone();
            let entity = self
                .find::<T>(key.clone())
                .await?
                .ok_or_else(|| DataError::NotFound(format!("{} with id {key}", T::meta().name)))?;
            handle.set(entity);
        }
        Ok(handle.get())
    }

    /// Load the items of a one-to-many handle.
    pub async fn resolve_many<'a, T: Entity>(&mut self, handle: &'a mut RelatedMany<T>) -> Result<&'a [T], DataError> {
        if !handle.is_resolved() {
            let relation = handle.check_relation()?;
            let select = Select::by_foreign_key(relation).ok_or_else(|| {
                DataError::Other(format!("relation '{}' has no join column", relation.name))
            })?;
            let owner = handle.owner().clone();
            let items = self
                .select_entities::<T>(&select, &[owner], Window::all(), false)
                .await?;
            handle.set(items);
        }
        Ok(handle.get().unwrap_or(&[]))
    }

    pub async fn commit(mut self) -> Result<(), DataError> {
        self.flush().await?;
        self.conn.commit().await?;
        tracing::trace!("Unit of work committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DataError> {
        self.conn.rollback().await?;
        tracing::trace!(discarded = self.pending.len(), "Unit of work rolled back");
        Ok(())
    }

    // ── Used by repositories ────────────────────────────────────────────

    pub(crate) async fn select(&mut self, select: &Select, params: &[Value], window: Window) -> Result<Vec<Row>, DataError> {
        self.flush().await?;
        self.conn.select(select, params, window).await
    }

    pub(crate) async fn count(&mut self, select: &Select, params: &[Value]) -> Result<u64, DataError> {
        self.flush().await?;
        crate::backend::count(self.conn.as_mut(), select, params).await
    }

    pub(crate) async fn execute(&mut self, statement: &Statement, params: &[Value]) -> Result<u64, DataError> {
        self.flush().await?;
        self.conn.execute(statement, params).await
    }

    pub(crate) async fn select_entities<T: Entity>(
        &mut self,
        select: &Select,
        params: &[Value],
        window: Window,
        read_only: bool,
    ) -> Result<Vec<T>, DataError> {
        let rows = self.select(select, params, window).await?;
        rows.into_iter()
            .map(|row| match row {
                Row::Entity(row) => self.materialize::<T>(row, read_only),
                Row::Tuple(_) => Err(DataError::Other(format!(
                    "{} query returned columns instead of entities",
                    T::meta().name
                ))),
            })
            .collect()
    }

    /// Build an entity from a loaded row, honoring the identity map.
    pub(crate) fn materialize<T: Entity>(&mut self, row: EntityRow, read_only: bool) -> Result<T, DataError> {
        let meta = T::meta();
        let record = self.track(meta, row.record, read_only);
        let mut entity = T::from_record(&record)?;
        for (relation, fetched) in row.fetched {
            let fetched = match meta.relation(relation) {
                Some(rel) => self.track_fetched(rel.target(), fetched, read_only),
                None => fetched,
            };
            entity.attach(relation, fetched)?;
        }
        Ok(entity)
    }

    fn track(&mut self, meta: &'static EntityMeta, record: Record, read_only: bool) -> Record {
        if read_only {
            return record;
        }
        let key = identity_key(meta, record.get(meta.id_column()));
        match self.identity.get(&key) {
            Some(snapshot) => snapshot.clone(),
            None => {
                self.identity.insert(key, record.clone());
                record
            }
        }
    }

    fn track_fetched(&mut self, meta: &'static EntityMeta, fetched: FetchedRecords, read_only: bool) -> FetchedRecords {
        match fetched {
            FetchedRecords::One(record) => FetchedRecords::One(record.map(|r| self.track(meta, r, read_only))),
            FetchedRecords::Many(records) => FetchedRecords::Many(
                records
                    .into_iter()
                    .map(|r| self.track(meta, r, read_only))
                    .collect(),
            ),
        }
    }

    async fn exists_in_storage(&mut self, meta: &'static EntityMeta, id: &Value) -> Result<bool, DataError> {
        let rows = self
            .select(&Select::by_id(meta), std::slice::from_ref(id), Window::new(0, 1))
            .await?;
        Ok(!rows.is_empty())
    }

    fn enqueue(&mut self, op: Pending) {
        let key = op.key();
        self.pending.retain(|p| !(matches!(p, Pending::Update { .. }) && p.key() == key));
        self.pending.push(op);
    }
}
