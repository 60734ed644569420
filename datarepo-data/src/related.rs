//! Explicit relationship handles.
//!
//! A relation field never loads anything on access. It is either resolved
//! (the related entity is in memory) or unresolved (only the key is known),
//! and an unresolved handle is loaded through
//! [`UnitOfWork::resolve`](crate::UnitOfWork::resolve) /
//! [`UnitOfWork::resolve_many`](crate::UnitOfWork::resolve_many), or up front
//! by a fetch join or entity graph.

use crate::entity::{Entity, FetchedRecords, Relation, RelationKind};
use crate::error::DataError;
use crate::value::Value;

/// Many-to-one handle.
#[derive(Debug, Clone)]
pub enum Related<T: Entity> {
    /// No related entity (null foreign key).
    Empty,
    /// Foreign key known, entity not loaded.
    Unresolved(Value),
    Resolved(Box<T>),
}

impl<T: Entity> Default for Related<T> {
    fn default() -> Self {
        Related::Empty
    }
}

impl<T: Entity> Related<T> {
    pub fn new(entity: T) -> Self {
        Related::Resolved(Box::new(entity))
    }

    /// Build from a stored foreign-key value.
    pub fn from_key(key: Value) -> Self {
        if key.is_null() {
            Related::Empty
        } else {
            Related::Unresolved(key)
        }
    }

    /// The foreign-key value to store. `Null` for an empty handle and for a
    /// resolved entity that was never persisted.
    pub fn key(&self) -> Value {
        match self {
            Related::Empty => Value::Null,
            Related::Unresolved(key) => key.clone(),
            Related::Resolved(entity) => entity.id_value(),
        }
    }

    /// Whether the handle points at an entity that has no identifier yet.
    pub fn is_transient(&self) -> bool {
        matches!(self, Related::Resolved(entity) if entity.id().is_none())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Related::Empty)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Related::Resolved(_))
    }

    /// The loaded entity, if resolved.
    pub fn get(&self) -> Option<&T> {
        match self {
            Related::Resolved(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Related::Resolved(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn set(&mut self, entity: T) {
        *self = Related::Resolved(Box::new(entity));
    }

    pub fn clear(&mut self) {
        *self = Related::Empty;
    }

    /// Attach a row fetched alongside the owner.
    pub fn attach(&mut self, fetched: FetchedRecords) -> Result<(), DataError> {
        match fetched {
            FetchedRecords::One(Some(record)) => {
                *self = Related::Resolved(Box::new(T::from_record(&record)?));
                Ok(())
            }
            FetchedRecords::One(None) => {
                *self = Related::Empty;
                Ok(())
            }
            FetchedRecords::Many(_) => Err(DataError::Other(format!(
                "many-to-one relation to {} received a collection",
                T::meta().name
            ))),
        }
    }
}

/// Handles compare by identifier, never by loaded state.
impl<T: Entity> PartialEq for Related<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

/// One-to-many handle.
#[derive(Debug, Clone)]
pub struct RelatedMany<T: Entity> {
    owner: Value,
    relation: Option<&'static Relation>,
    loaded: Option<Vec<T>>,
}

impl<T: Entity> Default for RelatedMany<T> {
    fn default() -> Self {
        Self {
            owner: Value::Null,
            relation: None,
            loaded: None,
        }
    }
}

impl<T: Entity> RelatedMany<T> {
    /// An unresolved collection owned by the row with identifier `owner`.
    pub fn unresolved(owner: Value, relation: &'static Relation) -> Self {
        Self {
            owner,
            relation: Some(relation),
            loaded: None,
        }
    }

    pub fn owner(&self) -> &Value {
        &self.owner
    }

    pub fn relation(&self) -> Option<&'static Relation> {
        self.relation
    }

    pub fn is_resolved(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn get(&self) -> Option<&[T]> {
        self.loaded.as_deref()
    }

    pub fn set(&mut self, items: Vec<T>) {
        self.loaded = Some(items);
    }

    pub fn attach(&mut self, fetched: FetchedRecords) -> Result<(), DataError> {
        match fetched {
            FetchedRecords::Many(records) => {
                let items = records
                    .iter()
                    .map(T::from_record)
                    .collect::<Result<Vec<_>, _>>()?;
                self.loaded = Some(items);
                Ok(())
            }
            FetchedRecords::One(_) => Err(DataError::Other(format!(
                "one-to-many relation to {} received a single row",
                T::meta().name
            ))),
        }
    }

    pub(crate) fn check_relation(&self) -> Result<&'static Relation, DataError> {
        match self.relation {
            Some(rel) if rel.kind == RelationKind::OneToMany => Ok(rel),
            _ => Err(DataError::Other(format!(
                "collection of {} is not bound to an owner",
                T::meta().name
            ))),
        }
    }
}

/// Collections compare by the identifiers they hold once loaded.
impl<T: Entity> PartialEq for RelatedMany<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.loaded, &other.loaded) {
            (Some(a), Some(b)) => a.iter().map(Entity::id_value).eq(b.iter().map(Entity::id_value)),
            _ => self.owner == other.owner,
        }
    }
}

/// Static relation information for relation field types.
///
/// Used by `#[derive(Entity)]` to fill [`Relation`] metadata.
pub trait RelationField {
    type Target: Entity;
    const KIND: RelationKind;
}

impl<T: Entity> RelationField for Related<T> {
    type Target = T;
    const KIND: RelationKind = RelationKind::ManyToOne;
}

impl<T: Entity> RelationField for RelatedMany<T> {
    type Target = T;
    const KIND: RelationKind = RelationKind::OneToMany;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::testing::Team;

    #[test]
    fn empty_key_is_null() {
        let r: Related<Team> = Related::from_key(Value::Null);
        assert!(r.is_empty());
        assert!(r.key().is_null());
    }

    #[test]
    fn equality_is_identifier_based() {
        let resolved = Related::new(Team::named(Some(1), "teamA"));
        let unresolved: Related<Team> = Related::from_key(Value::Int(1));
        assert_eq!(resolved, unresolved);
        assert!(!unresolved.is_resolved());
    }

    #[test]
    fn transient_entity_is_detected() {
        let r = Related::new(Team::named(None, "teamA"));
        assert!(r.is_transient());
    }

    #[test]
    fn attach_single_record() {
        let mut r: Related<Team> = Related::from_key(Value::Int(7));
        let record = Record::new().with("id", 7).with("name", "teamB");
        r.attach(FetchedRecords::One(Some(record))).unwrap();
        assert_eq!(r.get().unwrap().name, "teamB");
    }
}
