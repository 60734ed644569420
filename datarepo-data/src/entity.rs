use crate::error::DataError;
use crate::value::{FromValue, Value, ValueKind};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A mapped scalar attribute of an entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attribute {
    /// Field name used in method names and query paths (`username`).
    pub name: &'static str,
    pub column: &'static str,
    pub kind: ValueKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    ManyToOne,
    OneToMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchType {
    Lazy,
    Eager,
}

/// A relationship from one entity to another.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub name: &'static str,
    pub kind: RelationKind,
    pub target: fn() -> &'static EntityMeta,
    /// Foreign-key column on the owning table (many-to-one only).
    pub column: &'static str,
    /// Name of the inverse many-to-one relation on the target (one-to-many only).
    pub mapped_by: &'static str,
    pub fetch: FetchType,
}

impl Relation {
    pub fn target(&self) -> &'static EntityMeta {
        (self.target)()
    }

    /// The foreign-key column joining the two tables and the side it lives on.
    ///
    /// For many-to-one it is `self.column` on the owner; for one-to-many it is
    /// the inverse relation's column on the target.
    pub fn join_column(&self) -> Option<&'static str> {
        match self.kind {
            RelationKind::ManyToOne => Some(self.column),
            RelationKind::OneToMany => self
                .target()
                .relation(self.mapped_by)
                .filter(|inverse| inverse.kind == RelationKind::ManyToOne)
                .map(|inverse| inverse.column),
        }
    }
}

/// Static description of an entity type.
///
/// Produced by `#[derive(Entity)]` or written by hand as a `static`.
#[derive(Debug)]
pub struct EntityMeta {
    /// Entity name used in explicit queries (`Member`).
    pub name: &'static str,
    pub table: &'static str,
    /// Name of the identifier attribute; it must appear in `attributes`.
    pub id: &'static str,
    pub attributes: &'static [Attribute],
    pub relations: &'static [Relation],
}

impl EntityMeta {
    pub fn attribute(&self, name: &str) -> Option<&'static Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&'static Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn id_attribute(&self) -> Option<&'static Attribute> {
        self.attribute(self.id)
    }

    pub fn id_column(&self) -> &'static str {
        self.id_attribute().map(|a| a.column).unwrap_or(self.id)
    }

    /// Every stored column: attributes, then many-to-one foreign keys.
    pub fn columns(&self) -> Vec<(&'static str, ValueKind)> {
        let mut out: Vec<(&'static str, ValueKind)> =
            self.attributes.iter().map(|a| (a.column, a.kind)).collect();
        for rel in self.relations {
            if rel.kind == RelationKind::ManyToOne {
                let kind = rel
                    .target()
                    .id_attribute()
                    .map(|a| a.kind)
                    .unwrap_or(ValueKind::Int);
                out.push((rel.column, kind));
            }
        }
        out
    }

    pub fn same_as(&self, other: &EntityMeta) -> bool {
        std::ptr::eq(self, other) || (self.name == other.name && self.table == other.table)
    }
}

/// A stored row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Value>,
}

static NULL: Value = Value::Null;

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value of `column`, `Null` when absent.
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T, DataError> {
        T::from_value(self.get(column), column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Related rows loaded in the same statement as their owner.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedRecords {
    One(Option<Record>),
    Many(Vec<Record>),
}

/// Trait representing a mapped entity.
///
/// Implemented by `#[derive(Entity)]`, or manually:
///
/// ```ignore
/// impl Entity for Team {
///     type Id = i64;
///     fn meta() -> &'static EntityMeta { &TEAM_META }
///     fn id(&self) -> Option<i64> { self.id }
///     fn set_id(&mut self, id: i64) { self.id = Some(id) }
///     fn to_record(&self) -> Record { Record::new().with("id", self.id).with("name", &self.name) }
///     fn from_record(r: &Record) -> Result<Self, DataError> { Ok(Team { id: r.get_as("id")?, name: r.get_as("name")? }) }
/// }
/// ```
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Debug + PartialEq + Send + Sync + Into<Value> + FromValue + 'static;

    fn meta() -> &'static EntityMeta;
    fn id(&self) -> Option<Self::Id>;
    fn set_id(&mut self, id: Self::Id);
    fn to_record(&self) -> Record;
    fn from_record(record: &Record) -> Result<Self, DataError>;

    /// Attach related rows loaded by a fetch join or entity graph.
    fn attach(&mut self, relation: &str, fetched: FetchedRecords) -> Result<(), DataError> {
        let _ = fetched;
        Err(DataError::Other(format!(
            "{} has no relation '{relation}'",
            Self::meta().name
        )))
    }

    /// A many-to-one relation whose target has no identifier yet.
    fn transient_relation(&self) -> Option<&'static str> {
        None
    }

    fn id_value(&self) -> Value {
        self.id().map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::Entity;
    use crate::testing::{Member, Team};

    #[test]
    fn columns_include_foreign_keys() {
        let cols: Vec<&str> = Member::meta().columns().into_iter().map(|(c, _)| c).collect();
        assert_eq!(cols, vec!["id", "username", "age", "team_id"]);
    }

    #[test]
    fn one_to_many_join_column_comes_from_inverse() {
        let members = Team::meta().relation("members").unwrap();
        assert_eq!(members.join_column(), Some("team_id"));
        let team = Member::meta().relation("team").unwrap();
        assert_eq!(team.join_column(), Some("team_id"));
    }

    #[test]
    fn record_defaults_to_null() {
        let record = super::Record::new().with("username", "AAA");
        assert!(record.get("age").is_null());
        assert_eq!(record.get_as::<String>("username").unwrap(), "AAA");
    }
}
