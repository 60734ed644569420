use crate::entity::{Entity, EntityMeta, RelationKind};
use crate::error::{RegistrationError, RegistrationErrorKind};
use crate::sql::is_valid_identifier;
use std::collections::BTreeMap;

/// Registry of entity metadata, looked up by entity name.
///
/// Explicit queries name entities (`from Member m`); the catalog resolves
/// those names. Registering an entity also registers every entity reachable
/// through its relations.
#[derive(Debug, Default, Clone)]
pub struct EntityCatalog {
    entities: BTreeMap<&'static str, &'static EntityMeta>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `T` (and the entities it relates to).
    pub fn register<T: Entity>(&mut self) -> Result<&mut Self, RegistrationError> {
        self.register_meta(T::meta())?;
        Ok(self)
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with<T: Entity>(mut self) -> Result<Self, RegistrationError> {
        self.register_meta(T::meta())?;
        Ok(self)
    }

    pub fn register_meta(&mut self, meta: &'static EntityMeta) -> Result<(), RegistrationError> {
        let mut pending = vec![meta];
        while let Some(meta) = pending.pop() {
            if let Some(existing) = self.entities.get(meta.name) {
                if existing.same_as(meta) {
                    continue;
                }
                return Err(invalid(
                    meta,
                    format!("entity name '{}' is already registered for table {}", meta.name, existing.table),
                ));
            }
            validate(meta)?;
            self.entities.insert(meta.name, meta);
            tracing::debug!(entity = meta.name, table = meta.table, "Registered entity");
            pending.extend(meta.relations.iter().map(|r| r.target()));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&'static EntityMeta> {
        self.entities.get(name).copied()
    }

    pub fn contains(&self, meta: &EntityMeta) -> bool {
        self.entities.get(meta.name).is_some_and(|m| m.same_as(meta))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static EntityMeta> + '_ {
        self.entities.values().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn invalid(meta: &EntityMeta, message: String) -> RegistrationError {
    RegistrationError::new(meta.name, "<entity>", RegistrationErrorKind::InvalidMetadata(message))
}

fn validate(meta: &'static EntityMeta) -> Result<(), RegistrationError> {
    if !is_valid_identifier(meta.table) {
        return Err(invalid(meta, format!("invalid table name '{}'", meta.table)));
    }
    if meta.id_attribute().is_none() {
        return Err(invalid(meta, format!("id attribute '{}' is not mapped", meta.id)));
    }
    let mut columns: Vec<&str> = Vec::new();
    for (column, _) in meta.columns() {
        if !is_valid_identifier(column) {
            return Err(invalid(meta, format!("invalid column name '{column}'")));
        }
        if columns.contains(&column) {
            return Err(invalid(meta, format!("column '{column}' is mapped twice")));
        }
        columns.push(column);
    }
    for relation in meta.relations {
        if meta.attribute(relation.name).is_some() {
            return Err(invalid(
                meta,
                format!("'{}' is both an attribute and a relation", relation.name),
            ));
        }
        if relation.kind == RelationKind::OneToMany {
            let inverse = relation
                .target()
                .relation(relation.mapped_by)
                .filter(|inv| inv.kind == RelationKind::ManyToOne && inv.target().same_as(meta));
            if inverse.is_none() {
                return Err(invalid(
                    meta,
                    format!(
                        "'{}' is mapped by '{}', which is not a many-to-one relation of {} back to {}",
                        relation.name,
                        relation.mapped_by,
                        relation.target().name,
                        meta.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Attribute, Relation};
    use crate::testing::{Member, Team};
    use crate::value::ValueKind;

    #[test]
    fn registering_follows_relations() {
        let mut catalog = EntityCatalog::new();
        catalog.register::<Member>().unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("Team").is_some());
        assert!(catalog.contains(Team::meta()));
    }

    #[test]
    fn registering_twice_is_idempotent() {
        let catalog = EntityCatalog::new().with::<Member>().unwrap().with::<Team>().unwrap();
        assert_eq!(catalog.len(), 2);
    }

    static BAD_TABLE: EntityMeta = EntityMeta {
        name: "Bad",
        table: "bad;drop",
        id: "id",
        attributes: &[Attribute {
            name: "id",
            column: "id",
            kind: ValueKind::Int,
            nullable: false,
        }],
        relations: &[],
    };

    static NO_ID: EntityMeta = EntityMeta {
        name: "NoId",
        table: "no_id",
        id: "id",
        attributes: &[],
        relations: &[],
    };

    fn team_meta() -> &'static EntityMeta {
        Team::meta()
    }

    static BROKEN_INVERSE: EntityMeta = EntityMeta {
        name: "Club",
        table: "club",
        id: "id",
        attributes: &[Attribute {
            name: "id",
            column: "id",
            kind: ValueKind::Int,
            nullable: false,
        }],
        relations: &[Relation {
            name: "teams",
            kind: RelationKind::OneToMany,
            target: team_meta,
            column: "",
            mapped_by: "club",
            fetch: crate::entity::FetchType::Lazy,
        }],
    };

    #[test]
    fn invalid_metadata_is_rejected() {
        let mut catalog = EntityCatalog::new();
        for meta in [&BAD_TABLE, &NO_ID, &BROKEN_INVERSE] {
            let err = catalog.register_meta(meta).unwrap_err();
            assert!(matches!(err.kind, RegistrationErrorKind::InvalidMetadata(_)), "{err}");
        }
    }
}
