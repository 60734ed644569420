/// Errors that can occur in the data layer at call time.
#[derive(Debug)]
pub enum DataError {
    /// A single-result query yielded zero rows, or an entity does not exist.
    NotFound(String),
    /// A single-result query yielded more than one row.
    NonUnique { query: String, found: usize },
    /// Call arguments do not fit the compiled query (count, type, paging).
    Binding(String),
    /// An operation failed registration; see [`RegistrationError`].
    Registration(RegistrationError),
    /// Storage backend error, passed through untouched.
    Database(Box<dyn std::error::Error + Send + Sync>),
    Other(String),
}

impl DataError {
    /// Construct a `Database` variant from any error type.
    ///
    /// Used by backends (the in-memory engine, `datarepo-data-sqlx`) to wrap
    /// driver-specific errors.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        DataError::Binding(msg.into())
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DataError::NonUnique { query, found } => {
                write!(f, "Non-unique result: '{query}' returned {found} rows, expected at most one")
            }
            DataError::Binding(msg) => write!(f, "Binding error: {msg}"),
            DataError::Registration(err) => write!(f, "{err}"),
            DataError::Database(err) => write!(f, "Database error: {err}"),
            DataError::Other(msg) => write!(f, "Data error: {msg}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Database(err) => Some(err.as_ref()),
            DataError::Registration(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistrationError> for DataError {
    fn from(err: RegistrationError) -> Self {
        DataError::Registration(err)
    }
}

/// A repository operation that could not be compiled.
///
/// Raised while building a repository, never while calling it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationError {
    pub entity: String,
    pub method: String,
    pub kind: RegistrationErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationErrorKind {
    /// The method name does not follow the derivation grammar.
    MalformedMethodName(String),
    UnknownAttribute { entity: String, attribute: String },
    UnknownRelation { entity: String, relation: String },
    UnknownEntity(String),
    UnknownAlias(String),
    /// A placeholder has no matching declared parameter.
    UnboundPlaceholder(String),
    /// Fetch joins and the entity graph name different relations.
    ConflictingFetch {
        fetch_joins: Vec<String>,
        entity_graph: Vec<String>,
    },
    Syntax { position: usize, message: String },
    /// The declaration is inconsistent with the compiled statement.
    InvalidDeclaration(String),
    /// Entity metadata is unusable (bad identifiers, missing targets).
    InvalidMetadata(String),
}

impl RegistrationError {
    pub fn new(entity: impl Into<String>, method: impl Into<String>, kind: RegistrationErrorKind) -> Self {
        Self {
            entity: entity.into(),
            method: method.into(),
            kind,
        }
    }
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Registration of {}::{} failed: {}", self.entity, self.method, self.kind)
    }
}

impl std::fmt::Display for RegistrationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationErrorKind::MalformedMethodName(msg) => write!(f, "malformed method name: {msg}"),
            RegistrationErrorKind::UnknownAttribute { entity, attribute } => {
                write!(f, "no attribute '{attribute}' on entity {entity}")
            }
            RegistrationErrorKind::UnknownRelation { entity, relation } => {
                write!(f, "no relation '{relation}' on entity {entity}")
            }
            RegistrationErrorKind::UnknownEntity(name) => write!(f, "unknown entity {name}"),
            RegistrationErrorKind::UnknownAlias(alias) => write!(f, "unknown alias '{alias}'"),
            RegistrationErrorKind::UnboundPlaceholder(name) => {
                write!(f, "placeholder '{name}' has no matching parameter")
            }
            RegistrationErrorKind::ConflictingFetch {
                fetch_joins,
                entity_graph,
            } => write!(
                f,
                "fetch joins [{}] conflict with entity graph [{}]",
                fetch_joins.join(", "),
                entity_graph.join(", ")
            ),
            RegistrationErrorKind::Syntax { position, message } => {
                write!(f, "syntax error at {position}: {message}")
            }
            RegistrationErrorKind::InvalidDeclaration(msg) => write!(f, "{msg}"),
            RegistrationErrorKind::InvalidMetadata(msg) => write!(f, "invalid metadata: {msg}"),
        }
    }
}

impl std::error::Error for RegistrationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_non_unique() {
        let err = DataError::NonUnique {
            query: "findMembers".into(),
            found: 2,
        };
        assert_eq!(
            err.to_string(),
            "Non-unique result: 'findMembers' returned 2 rows, expected at most one"
        );
    }

    #[test]
    fn registration_error_is_source() {
        let reg = RegistrationError::new(
            "Member",
            "findByNickname",
            RegistrationErrorKind::UnknownAttribute {
                entity: "Member".into(),
                attribute: "nickname".into(),
            },
        );
        let err: DataError = reg.clone().into();
        assert_eq!(
            err.to_string(),
            "Registration of Member::findByNickname failed: no attribute 'nickname' on entity Member"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn database_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = DataError::database(io);
        assert_eq!(err.to_string(), "Database error: disk full");
        assert!(err.source().is_some());
    }
}
