//! Declarations of repository operations.
//!
//! A [`Method`] only records what was declared; it is validated and compiled
//! when the repository is built.

use crate::shape::Projection;

/// The declared result shape of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returns {
    /// Exactly one result.
    One,
    /// Zero or one result.
    Optional,
    List,
    /// A window plus a count query; needs a `Pageable`.
    Page,
    /// A window plus one probe row; needs a `Pageable`.
    Slice,
    Count,
    Exists,
    /// Affected-row count of an update or delete.
    Modifying,
}

/// Marks an operation as a bulk update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifying {
    /// Flush pending writes before the statement runs.
    pub flush_automatically: bool,
    /// Clear the identity map after the statement ran.
    pub clear_automatically: bool,
}

impl Modifying {
    pub const fn new() -> Self {
        Self {
            flush_automatically: false,
            clear_automatically: false,
        }
    }

    /// `clear_automatically = true`.
    pub const fn clearing() -> Self {
        Self {
            flush_automatically: false,
            clear_automatically: true,
        }
    }

    pub const fn flush_automatically(mut self, flush: bool) -> Self {
        self.flush_automatically = flush;
        self
    }

    pub const fn clear_automatically(mut self, clear: bool) -> Self {
        self.clear_automatically = clear;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Source {
    Derived,
    Query(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProjectionShape {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

/// One declared repository operation.
///
/// ```ignore
/// Method::derived("findByUsernameAndAgeGreaterThan");
/// Method::query("findUser", "select m from Member m where m.username = :username and m.age = :age")
///     .params(["username", "age"])
///     .returns(Returns::One);
/// Method::query("bulkAgePlus", "update Member m set m.age = m.age + 1 where m.age >= :age")
///     .params(["age"])
///     .modifying(Modifying::clearing());
/// ```
#[derive(Debug, Clone)]
pub struct Method {
    pub(crate) name: String,
    pub(crate) source: Source,
    pub(crate) params: Vec<String>,
    pub(crate) count_query: Option<String>,
    pub(crate) returns: Option<Returns>,
    pub(crate) modifying: Option<Modifying>,
    pub(crate) entity_graph: Vec<String>,
    pub(crate) projection: Option<ProjectionShape>,
    pub(crate) read_only: bool,
}

impl Method {
    fn new(name: &str, source: Source) -> Self {
        Self {
            name: name.to_string(),
            source,
            params: Vec::new(),
            count_query: None,
            returns: None,
            modifying: None,
            entity_graph: Vec::new(),
            projection: None,
            read_only: false,
        }
    }

    /// A query derived from the method name.
    pub fn derived(name: &str) -> Self {
        Self::new(name, Source::Derived)
    }

    /// An explicit query.
    pub fn query(name: &str, text: &str) -> Self {
        Self::new(name, Source::Query(text.to_string()))
    }

    /// Names of the call arguments, in order, for named placeholders.
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn returns(mut self, returns: Returns) -> Self {
        self.returns = Some(returns);
        self
    }

    /// Explicit count query for a `Page` operation.
    pub fn count_query(mut self, text: &str) -> Self {
        self.count_query = Some(text.to_string());
        self
    }

    pub fn modifying(mut self, modifying: Modifying) -> Self {
        self.modifying = Some(modifying);
        self
    }

    /// Relations to load together with the selected entities.
    pub fn entity_graph<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_graph = relations.into_iter().map(Into::into).collect();
        self
    }

    /// Shape rows as `D` instead of the entity.
    pub fn projection<D: Projection>(mut self) -> Self {
        self.projection = Some(ProjectionShape {
            name: D::NAME,
            fields: D::FIELDS,
        });
        self
    }

    /// Results bypass the identity map: they are neither taken from it nor
    /// added to it.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
