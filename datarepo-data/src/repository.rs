//! Repository registration and result shaping.

use crate::args::Args;
use crate::backend::{Row, Window};
use crate::catalog::EntityCatalog;
use crate::entity::Entity;
use crate::error::{DataError, RegistrationError, RegistrationErrorKind};
use crate::method::{Method, Modifying, ProjectionShape, Returns, Source};
use crate::page::{Page, Pageable, Slice, Sort};
use crate::query::bind::bind;
use crate::query::derive::{self, Subject};
use crate::query::{
    attribute_column, explicit, Compiled, Expr, Join, JoinKind, OrderItem, Select, Selection,
    Statement,
};
use crate::shape::{self, projection_name_matches, Projection};
use crate::uow::UnitOfWork;
use crate::value::FromValue;
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Upper bound applied to requested page sizes unless configured otherwise.
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 2000;

const FIND_ALL: &str = "findAll";

/// Highest row position a window may reach; backends address rows as `i64`.
const MAX_ROW: u64 = i64::MAX as u64;

/// Generic async CRUD operations available on every repository.
///
/// Uses RPITIT (return-position `impl Trait` in traits), no `async-trait`.
pub trait CrudRepository<T: Entity>: Send + Sync {
    /// Persist a new entity or record the changes of a known one.
    fn save(&self, uow: &mut UnitOfWork, entity: T) -> impl Future<Output = Result<T, DataError>> + Send;
    fn save_all(&self, uow: &mut UnitOfWork, entities: Vec<T>) -> impl Future<Output = Result<Vec<T>, DataError>> + Send;
    fn find_by_id(&self, uow: &mut UnitOfWork, id: T::Id) -> impl Future<Output = Result<Option<T>, DataError>> + Send;
    fn exists_by_id(&self, uow: &mut UnitOfWork, id: T::Id) -> impl Future<Output = Result<bool, DataError>> + Send;
    fn find_all(&self, uow: &mut UnitOfWork) -> impl Future<Output = Result<Vec<T>, DataError>> + Send;
    fn find_all_sorted(&self, uow: &mut UnitOfWork, sort: &Sort) -> impl Future<Output = Result<Vec<T>, DataError>> + Send;
    fn find_all_paged(&self, uow: &mut UnitOfWork, pageable: &Pageable) -> impl Future<Output = Result<Page<T>, DataError>> + Send;
    fn count(&self, uow: &mut UnitOfWork) -> impl Future<Output = Result<u64, DataError>> + Send;
    fn delete(&self, uow: &mut UnitOfWork, entity: &T) -> impl Future<Output = Result<(), DataError>> + Send;
    /// Returns whether a row with `id` existed.
    fn delete_by_id(&self, uow: &mut UnitOfWork, id: T::Id) -> impl Future<Output = Result<bool, DataError>> + Send;
    /// Load and remove every entity; returns how many were removed.
    fn delete_all(&self, uow: &mut UnitOfWork) -> impl Future<Output = Result<u64, DataError>> + Send;
}

/// What running an operation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Select,
    /// Explicit update or delete.
    Bulk,
    /// `deleteBy...`: load the matches, remove each one.
    DerivedDelete,
}

/// A compiled, validated operation.
#[derive(Debug, Clone)]
struct Operation {
    name: String,
    action: Action,
    returns: Returns,
    compiled: Compiled,
    /// Row count of the same select, for pages.
    count: Option<Compiled>,
    modifying: Modifying,
    read_only: bool,
    projection: Option<ProjectionShape>,
}

impl Operation {
    fn select(&self) -> Result<&Select, DataError> {
        match &self.compiled.statement {
            Statement::Select(select) => Ok(select),
            _ => Err(DataError::binding(format!("{} is not a query", self.name))),
        }
    }
}

/// Declared operations of one entity's repository.
///
/// ```ignore
/// let members = RepositoryDefinition::<Member>::new()
///     .method(Method::derived("findByUsernameAndAgeGreaterThan"))
///     .method(Method::query("findUsernameList", "select m.username from Member m"))
///     .build(&catalog)?;
/// ```
pub struct RepositoryDefinition<T: Entity> {
    methods: Vec<Method>,
    max_page_size: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for RepositoryDefinition<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> RepositoryDefinition<T> {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            _marker: PhantomData,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn max_page_size(mut self, size: u64) -> Self {
        self.max_page_size = size.max(1);
        self
    }

    /// Validate and compile every declared operation.
    ///
    /// Fails on the first operation that does not compile; nothing is
    /// compiled again at call time.
    pub fn build(self, catalog: &EntityCatalog) -> Result<EntityRepository<T>, RegistrationError> {
        let meta = T::meta();
        if !catalog.contains(meta) {
            return Err(RegistrationError::new(
                meta.name,
                "<repository>",
                RegistrationErrorKind::UnknownEntity(meta.name.to_string()),
            ));
        }
        let mut operations = HashMap::with_capacity(self.methods.len() + 1);
        for method in &self.methods {
            let key = derive::normalize(&method.name);
            let fail = |kind| RegistrationError::new(meta.name, method.name.as_str(), kind);
            if operations.contains_key(&key) {
                return Err(fail(RegistrationErrorKind::InvalidDeclaration(format!(
                    "'{}' is declared twice",
                    method.name
                ))));
            }
            let operation = compile_method::<T>(method, catalog).map_err(fail)?;
            tracing::debug!(
                entity = meta.name,
                method = %method.name,
                shape = ?operation.returns,
                "Compiled repository operation"
            );
            operations.insert(key, operation);
        }
        if !operations.contains_key(FIND_ALL) {
            let operation = compile_method::<T>(&Method::derived(FIND_ALL), catalog)
                .map_err(|kind| RegistrationError::new(meta.name, FIND_ALL, kind))?;
            operations.insert(FIND_ALL.to_string(), operation);
        }
        tracing::info!(
            entity = meta.name,
            operations = self.methods.len(),
            "Repository registered"
        );
        Ok(EntityRepository {
            operations: Arc::new(operations),
            max_page_size: self.max_page_size,
            _marker: PhantomData,
        })
    }
}

fn invalid(message: impl Into<String>) -> RegistrationErrorKind {
    RegistrationErrorKind::InvalidDeclaration(message.into())
}

fn compile_method<T: Entity>(method: &Method, catalog: &EntityCatalog) -> Result<Operation, RegistrationErrorKind> {
    let meta = T::meta();
    let (subject, mut compiled) = match &method.source {
        Source::Derived => {
            if !method.params.is_empty() {
                return Err(invalid("parameter names only apply to explicit queries"));
            }
            if method.count_query.is_some() {
                return Err(invalid("count queries only apply to explicit queries"));
            }
            let derived = derive::compile(&method.name, meta)?;
            (Some(derived.subject), derived.compiled)
        }
        Source::Query(text) => (None, explicit::compile(text, catalog, &method.params)?),
    };

    let (action, returns) = shape_of(method, subject, &compiled.statement)?;
    if let Statement::Select(select) = &mut compiled.statement {
        if matches!(select.selection, Selection::Entity) && !select.root.same_as(meta) {
            return Err(invalid(format!(
                "query selects {} entities in a {} repository",
                select.root.name, meta.name
            )));
        }
        apply_projection(select, method.projection, subject.is_some())?;
        apply_entity_graph(select, &method.entity_graph)?;
    } else if !method.entity_graph.is_empty() || method.projection.is_some() {
        return Err(invalid("bulk statements take no entity graph or projection"));
    }

    let count = match (&compiled.statement, &method.count_query) {
        (Statement::Select(_), Some(_)) if returns != Returns::Page => {
            return Err(invalid("a count query needs a Page result"));
        }
        (Statement::Select(_), Some(text)) => {
            let count = explicit::compile(text, catalog, &method.params)?;
            match &count.statement {
                Statement::Select(s) if matches!(s.selection, Selection::Count { .. }) => Some(count),
                _ => return Err(invalid("the count query must select a count")),
            }
        }
        (Statement::Select(select), None) if action == Action::Select => Some(Compiled {
            statement: Statement::Select(select.to_count()),
            params: compiled.params.clone(),
            arity: compiled.arity,
        }),
        _ => None,
    };

    Ok(Operation {
        name: method.name.clone(),
        action,
        returns,
        compiled,
        count,
        modifying: method.modifying.unwrap_or_default(),
        read_only: method.read_only,
        projection: method.projection,
    })
}

/// Reconcile the declared shape with what the statement can produce.
fn shape_of(method: &Method, subject: Option<Subject>, statement: &Statement) -> Result<(Action, Returns), RegistrationErrorKind> {
    let declared = method.returns;
    let mismatch = |forced: &str| {
        invalid(format!(
            "declared {:?} result, but the operation {forced}",
            declared.unwrap_or(Returns::List)
        ))
    };
    let select = match statement {
        Statement::Update(_) | Statement::Delete(_) => {
            if method.modifying.is_none() {
                return Err(invalid("update and delete statements must be marked modifying"));
            }
            return match declared {
                None | Some(Returns::Modifying) => Ok((Action::Bulk, Returns::Modifying)),
                Some(_) => Err(mismatch("is a bulk statement")),
            };
        }
        Statement::Select(select) => select,
    };

    match subject {
        Some(Subject::Delete) => {
            return match declared {
                None | Some(Returns::Modifying) => Ok((Action::DerivedDelete, Returns::Modifying)),
                Some(_) => Err(mismatch("deletes")),
            };
        }
        _ if method.modifying.is_some() => return Err(invalid("a select cannot be marked modifying")),
        Some(Subject::Count) => {
            return match declared {
                None | Some(Returns::Count) => Ok((Action::Select, Returns::Count)),
                Some(_) => Err(mismatch("counts")),
            };
        }
        Some(Subject::Exists) => {
            return match declared {
                None | Some(Returns::Exists) => Ok((Action::Select, Returns::Exists)),
                Some(_) => Err(mismatch("checks existence")),
            };
        }
        Some(Subject::Find) | None => {}
    }

    let is_count = matches!(select.selection, Selection::Count { .. });
    let returns = match declared {
        None if is_count => Returns::Count,
        None => Returns::List,
        Some(Returns::Modifying) => return Err(mismatch("is a select")),
        Some(Returns::Count) if !is_count => return Err(mismatch("does not select a count")),
        Some(Returns::Page | Returns::Slice) if is_count => return Err(mismatch("selects a count")),
        Some(returns) => returns,
    };
    if method.read_only && !matches!(select.selection, Selection::Entity) {
        return Err(invalid("read-only applies to entity queries"));
    }
    Ok((Action::Select, returns))
}

fn apply_projection(select: &mut Select, projection: Option<ProjectionShape>, derived: bool) -> Result<(), RegistrationErrorKind> {
    match (&select.selection, projection) {
        (Selection::Constructor { type_name, .. }, None) => Err(invalid(format!(
            "constructor expression 'new {type_name}' needs a declared projection"
        ))),
        (_, None) => Ok(()),
        (Selection::Entity, Some(shape)) if derived => {
            let columns = shape
                .fields
                .iter()
                .map(|field| {
                    attribute_column(select.root, &select.alias, field)
                        .map(Expr::Column)
                        .ok_or_else(|| RegistrationErrorKind::UnknownAttribute {
                            entity: select.root.name.to_string(),
                            attribute: (*field).to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            select.selection = Selection::Columns(columns);
            Ok(())
        }
        (Selection::Constructor { type_name, args }, Some(shape)) => {
            if !projection_name_matches(type_name, shape.name) {
                return Err(invalid(format!(
                    "constructor names {type_name}, declared projection is {}",
                    shape.name
                )));
            }
            if args.len() != shape.fields.len() {
                return Err(invalid(format!(
                    "constructor passes {} values, {} has {} fields",
                    args.len(),
                    shape.name,
                    shape.fields.len()
                )));
            }
            Ok(())
        }
        (Selection::Columns(exprs), Some(shape)) if exprs.len() == shape.fields.len() => Ok(()),
        (_, Some(shape)) => Err(invalid(format!(
            "the query does not select the {} fields of {}",
            shape.fields.len(),
            shape.name
        ))),
    }
}

/// Turn entity-graph names into fetch joins, or check them against the
/// fetch joins already written in the query.
fn apply_entity_graph(select: &mut Select, graph: &[String]) -> Result<(), RegistrationErrorKind> {
    if graph.is_empty() {
        return Ok(());
    }
    if !matches!(select.selection, Selection::Entity) {
        return Err(invalid("entity graphs apply to entity queries"));
    }
    let mut relations = Vec::with_capacity(graph.len());
    for name in graph {
        let relation = select
            .root
            .relation(name)
            .ok_or_else(|| RegistrationErrorKind::UnknownRelation {
                entity: select.root.name.to_string(),
                relation: name.clone(),
            })?;
        relations.push(relation);
    }

    let mut fetched: Vec<String> = select.fetch_joins().map(|j| j.relation.name.to_string()).collect();
    if !fetched.is_empty() {
        let mut named: Vec<String> = graph.to_vec();
        named.sort();
        named.dedup();
        fetched.sort();
        fetched.dedup();
        if named != fetched {
            return Err(RegistrationErrorKind::ConflictingFetch {
                fetch_joins: fetched,
                entity_graph: named,
            });
        }
        return Ok(());
    }

    for relation in relations {
        if select.joins.iter().any(|j| j.fetch && j.relation.name == relation.name) {
            continue;
        }
        select.joins.push(Join {
            kind: JoinKind::Left,
            parent: select.alias.clone(),
            relation,
            alias: format!("{}_{}", select.alias, relation.name),
            fetch: true,
        });
    }
    Ok(())
}

/// How many rows a read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    /// Everything, or the `Pageable` window when one is passed.
    List,
    Page,
    Slice,
}

/// A compiled repository for entity `T`.
///
/// Cheap to clone; the compiled operations are shared.
pub struct EntityRepository<T: Entity> {
    operations: Arc<HashMap<String, Operation>>,
    max_page_size: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for EntityRepository<T> {
    fn clone(&self) -> Self {
        Self {
            operations: self.operations.clone(),
            max_page_size: self.max_page_size,
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for EntityRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.operations.values().map(|o| o.name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("EntityRepository")
            .field("entity", &T::meta().name)
            .field("operations", &names)
            .finish()
    }
}

impl<T: Entity> EntityRepository<T> {
    /// Whether an operation with this name was declared (or is built in).
    pub fn has_operation(&self, method: &str) -> bool {
        self.operations.contains_key(&derive::normalize(method))
    }

    /// The declared shape of an operation.
    pub fn returns(&self, method: &str) -> Option<Returns> {
        self.operations.get(&derive::normalize(method)).map(|o| o.returns)
    }

    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    fn operation(&self, method: &str, accepted: &[Returns]) -> Result<&Operation, DataError> {
        let op = self
            .operations
            .get(&derive::normalize(method))
            .ok_or_else(|| DataError::binding(format!("{} has no operation '{method}'", T::meta().name)))?;
        if !accepted.contains(&op.returns) {
            return Err(DataError::binding(format!(
                "{method} is declared {:?}, not {}",
                op.returns,
                accepted
                    .iter()
                    .map(|r| format!("{r:?}"))
                    .collect::<Vec<_>>()
                    .join(" or ")
            )));
        }
        tracing::debug!(entity = T::meta().name, method, shape = ?op.returns, "Executing repository operation");
        Ok(op)
    }

    // ── Entities ────────────────────────────────────────────────────────

    /// Exactly one entity; `NotFound` or `NonUnique` otherwise.
    pub async fn find_one(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<T, DataError> {
        let op = self.operation(method, &[Returns::One])?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        shape::expect_one(self.entities(uow, op, rows)?, &op.name)
    }

    pub async fn find_optional(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Option<T>, DataError> {
        let op = self.operation(method, &[Returns::Optional])?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        shape::expect_optional(self.entities(uow, op, rows)?, &op.name)
    }

    pub async fn find_list(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Vec<T>, DataError> {
        let op = self.operation(method, &[Returns::List])?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        self.entities(uow, op, rows)
    }

    pub async fn find_page(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Page<T>, DataError> {
        let op = self.operation(method, &[Returns::Page])?;
        self.entity_page(uow, op, &args).await
    }

    pub async fn find_slice(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Slice<T>, DataError> {
        let op = self.operation(method, &[Returns::Slice])?;
        let (rows, pageable) = self.rows(uow, op, &args, Fetch::Slice).await?;
        let content = self.entities(uow, op, rows)?;
        Ok(Slice::from_probe(content, &pageable.unwrap_or_default()))
    }

    // ── Projections ─────────────────────────────────────────────────────

    pub async fn project_list<D: Projection>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Vec<D>, DataError> {
        let op = self.operation(method, &[Returns::List])?;
        check_projection::<D>(op)?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        tuples(op, rows)?.into_iter().map(shape::project).collect()
    }

    pub async fn project_optional<D: Projection>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Option<D>, DataError> {
        let op = self.operation(method, &[Returns::One, Returns::Optional])?;
        check_projection::<D>(op)?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        let items = tuples(op, rows)?
            .into_iter()
            .map(shape::project)
            .collect::<Result<Vec<D>, _>>()?;
        match op.returns {
            Returns::One => shape::expect_one(items, &op.name).map(Some),
            _ => shape::expect_optional(items, &op.name),
        }
    }

    pub async fn project_page<D: Projection>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Page<D>, DataError> {
        let op = self.operation(method, &[Returns::Page])?;
        check_projection::<D>(op)?;
        let (rows, pageable) = self.rows(uow, op, &args, Fetch::Page).await?;
        let pageable = pageable.unwrap_or_default();
        let content = tuples(op, rows)?
            .into_iter()
            .map(shape::project)
            .collect::<Result<Vec<D>, _>>()?;
        let total = self.total(uow, op, &args).await?;
        Ok(Page::new(content, &pageable, total))
    }

    pub async fn project_slice<D: Projection>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Slice<D>, DataError> {
        let op = self.operation(method, &[Returns::Slice])?;
        check_projection::<D>(op)?;
        let (rows, pageable) = self.rows(uow, op, &args, Fetch::Slice).await?;
        let content = tuples(op, rows)?
            .into_iter()
            .map(shape::project)
            .collect::<Result<Vec<D>, _>>()?;
        Ok(Slice::from_probe(content, &pageable.unwrap_or_default()))
    }

    // ── Scalars ─────────────────────────────────────────────────────────

    pub async fn scalar_list<S: FromValue>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Vec<S>, DataError> {
        let op = self.operation(method, &[Returns::List])?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        tuples(op, rows)?
            .into_iter()
            .map(|row| shape::scalar(row, &op.name))
            .collect()
    }

    pub async fn scalar_optional<S: FromValue>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Option<S>, DataError> {
        let op = self.operation(method, &[Returns::One, Returns::Optional])?;
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        let items = tuples(op, rows)?
            .into_iter()
            .map(|row| shape::scalar(row, &op.name))
            .collect::<Result<Vec<S>, _>>()?;
        match op.returns {
            Returns::One => shape::expect_one(items, &op.name).map(Some),
            _ => shape::expect_optional(items, &op.name),
        }
    }

    pub async fn scalar_page<S: FromValue>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Page<S>, DataError> {
        let op = self.operation(method, &[Returns::Page])?;
        let (rows, pageable) = self.rows(uow, op, &args, Fetch::Page).await?;
        let pageable = pageable.unwrap_or_default();
        let content = tuples(op, rows)?
            .into_iter()
            .map(|row| shape::scalar(row, &op.name))
            .collect::<Result<Vec<S>, _>>()?;
        let total = self.total(uow, op, &args).await?;
        Ok(Page::new(content, &pageable, total))
    }

    pub async fn scalar_slice<S: FromValue>(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<Slice<S>, DataError> {
        let op = self.operation(method, &[Returns::Slice])?;
        let (rows, pageable) = self.rows(uow, op, &args, Fetch::Slice).await?;
        let content = tuples(op, rows)?
            .into_iter()
            .map(|row| shape::scalar(row, &op.name))
            .collect::<Result<Vec<S>, _>>()?;
        Ok(Slice::from_probe(content, &pageable.unwrap_or_default()))
    }

    pub async fn count_by(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<u64, DataError> {
        let op = self.operation(method, &[Returns::Count])?;
        let params = bind(&op.compiled, args.values(), &op.name)?;
        uow.count(op.select()?, &params).await
    }

    pub async fn exists_by(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<bool, DataError> {
        let op = self.operation(method, &[Returns::Exists])?;
        let params = bind(&op.compiled, args.values(), &op.name)?;
        let rows = uow.select(op.select()?, &params, Window::new(0, 1)).await?;
        Ok(!rows.is_empty())
    }

    /// Run a bulk statement or derived delete; returns the affected rows.
    pub async fn execute(&self, uow: &mut UnitOfWork, method: &str, args: Args) -> Result<u64, DataError> {
        let op = self.operation(method, &[Returns::Modifying])?;
        let params = bind(&op.compiled, args.values(), &op.name)?;
        if op.modifying.flush_automatically {
            uow.flush().await?;
        }
        let affected = match op.action {
            Action::DerivedDelete => {
                let entities: Vec<T> = uow
                    .select_entities(op.select()?, &params, Window::all(), false)
                    .await?;
                for entity in &entities {
                    uow.remove(entity)?;
                }
                uow.flush().await?;
                entities.len() as u64
            }
            Action::Bulk | Action::Select => uow.execute(&op.compiled.statement, &params).await?,
        };
        if op.modifying.clear_automatically {
            uow.clear();
        }
        tracing::debug!(method = %op.name, affected, "Modifying operation done");
        Ok(affected)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn checked(&self, pageable: &Pageable, fetch: Fetch) -> Result<Pageable, DataError> {
        if pageable.size == 0 {
            return Err(DataError::binding("page size must be at least 1"));
        }
        let mut pageable = pageable.clone();
        if pageable.size > self.max_page_size {
            tracing::debug!(requested = pageable.size, max = self.max_page_size, "Page size clamped");
            pageable.size = self.max_page_size;
        }
        let probe = u64::from(fetch == Fetch::Slice);
        let end = pageable
            .page
            .checked_mul(pageable.size)
            .and_then(|offset| offset.checked_add(pageable.size + probe));
        if !matches!(end, Some(end) if end <= MAX_ROW) {
            return Err(DataError::binding(format!(
                "page {} of size {} is out of range",
                pageable.page, pageable.size
            )));
        }
        Ok(pageable)
    }

    async fn rows(&self, uow: &mut UnitOfWork, op: &Operation, args: &Args, fetch: Fetch) -> Result<(Vec<Row>, Option<Pageable>), DataError> {
        let select = op.select()?;
        let params = bind(&op.compiled, args.values(), &op.name)?;
        let pageable = match (fetch, args.pageable()) {
            (_, Some(pageable)) => Some(self.checked(pageable, fetch)?),
            (Fetch::List, None) => None,
            (Fetch::Page | Fetch::Slice, None) => {
                return Err(DataError::binding(format!("{} requires a Pageable argument", op.name)));
            }
        };
        let sort = match &pageable {
            Some(p) if !p.sort.is_unsorted() => Some(&p.sort),
            _ => args.sort(),
        };
        let select = sorted(select, sort)?;
        let window = match (&pageable, fetch) {
            (Some(p), Fetch::Slice) => Window::new(p.offset(), p.size + 1),
            (Some(p), _) => Window::new(p.offset(), p.size),
            (None, _) => Window::all(),
        };
        let rows = uow.select(&select, &params, window).await?;
        Ok((rows, pageable))
    }

    async fn total(&self, uow: &mut UnitOfWork, op: &Operation, args: &Args) -> Result<u64, DataError> {
        let count = op
            .count
            .as_ref()
            .ok_or_else(|| DataError::binding(format!("{} has no count query", op.name)))?;
        let values = args.values();
        let params = bind(count, &values[..count.arity.min(values.len())], &op.name)?;
        let Statement::Select(select) = &count.statement else {
            return Err(DataError::binding(format!("{} count is not a query", op.name)));
        };
        let total = uow.count(select, &params).await?;
        Ok(match op.select()?.limit {
            Some(limit) => total.min(limit),
            None => total,
        })
    }

    async fn entity_page(&self, uow: &mut UnitOfWork, op: &Operation, args: &Args) -> Result<Page<T>, DataError> {
        let (rows, pageable) = self.rows(uow, op, args, Fetch::Page).await?;
        let pageable = pageable.unwrap_or_default();
        let content = self.entities(uow, op, rows)?;
        let total = self.total(uow, op, args).await?;
        Ok(Page::new(content, &pageable, total))
    }

    fn entities(&self, uow: &mut UnitOfWork, op: &Operation, rows: Vec<Row>) -> Result<Vec<T>, DataError> {
        rows.into_iter()
            .map(|row| match row {
                Row::Entity(row) => uow.materialize::<T>(row, op.read_only),
                Row::Tuple(_) => Err(DataError::binding(format!(
                    "{} selects columns; use a projection or scalar call",
                    op.name
                ))),
            })
            .collect()
    }

    fn find_all_op(&self) -> Result<&Operation, DataError> {
        self.operations
            .get(FIND_ALL)
            .ok_or_else(|| DataError::binding(format!("{} has no findAll", T::meta().name)))
    }
}

fn check_projection<D: Projection>(op: &Operation) -> Result<(), DataError> {
    match op.projection {
        Some(shape) if shape.name == D::NAME => Ok(()),
        Some(shape) => Err(DataError::binding(format!(
            "{} projects {}, not {}",
            op.name,
            shape.name,
            D::NAME
        ))),
        None => Err(DataError::binding(format!("{} declares no projection", op.name))),
    }
}

fn tuples(op: &Operation, rows: Vec<Row>) -> Result<Vec<Vec<crate::value::Value>>, DataError> {
    rows.into_iter()
        .map(|row| match row {
            Row::Tuple(values) => Ok(values),
            Row::Entity(_) => Err(DataError::binding(format!("{} selects entities", op.name))),
        })
        .collect()
}

/// Append a call-time sort after the statement's own ordering.
fn sorted<'a>(select: &'a Select, sort: Option<&Sort>) -> Result<Cow<'a, Select>, DataError> {
    let Some(sort) = sort.filter(|s| !s.is_unsorted()) else {
        return Ok(Cow::Borrowed(select));
    };
    let mut owned = select.clone();
    for order in &sort.orders {
        let column = attribute_column(select.root, &select.alias, &order.property).ok_or_else(|| {
            DataError::binding(format!(
                "unknown sort property '{}' on {}",
                order.property, select.root.name
            ))
        })?;
        owned.order.push(OrderItem {
            expr: Expr::Column(column),
            direction: order.direction,
        });
    }
    Ok(Cow::Owned(owned))
}

impl<T: Entity> CrudRepository<T> for EntityRepository<T> {
    async fn save(&self, uow: &mut UnitOfWork, mut entity: T) -> Result<T, DataError> {
        uow.persist(&mut entity).await?;
        Ok(entity)
    }

    async fn save_all(&self, uow: &mut UnitOfWork, entities: Vec<T>) -> Result<Vec<T>, DataError> {
        let mut saved = Vec::with_capacity(entities.len());
        for mut entity in entities {
            uow.persist(&mut entity).await?;
            saved.push(entity);
        }
        Ok(saved)
    }

    async fn find_by_id(&self, uow: &mut UnitOfWork, id: T::Id) -> Result<Option<T>, DataError> {
        uow.find::<T>(id).await
    }

    async fn exists_by_id(&self, uow: &mut UnitOfWork, id: T::Id) -> Result<bool, DataError> {
        Ok(uow.find::<T>(id).await?.is_some())
    }

    async fn find_all(&self, uow: &mut UnitOfWork) -> Result<Vec<T>, DataError> {
        let op = self.find_all_op()?;
        let rows = self.rows(uow, op, &Args::new(), Fetch::List).await?.0;
        self.entities(uow, op, rows)
    }

    async fn find_all_sorted(&self, uow: &mut UnitOfWork, sort: &Sort) -> Result<Vec<T>, DataError> {
        let op = self.find_all_op()?;
        let args = Args::new().with_sort(sort.clone());
        let rows = self.rows(uow, op, &args, Fetch::List).await?.0;
        self.entities(uow, op, rows)
    }

    async fn find_all_paged(&self, uow: &mut UnitOfWork, pageable: &Pageable) -> Result<Page<T>, DataError> {
        let op = self.find_all_op()?;
        let args = Args::new().with_pageable(pageable.clone());
        self.entity_page(uow, op, &args).await
    }

    async fn count(&self, uow: &mut UnitOfWork) -> Result<u64, DataError> {
        let op = self.find_all_op()?;
        self.total(uow, op, &Args::new()).await
    }

    async fn delete(&self, uow: &mut UnitOfWork, entity: &T) -> Result<(), DataError> {
        uow.remove(entity)
    }

    async fn delete_by_id(&self, uow: &mut UnitOfWork, id: T::Id) -> Result<bool, DataError> {
        match uow.find::<T>(id).await? {
            Some(entity) => {
                uow.remove(&entity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_all(&self, uow: &mut UnitOfWork) -> Result<u64, DataError> {
        let all = self.find_all(uow).await?;
        for entity in &all {
            uow.remove(entity)?;
        }
        Ok(all.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::{Attribute, EntityMeta, FetchType, Relation, RelationKind};
    use crate::page::Direction;
    use crate::value::ValueKind;
    use crate::testing::{Member, MemberDto, Team};
    use crate::args;

    fn catalog() -> EntityCatalog {
        EntityCatalog::new().with::<Member>().unwrap()
    }

    fn members() -> EntityRepository<Member> {
        RepositoryDefinition::<Member>::new()
            .method(Method::derived("findByUsernameAndAgeGreaterThan"))
            .method(Method::derived("findTop3HelloBy"))
            .method(Method::derived("findByAge").returns(Returns::Page))
            .method(Method::derived("find_by_age_order_by_username_desc").returns(Returns::Slice))
            .method(Method::derived("countByAge"))
            .method(Method::derived("existsByUsername"))
            .method(Method::derived("deleteByAgeLessThan"))
            .method(Method::derived("findReadOnlyByUsername").read_only().returns(Returns::Optional))
            .method(Method::derived("findByTeamName"))
            .method(
                Method::query("findUser", "select m from Member m where m.username = :username and m.age = :age")
                    .params(["username", "age"])
                    .returns(Returns::One),
            )
            .method(Method::query("findUsernameList", "select m.username from Member m order by m.username"))
            .method(
                Method::query(
                    "findMemberDto",
                    "select new study.datajpa.dto.MemberDto(m.id, m.username, t.name) from Member m join m.team t",
                )
                .projection::<MemberDto>(),
            )
            .method(
                Method::query("findByNames", "select m from Member m where m.username in :names")
                    .params(["names"]),
            )
            .method(
                Method::query("bulkAgePlus", "update Member m set m.age = m.age + 1 where m.age >= :age")
                    .params(["age"])
                    .modifying(Modifying::clearing()),
            )
            .method(Method::query("findMemberFetchJoin", "select m from Member m left join fetch m.team"))
            .method(Method::derived("findAll").entity_graph(["team"]))
            .build(&catalog())
            .unwrap()
    }

    async fn seed(backend: &MemoryBackend) {
        let mut uow = UnitOfWork::begin(backend).await.unwrap();
        let mut team_a = Team::named(None, "teamA");
        let mut team_b = Team::named(None, "teamB");
        uow.persist(&mut team_a).await.unwrap();
        uow.persist(&mut team_b).await.unwrap();
        for (name, age, team) in [
            ("member1", 10, Some(&team_a)),
            ("member2", 19, Some(&team_a)),
            ("member3", 20, Some(&team_b)),
            ("member4", 21, Some(&team_b)),
            ("member5", 40, None),
        ] {
            let mut member = Member::new(name, age);
            if let Some(team) = team {
                member = member.with_team(team);
            }
            uow.persist(&mut member).await.unwrap();
        }
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn derived_and_explicit_queries() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();

        let found = repo
            .find_list(&mut uow, "findByUsernameAndAgeGreaterThan", args!["member4", 15])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].age, 21);

        let top = repo.find_list(&mut uow, "findTop3HelloBy", args![]).await.unwrap();
        assert_eq!(top.len(), 3);

        let user = repo
            .find_one(&mut uow, "findUser", args!["member3", 20])
            .await
            .unwrap();
        assert_eq!(user.username, "member3");

        let names: Vec<String> = repo.scalar_list(&mut uow, "findUsernameList", args![]).await.unwrap();
        assert_eq!(names, vec!["member1", "member2", "member3", "member4", "member5"]);

        let dtos: Vec<MemberDto> = repo.project_list(&mut uow, "findMemberDto", args![]).await.unwrap();
        assert_eq!(dtos.len(), 4);
        assert!(dtos.iter().any(|d| d.username == "member1" && d.team_name == "teamA"));

        let by_names = repo
            .find_list(&mut uow, "findByNames", args![vec!["member1", "member2"]])
            .await
            .unwrap();
        assert_eq!(by_names.len(), 2);

        let by_team = repo.find_list(&mut uow, "findByTeamName", args!["teamB"]).await.unwrap();
        assert_eq!(by_team.len(), 2);

        assert_eq!(repo.count_by(&mut uow, "countByAge", args![10]).await.unwrap(), 1);
        assert!(repo.exists_by(&mut uow, "existsByUsername", args!["member5"]).await.unwrap());
        assert!(!repo.exists_by(&mut uow, "existsByUsername", args!["nobody"]).await.unwrap());
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn single_result_errors() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let err = repo.find_one(&mut uow, "findUser", args!["ghost", 1]).await.unwrap_err();
        assert!(matches!(err, DataError::NotFound(_)), "{err}");

        let err = repo.find_one(&mut uow, "findUser", args!["member1"]).await.unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");

        let err = repo.find_list(&mut uow, "findUser", args!["member1", 10]).await.unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");

        let err = repo.find_list(&mut uow, "findNothing", args![]).await.unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn paging_and_slicing() {
        let backend = MemoryBackend::new();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        for name in ["member1", "member2", "member3", "member4", "member5"] {
            uow.persist(&mut Member::new(name, 10)).await.unwrap();
        }
        uow.commit().await.unwrap();
        let repo = members();
        backend.stats().reset();

        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let pageable = Pageable::sorted(0, 3, Sort::by(Direction::Desc, &["username"]));
        let page = repo
            .find_page(&mut uow, "findByAge", args![10].with_pageable(pageable))
            .await
            .unwrap();
        assert_eq!(page.content.len(), 3);
        assert_eq!(page.content[0].username, "member5");
        assert_eq!(page.total_elements, 5);
        assert_eq!(page.total_pages, 2);
        assert!(page.is_first());
        assert!(page.has_next());
        assert_eq!(backend.stats().counts(), 1);

        let slice = repo
            .find_slice(&mut uow, "findByAgeOrderByUsernameDesc", args![10].with_pageable(Pageable::of(1, 3)))
            .await
            .unwrap();
        assert_eq!(slice.content.len(), 2);
        assert!(!slice.has_next());
        assert_eq!(slice.content[0].username, "member2");
        assert_eq!(backend.stats().counts(), 1);

        let err = repo
            .find_page(&mut uow, "findByAge", args![10].with_pageable(Pageable::of(0, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Binding(_)));

        let err = repo
            .find_page(&mut uow, "findByAge", args![10])
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Binding(_)));

        let bad_sort = Pageable::sorted(0, 3, Sort::by(Direction::Asc, &["nickname"]));
        let err = repo
            .find_page(&mut uow, "findByAge", args![10].with_pageable(bad_sort))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Binding(_)));
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn page_index_past_addressable_rows_is_rejected() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let err = repo
            .find_page(&mut uow, "findByAge", args![10].with_pageable(Pageable::of(u64::MAX / 2, 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");

        let err = repo
            .find_slice(&mut uow, "findByAgeOrderByUsernameDesc", args![10].with_pageable(Pageable::of(u64::MAX, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");

        let far = repo
            .find_page(&mut uow, "findByAge", args![10].with_pageable(Pageable::of(1_000_000, 3)))
            .await
            .unwrap();
        assert!(far.content.is_empty());
        assert_eq!(far.total_elements, 1);
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn projections_and_scalars_page_and_slice() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = RepositoryDefinition::<Member>::new()
            .method(
                Method::query(
                    "dtoSlice",
                    "select new MemberDto(m.id, m.username, t.name) from Member m join m.team t order by m.username",
                )
                .projection::<MemberDto>()
                .returns(Returns::Slice),
            )
            .method(Method::query("namePage", "select m.username from Member m order by m.username").returns(Returns::Page))
            .method(Method::query("nameSlice", "select m.username from Member m order by m.username").returns(Returns::Slice))
            .build(&catalog())
            .unwrap();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();

        let dtos: Slice<MemberDto> = repo
            .project_slice(&mut uow, "dtoSlice", args![].with_pageable(Pageable::of(0, 3)))
            .await
            .unwrap();
        assert_eq!(dtos.content.len(), 3);
        assert!(dtos.has_next());
        assert_eq!(dtos.content[0].username, "member1");

        let names: Page<String> = repo
            .scalar_page(&mut uow, "namePage", args![].with_pageable(Pageable::of(1, 2)))
            .await
            .unwrap();
        assert_eq!(names.content, vec!["member3", "member4"]);
        assert_eq!(names.total_elements, 5);
        assert_eq!(names.total_pages, 3);

        let tail: Slice<String> = repo
            .scalar_slice(&mut uow, "nameSlice", args![].with_pageable(Pageable::of(2, 2)))
            .await
            .unwrap();
        assert_eq!(tail.content, vec!["member5"]);
        assert!(!tail.has_next());

        let err = repo
            .find_slice(&mut uow, "dtoSlice", args![].with_pageable(Pageable::of(0, 3)))
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn bulk_update_clears_identity_map() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let before = repo.find_one(&mut uow, "findUser", args!["member5", 40]).await.unwrap();
        let affected = repo.execute(&mut uow, "bulkAgePlus", args![20]).await.unwrap();
        assert_eq!(affected, 3);
        assert_eq!(uow.tracked(), 0);
        let after: Member = uow.find(before.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(after.age, 41);
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn derived_delete_removes_matches() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        assert_eq!(repo.execute(&mut uow, "deleteByAgeLessThan", args![20]).await.unwrap(), 2);
        assert_eq!(repo.count(&mut uow).await.unwrap(), 3);
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn fetch_join_and_entity_graph_resolve_team() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let fetched = repo.find_list(&mut uow, "findMemberFetchJoin", args![]).await.unwrap();
        assert_eq!(fetched.len(), 5);
        assert!(fetched[0].team.is_resolved());
        assert!(fetched[4].team.is_empty());

        let all = repo.find_all(&mut uow).await.unwrap();
        assert!(all[0].team.is_resolved());
        assert_eq!(all[0].team.get().map(|t| t.name.as_str()), Some("teamA"));
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn identity_map_wins_unless_read_only() {
        let backend = MemoryBackend::new();
        seed(&backend).await;
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let mut member = repo.find_one(&mut uow, "findUser", args!["member1", 10]).await.unwrap();
        member.username = "renamed".into();
        uow.persist(&mut member).await.unwrap();
        // flushed before the read, served from the snapshot
        let read = repo
            .find_optional(&mut uow, "findReadOnlyByUsername", args!["renamed"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.username, "renamed");
        assert!(repo
            .find_optional(&mut uow, "findReadOnlyByUsername", args!["member1"])
            .await
            .unwrap()
            .is_none());
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn crud_surface() {
        let backend = MemoryBackend::new();
        let repo = members();
        let mut uow = UnitOfWork::begin(&backend).await.unwrap();
        let saved = repo.save(&mut uow, Member::new("memberA", 10)).await.unwrap();
        let id = saved.id.unwrap();
        assert_eq!(repo.find_by_id(&mut uow, id).await.unwrap(), Some(saved.clone()));
        assert!(repo.exists_by_id(&mut uow, id).await.unwrap());
        repo.save_all(&mut uow, vec![Member::new("memberB", 20), Member::new("memberC", 30)])
            .await
            .unwrap();
        assert_eq!(repo.count(&mut uow).await.unwrap(), 3);

        let sorted = repo
            .find_all_sorted(&mut uow, &Sort::by(Direction::Desc, &["age"]))
            .await
            .unwrap();
        assert_eq!(sorted[0].username, "memberC");

        let page = repo.find_all_paged(&mut uow, &Pageable::of(1, 2)).await.unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.total_pages, 2);

        repo.delete(&mut uow, &saved).await.unwrap();
        assert!(!repo.exists_by_id(&mut uow, id).await.unwrap());
        assert!(!repo.delete_by_id(&mut uow, id).await.unwrap());
        assert_eq!(repo.delete_all(&mut uow).await.unwrap(), 2);
        assert_eq!(repo.count(&mut uow).await.unwrap(), 0);
        uow.commit().await.unwrap();
        assert!(backend.rows(Member::meta()).await.is_empty());
    }

    fn build_err(method: Method) -> RegistrationErrorKind {
        RepositoryDefinition::<Member>::new()
            .method(method)
            .build(&catalog())
            .unwrap_err()
            .kind
    }

    #[test]
    fn registration_errors() {
        assert!(matches!(
            build_err(Method::derived("findByNickname")),
            RegistrationErrorKind::UnknownAttribute { .. }
        ));
        assert!(matches!(
            build_err(Method::query("bulk", "update Member m set m.age = 1")),
            RegistrationErrorKind::InvalidDeclaration(_)
        ));
        assert!(matches!(
            build_err(Method::query("sel", "select m from Member m").modifying(Modifying::new())),
            RegistrationErrorKind::InvalidDeclaration(_)
        ));
        assert!(matches!(
            build_err(Method::query("q", "select m from Member m where m.username = :name")),
            RegistrationErrorKind::UnboundPlaceholder(_)
        ));
        assert!(matches!(
            build_err(Method::query("f", "select m from Member m join fetch m.team").entity_graph(["nothing"])),
            RegistrationErrorKind::UnknownRelation { .. }
        ));
        assert!(matches!(
            build_err(Method::query("dto", "select new OtherDto(m.id, m.username, m.username) from Member m").projection::<MemberDto>()),
            RegistrationErrorKind::InvalidDeclaration(_)
        ));
        assert!(matches!(
            build_err(Method::query("dto", "select new MemberDto(m.id, m.username) from Member m")),
            RegistrationErrorKind::InvalidDeclaration(_)
        ));
        assert!(matches!(
            build_err(Method::derived("countByAge").returns(Returns::List)),
            RegistrationErrorKind::InvalidDeclaration(_)
        ));
        assert!(matches!(
            build_err(Method::query("teams", "select t from Team t")),
            RegistrationErrorKind::InvalidDeclaration(_)
        ));
    }

    static ORDER_META: EntityMeta = EntityMeta {
        name: "Order",
        table: "orders",
        id: "id",
        attributes: &[Attribute { name: "id", column: "id", kind: ValueKind::Int, nullable: false }],
        relations: &[
            Relation {
                name: "member",
                kind: RelationKind::ManyToOne,
                target: <Member as Entity>::meta,
                column: "member_id",
                mapped_by: "",
                fetch: FetchType::Lazy,
            },
            Relation {
                name: "team",
                kind: RelationKind::ManyToOne,
                target: <Team as Entity>::meta,
                column: "team_id",
                mapped_by: "",
                fetch: FetchType::Lazy,
            },
        ],
    };

    fn fetching(relations: &[&str]) -> Select {
        let mut select = Select::all(&ORDER_META, "o");
        for name in relations {
            let relation = ORDER_META.relation(name).unwrap();
            select.joins.push(Join {
                kind: JoinKind::Inner,
                parent: "o".into(),
                relation,
                alias: format!("o_{name}"),
                fetch: true,
            });
        }
        select
    }

    #[test]
    fn entity_graph_must_match_fetch_joins() {
        let mut select = fetching(&["member"]);
        let err = apply_entity_graph(&mut select, &["team".to_string()]).unwrap_err();
        assert_eq!(
            err,
            RegistrationErrorKind::ConflictingFetch {
                fetch_joins: vec!["member".into()],
                entity_graph: vec!["team".into()],
            }
        );

        let mut select = fetching(&["member", "team"]);
        apply_entity_graph(&mut select, &["team".to_string(), "member".to_string()]).unwrap();
        assert_eq!(select.joins.len(), 2);
    }

    #[test]
    fn entity_graph_adds_left_fetch_joins() {
        let mut select = fetching(&[]);
        apply_entity_graph(&mut select, &["team".to_string()]).unwrap();
        assert_eq!(select.joins.len(), 1);
        assert_eq!(select.joins[0].kind, JoinKind::Left);
        assert_eq!(select.joins[0].alias, "o_team");
        assert!(select.joins[0].fetch);
    }

    #[test]
    fn collection_graph_registers() {
        let repo = RepositoryDefinition::<Team>::new()
            .method(
                Method::query("teams", "select t from Team t left join fetch t.members")
                    .entity_graph(["members", "members"]),
            )
            .build(&catalog());
        assert!(repo.is_ok());
    }
}
