//! SQL rendering of compiled statements.
//!
//! ```ignore
//! let renderer = SqlRenderer::new(Dialect::Sqlite);
//! let rendered = renderer.select(&select, &params, Window::new(0, 10))?;
//! // SELECT "m"."id", ... FROM "member" AS "m" WHERE "m"."age" > ? LIMIT 10
//! ```

use crate::backend::Window;
use crate::entity::{EntityMeta, Record, Relation, RelationKind};
use crate::error::DataError;
use crate::query::{
    id_column, ArithOp, Delete, Expr, InList, Join, JoinKind, Predicate, Select, Selection, Statement, Update,
    LIKE_ESCAPE,
};
use crate::page::Direction;
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// SQLite-style `?` placeholders.
    Sqlite,
    /// Postgres-style `$1, $2, ...` placeholders.
    Postgres,
}

impl Dialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => "?".to_string(),
        }
    }

    fn column_type(self, kind: ValueKind) -> &'static str {
        match (self, kind) {
            (_, ValueKind::Int) => "INTEGER",
            (_, ValueKind::Float) => "REAL",
            (_, ValueKind::Text) => "TEXT",
            (Dialect::Sqlite, ValueKind::Bool) => "INTEGER",
            (Dialect::Postgres, ValueKind::Bool) => "BOOLEAN",
        }
    }
}

/// SQL text plus the values of its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Columns of a many-to-one relation fetched with its owner.
#[derive(Debug, Clone)]
pub struct FetchedColumns {
    pub relation: &'static Relation,
    pub columns: Vec<(&'static str, ValueKind)>,
}

/// How the columns of a rendered select map back onto rows.
#[derive(Debug, Clone)]
pub enum Layout {
    /// Root columns first, then the columns of each fetched many-to-one
    /// relation. `collections` are one-to-many fetches the caller loads
    /// with a second query.
    Entity {
        root: Vec<(&'static str, ValueKind)>,
        fetched: Vec<FetchedColumns>,
        collections: Vec<&'static Relation>,
    },
    /// One value per column; the kind is known for attribute columns.
    Tuple(Vec<Option<ValueKind>>),
}

#[derive(Debug, Clone)]
pub struct RenderedSelect {
    pub sql: String,
    pub params: Vec<Value>,
    pub layout: Layout,
}

/// Renders [`Statement`]s and row writes for one SQL dialect.
///
/// Every identifier is quoted; every value, literals included, travels as a
/// bound parameter.
#[derive(Debug, Clone, Copy)]
pub struct SqlRenderer {
    dialect: Dialect,
}

impl SqlRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn select(&self, select: &Select, params: &[Value], window: Window) -> Result<RenderedSelect, DataError> {
        let mut w = Writer::new(self.dialect, params);
        let referenced = referenced_aliases(select);
        // Collection fetches are loaded separately; their join only stays
        // when it filters or something refers to it.
        let joins: Vec<&Join> = select
            .joins
            .iter()
            .filter(|j| {
                !(j.fetch
                    && j.relation.kind == RelationKind::OneToMany
                    && j.kind == JoinKind::Left
                    && !referenced.iter().any(|a| a == &j.alias))
            })
            .collect();

        let layout = match &select.selection {
            Selection::Entity => {
                let multiplies = joins
                    .iter()
                    .any(|j| j.fetch && j.relation.kind == RelationKind::OneToMany);
                w.push(if select.distinct || multiplies {
                    "SELECT DISTINCT "
                } else {
                    "SELECT "
                });
                let root = select.root.columns();
                let mut first = true;
                for (column, _) in &root {
                    w.column_list_item(&mut first, &select.alias, column);
                }
                let mut fetched = Vec::new();
                let mut collections = Vec::new();
                for join in select.fetch_joins() {
                    match join.relation.kind {
                        RelationKind::ManyToOne => {
                            let columns = join.target().columns();
                            for (column, _) in &columns {
                                w.column_list_item(&mut first, &join.alias, column);
                            }
                            fetched.push(FetchedColumns {
                                relation: join.relation,
                                columns,
                            });
                        }
                        RelationKind::OneToMany => collections.push(join.relation),
                    }
                }
                Layout::Entity {
                    root,
                    fetched,
                    collections,
                }
            }
            Selection::Columns(exprs) | Selection::Constructor { args: exprs, .. } => {
                w.push(if select.distinct { "SELECT DISTINCT " } else { "SELECT " });
                w.expr_list(exprs)?;
                Layout::Tuple(exprs.iter().map(Expr::kind).collect())
            }
            Selection::Count { expr, distinct } => {
                w.push("SELECT COUNT(");
                match expr {
                    Some(expr) => {
                        if *distinct {
                            w.push("DISTINCT ");
                        }
                        w.expr(expr)?;
                    }
                    None => w.push("*"),
                }
                w.push(")");
                Layout::Tuple(vec![Some(ValueKind::Int)])
            }
        };

        w.push(" FROM ");
        w.table(select.root, &select.alias);
        for join in joins {
            w.join(select, join)?;
        }
        if let Some(filter) = &select.filter {
            w.push(" WHERE ");
            w.predicate(filter)?;
        }
        if !select.order.is_empty() {
            w.push(" ORDER BY ");
            for (i, item) in select.order.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.expr(&item.expr)?;
                w.push(match (self.dialect, item.direction) {
                    (Dialect::Sqlite, Direction::Asc) => " ASC",
                    (Dialect::Sqlite, Direction::Desc) => " DESC",
                    (Dialect::Postgres, Direction::Asc) => " ASC NULLS FIRST",
                    (Dialect::Postgres, Direction::Desc) => " DESC NULLS LAST",
                });
            }
        }
        w.window(window.capped(select.limit));

        let (sql, params) = w.finish();
        Ok(RenderedSelect { sql, params, layout })
    }

    /// Render a bulk update or delete.
    pub fn statement(&self, statement: &Statement, params: &[Value]) -> Result<RenderedSql, DataError> {
        match statement {
            Statement::Update(update) => self.update(update, params),
            Statement::Delete(delete) => self.delete(delete, params),
            Statement::Select(select) => Err(DataError::Other(format!(
                "select on {} passed as a bulk statement",
                select.root.name
            ))),
        }
    }

    fn update(&self, update: &Update, params: &[Value]) -> Result<RenderedSql, DataError> {
        let mut w = Writer::new(self.dialect, params);
        w.push("UPDATE ");
        w.table(update.root, &update.alias);
        w.push(" SET ");
        for (i, assignment) in update.assignments.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.ident(assignment.column.column);
            w.push(" = ");
            w.expr(&assignment.value)?;
        }
        if let Some(filter) = &update.filter {
            w.push(" WHERE ");
            w.predicate(filter)?;
        }
        let (sql, params) = w.finish();
        Ok(RenderedSql { sql, params })
    }

    fn delete(&self, delete: &Delete, params: &[Value]) -> Result<RenderedSql, DataError> {
        let mut w = Writer::new(self.dialect, params);
        w.push("DELETE FROM ");
        w.table(delete.root, &delete.alias);
        if let Some(filter) = &delete.filter {
            w.push(" WHERE ");
            w.predicate(filter)?;
        }
        let (sql, params) = w.finish();
        Ok(RenderedSql { sql, params })
    }

    /// Insert one row. A `Null` identifier is left out so the database
    /// generates it.
    pub fn insert_row(&self, meta: &EntityMeta, record: &Record) -> RenderedSql {
        let id = meta.id_column();
        let columns: Vec<&'static str> = meta
            .columns()
            .into_iter()
            .map(|(c, _)| c)
            .filter(|c| *c != id || !record.get(c).is_null())
            .collect();
        let mut w = Writer::new(self.dialect, &[]);
        w.push("INSERT INTO ");
        w.ident(meta.table);
        if columns.is_empty() {
            w.push(" DEFAULT VALUES");
        } else {
            w.push(" (");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.ident(column);
            }
            w.push(") VALUES (");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind(record.get(column).clone());
            }
            w.push(")");
        }
        let (sql, params) = w.finish();
        RenderedSql { sql, params }
    }

    /// Overwrite every non-identifier column of the row `record` names.
    pub fn update_row(&self, meta: &EntityMeta, record: &Record) -> RenderedSql {
        let id = meta.id_column();
        let mut w = Writer::new(self.dialect, &[]);
        w.push("UPDATE ");
        w.ident(meta.table);
        w.push(" SET ");
        let mut first = true;
        for (column, _) in meta.columns() {
            if column == id {
                continue;
            }
            if !first {
                w.push(", ");
            }
            first = false;
            w.ident(column);
            w.push(" = ");
            w.bind(record.get(column).clone());
        }
        w.push(" WHERE ");
        w.ident(id);
        w.push(" = ");
        w.bind(record.get(id).clone());
        let (sql, params) = w.finish();
        RenderedSql { sql, params }
    }

    pub fn delete_row(&self, meta: &EntityMeta, id: &Value) -> RenderedSql {
        let mut w = Writer::new(self.dialect, &[]);
        w.push("DELETE FROM ");
        w.ident(meta.table);
        w.push(" WHERE ");
        w.ident(meta.id_column());
        w.push(" = ");
        w.bind(id.clone());
        let (sql, params) = w.finish();
        RenderedSql { sql, params }
    }

    /// `CREATE TABLE IF NOT EXISTS` for an entity, foreign keys included.
    pub fn create_table(&self, meta: &EntityMeta) -> String {
        let id = meta.id_column();
        let mut w = Writer::new(self.dialect, &[]);
        w.push("CREATE TABLE IF NOT EXISTS ");
        w.ident(meta.table);
        w.push(" (");
        let mut first = true;
        let mut separator = |w: &mut Writer<'_>| {
            if !first {
                w.push(", ");
            }
            first = false;
        };
        for attribute in meta.attributes {
            separator(&mut w);
            w.ident(attribute.column);
            w.push(" ");
            if attribute.column == id && attribute.kind == ValueKind::Int && self.dialect == Dialect::Postgres {
                w.push("BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY");
                continue;
            }
            w.push(self.dialect.column_type(attribute.kind));
            if attribute.column == id {
                w.push(" PRIMARY KEY");
            } else if !attribute.nullable {
                w.push(" NOT NULL");
            }
        }
        for relation in meta.relations {
            if relation.kind != RelationKind::ManyToOne {
                continue;
            }
            let target = relation.target();
            let kind = target.id_attribute().map_or(ValueKind::Int, |a| a.kind);
            separator(&mut w);
            w.ident(relation.column);
            w.push(" ");
            w.push(self.dialect.column_type(kind));
            w.push(" REFERENCES ");
            w.ident(target.table);
            w.push(" (");
            w.ident(target.id_column());
            w.push(")");
        }
        w.push(")");
        w.finish().0
    }
}

/// Aliases used anywhere outside the join's own `ON` clause.
fn referenced_aliases(select: &Select) -> Vec<String> {
    let mut out: Vec<&str> = Vec::new();
    if let Some(filter) = &select.filter {
        filter.aliases(&mut out);
    }
    let mut exprs: Vec<&Expr> = select.order.iter().map(|o| &o.expr).collect();
    match &select.selection {
        Selection::Columns(items) | Selection::Constructor { args: items, .. } => exprs.extend(items),
        Selection::Count { expr: Some(expr), .. } => exprs.push(expr),
        Selection::Count { expr: None, .. } | Selection::Entity => {}
    }
    let mut names: Vec<String> = out.into_iter().map(str::to_string).collect();
    for expr in exprs {
        collect_expr_aliases(expr, &mut names);
    }
    names.extend(select.joins.iter().map(|j| j.parent.clone()));
    names
}

fn collect_expr_aliases(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Column(c) => out.push(c.alias.clone()),
        Expr::Binary(_, l, r) => {
            collect_expr_aliases(l, out);
            collect_expr_aliases(r, out);
        }
        Expr::Neg(inner) | Expr::Lower(inner) | Expr::Upper(inner) => collect_expr_aliases(inner, out),
        Expr::Param(_) | Expr::Literal(_) => {}
    }
}

struct Writer<'a> {
    dialect: Dialect,
    sql: String,
    input: &'a [Value],
    params: Vec<Value>,
}

impl<'a> Writer<'a> {
    fn new(dialect: Dialect, input: &'a [Value]) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            input,
            params: Vec::new(),
        }
    }

    fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn ident(&mut self, ident: &str) {
        let quoted = quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    fn column(&mut self, alias: &str, column: &str) {
        self.ident(alias);
        self.push(".");
        self.ident(column);
    }

    fn column_list_item(&mut self, first: &mut bool, alias: &str, column: &str) {
        if !*first {
            self.push(", ");
        }
        *first = false;
        self.column(alias, column);
    }

    fn table(&mut self, meta: &EntityMeta, alias: &str) {
        self.ident(meta.table);
        self.push(" AS ");
        self.ident(alias);
    }

    fn bind(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn param(&mut self, index: usize) -> Result<Value, DataError> {
        self.input
            .get(index)
            .cloned()
            .ok_or_else(|| DataError::binding(format!("no value for parameter {}", index + 1)))
    }

    fn join(&mut self, select: &Select, join: &Join) -> Result<(), DataError> {
        let parent = select
            .entity_for(&join.parent)
            .ok_or_else(|| DataError::Other(format!("join on unknown alias '{}'", join.parent)))?;
        let fk = join.relation.join_column().ok_or_else(|| {
            DataError::Other(format!("relation '{}' has no join column", join.relation.name))
        })?;
        self.push(match join.kind {
            JoinKind::Inner => " INNER JOIN ",
            JoinKind::Left => " LEFT JOIN ",
        });
        let target = join.target();
        self.table(target, &join.alias);
        self.push(" ON ");
        match join.relation.kind {
            RelationKind::ManyToOne => {
                self.column(&join.alias, target.id_column());
                self.push(" = ");
                self.column(&join.parent, fk);
            }
            RelationKind::OneToMany => {
                self.column(&join.alias, fk);
                self.push(" = ");
                let id = id_column(parent, &join.parent);
                self.column(&id.alias, id.column);
            }
        }
        Ok(())
    }

    fn window(&mut self, window: Window) {
        match (window.limit, window.offset, self.dialect) {
            (Some(limit), 0, _) => self.push(&format!(" LIMIT {limit}")),
            (Some(limit), offset, _) => self.push(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, 0, _) => {}
            (None, offset, Dialect::Sqlite) => self.push(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, offset, Dialect::Postgres) => self.push(&format!(" OFFSET {offset}")),
        }
    }

    fn expr_list(&mut self, exprs: &[Expr]) -> Result<(), DataError> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.expr(expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), DataError> {
        match expr {
            Expr::Column(c) => self.column(&c.alias, c.column),
            Expr::Param(index) => {
                let value = self.param(*index)?;
                self.bind(value);
            }
            Expr::Literal(value) => self.bind(value.clone()),
            Expr::Binary(op, left, right) => {
                self.push("(");
                self.expr(left)?;
                self.push(match op {
                    ArithOp::Add => " + ",
                    ArithOp::Sub => " - ",
                    ArithOp::Mul => " * ",
                    ArithOp::Div => " / ",
                });
                self.expr(right)?;
                self.push(")");
            }
            Expr::Neg(inner) => {
                self.push("(-");
                self.expr(inner)?;
                self.push(")");
            }
            Expr::Lower(inner) => {
                self.push("LOWER(");
                self.expr(inner)?;
                self.push(")");
            }
            Expr::Upper(inner) => {
                self.push("UPPER(");
                self.expr(inner)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn predicate(&mut self, predicate: &Predicate) -> Result<(), DataError> {
        match predicate {
            Predicate::And(parts) | Predicate::Or(parts) if parts.is_empty() => {
                self.push(if matches!(predicate, Predicate::And(_)) { "1 = 1" } else { "1 = 0" });
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                let joiner = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
                self.push("(");
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.push(joiner);
                    }
                    self.predicate(part)?;
                }
                self.push(")");
            }
            Predicate::Not(inner) => {
                self.push("NOT (");
                self.predicate(inner)?;
                self.push(")");
            }
            Predicate::Compare { left, op, right } => {
                self.expr(left)?;
                self.push(" ");
                self.push(op.symbol());
                self.push(" ");
                self.expr(right)?;
            }
            Predicate::Like { expr, pattern, negated } => {
                self.expr(expr)?;
                self.push(if *negated { " NOT LIKE " } else { " LIKE " });
                self.expr(pattern)?;
                self.push(&format!(" ESCAPE '{LIKE_ESCAPE}'"));
            }
            Predicate::In { expr, list, negated } => {
                let items: Vec<Expr> = match list {
                    InList::Param(index) => match self.param(*index)? {
                        Value::List(values) => values.into_iter().map(Expr::Literal).collect(),
                        single => vec![Expr::Literal(single)],
                    },
                    InList::Items(items) => items.clone(),
                };
                if items.is_empty() {
                    self.push(if *negated { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                self.expr(expr)?;
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.expr_list(&items)?;
                self.push(")");
            }
            Predicate::Between { expr, low, high, negated } => {
                self.expr(expr)?;
                self.push(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.expr(low)?;
                self.push(" AND ");
                self.expr(high)?;
            }
            Predicate::IsNull { expr, negated } => {
                self.expr(expr)?;
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
        }
        Ok(())
    }
}

/// Whether `ident` is a plain SQL identifier: a letter or underscore, then
/// letters, digits or underscores.
pub(crate) fn is_valid_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
