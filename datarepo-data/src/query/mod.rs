//! Compiled query representation shared by derived and explicit queries.
//!
//! Both the method-name parser ([`derive`]) and the query-string parser
//! ([`explicit`]) produce a [`Statement`]. Backends execute statements; they
//! never see method names or query text.

pub mod bind;
pub mod derive;
pub mod explicit;
mod lexer;

use crate::entity::{EntityMeta, Relation};
use crate::page::Direction;
use crate::value::{Value, ValueKind};

/// A column reached through a query alias.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: &'static str,
    /// Attribute name (or relation name for foreign keys), for messages.
    pub name: &'static str,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    /// Index into the statement's parameter list.
    Param(usize),
    Literal(Value),
    Binary(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Lower(Box<Expr>),
    Upper(Box<Expr>),
}

impl Expr {
    /// The static kind of the expression when it can be inferred.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Expr::Column(c) => Some(c.kind),
            Expr::Param(_) => None,
            Expr::Literal(v) => v.kind(),
            Expr::Binary(_, l, r) => match (l.kind(), r.kind()) {
                (Some(ValueKind::Float), _) | (_, Some(ValueKind::Float)) => Some(ValueKind::Float),
                (Some(k), _) | (_, Some(k)) => Some(k),
                _ => None,
            },
            Expr::Neg(inner) => inner.kind(),
            Expr::Lower(_) | Expr::Upper(_) => Some(ValueKind::Text),
        }
    }

    pub fn column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    fn walk_params(&self, out: &mut Vec<usize>) {
        match self {
            Expr::Param(idx) => out.push(*idx),
            Expr::Binary(_, l, r) => {
                l.walk_params(out);
                r.walk_params(out);
            }
            Expr::Neg(inner) | Expr::Lower(inner) | Expr::Upper(inner) => inner.walk_params(out),
            Expr::Column(_) | Expr::Literal(_) => {}
        }
    }

    fn aliases<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Column(c) => out.push(&c.alias),
            Expr::Binary(_, l, r) => {
                l.aliases(out);
                r.aliases(out);
            }
            Expr::Neg(inner) | Expr::Lower(inner) | Expr::Upper(inner) => inner.aliases(out),
            Expr::Param(_) | Expr::Literal(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InList {
    /// A single list-valued parameter (`in :names`).
    Param(usize),
    Items(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare { left: Expr, op: CompareOp, right: Expr },
    Like { expr: Expr, pattern: Expr, negated: bool },
    In { expr: Expr, list: InList, negated: bool },
    Between { expr: Expr, low: Expr, high: Expr, negated: bool },
    IsNull { expr: Expr, negated: bool },
}

impl Predicate {
    pub fn and(parts: Vec<Predicate>) -> Predicate {
        if parts.len() == 1 {
            parts.into_iter().next().unwrap_or(Predicate::And(Vec::new()))
        } else {
            Predicate::And(parts)
        }
    }

    pub fn or(parts: Vec<Predicate>) -> Predicate {
        if parts.len() == 1 {
            parts.into_iter().next().unwrap_or(Predicate::Or(Vec::new()))
        } else {
            Predicate::Or(parts)
        }
    }

    pub(crate) fn params(&self, out: &mut Vec<usize>) {
        match self {
            Predicate::And(parts) | Predicate::Or(parts) => parts.iter().for_each(|p| p.params(out)),
            Predicate::Not(inner) => inner.params(out),
            Predicate::Compare { left, right, .. } => {
                left.walk_params(out);
                right.walk_params(out);
            }
            Predicate::Like { expr, pattern, .. } => {
                expr.walk_params(out);
                pattern.walk_params(out);
            }
            Predicate::In { expr, list, .. } => {
                expr.walk_params(out);
                match list {
                    InList::Param(idx) => out.push(*idx),
                    InList::Items(items) => items.iter().for_each(|e| e.walk_params(out)),
                }
            }
            Predicate::Between { expr, low, high, .. } => {
                expr.walk_params(out);
                low.walk_params(out);
                high.walk_params(out);
            }
            Predicate::IsNull { expr, .. } => expr.walk_params(out),
        }
    }

    pub(crate) fn aliases<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::And(parts) | Predicate::Or(parts) => parts.iter().for_each(|p| p.aliases(out)),
            Predicate::Not(inner) => inner.aliases(out),
            Predicate::Compare { left, right, .. } => {
                left.aliases(out);
                right.aliases(out);
            }
            Predicate::Like { expr, pattern, .. } => {
                expr.aliases(out);
                pattern.aliases(out);
            }
            Predicate::In { expr, list, .. } => {
                expr.aliases(out);
                if let InList::Items(items) = list {
                    items.iter().for_each(|e| e.aliases(out));
                }
            }
            Predicate::Between { expr, low, high, .. } => {
                expr.aliases(out);
                low.aliases(out);
                high.aliases(out);
            }
            Predicate::IsNull { expr, .. } => expr.aliases(out),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    /// Alias of the owning side.
    pub parent: String,
    pub relation: &'static Relation,
    pub alias: String,
    /// Load the joined rows into the owner's relation handle.
    pub fetch: bool,
}

impl Join {
    pub fn target(&self) -> &'static EntityMeta {
        self.relation.target()
    }
}

/// What a select statement returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// The root entity.
    Entity,
    /// One or more column expressions (scalar or tuple results).
    Columns(Vec<Expr>),
    /// Constructor projection: `new Dto(...)`.
    Constructor { type_name: String, args: Vec<Expr> },
    /// `count(...)`: `None` counts rows, `Some` counts non-null values.
    Count { expr: Option<Expr>, distinct: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct Select {
    pub root: &'static EntityMeta,
    pub alias: String,
    pub distinct: bool,
    pub selection: Selection,
    pub joins: Vec<Join>,
    pub filter: Option<Predicate>,
    pub order: Vec<OrderItem>,
    /// `Top N` / `First N` cap on the number of rows.
    pub limit: Option<u64>,
}

impl Select {
    pub fn all(root: &'static EntityMeta, alias: &str) -> Self {
        Self {
            root,
            alias: alias.to_string(),
            distinct: false,
            selection: Selection::Entity,
            joins: Vec::new(),
            filter: None,
            order: Vec::new(),
            limit: None,
        }
    }

    /// Select one entity by identifier; the identifier is parameter 0.
    pub fn by_id(root: &'static EntityMeta) -> Self {
        let mut select = Self::all(root, "e");
        select.filter = Some(Predicate::Compare {
            left: Expr::Column(id_column(root, "e")),
            op: CompareOp::Eq,
            right: Expr::Param(0),
        });
        select
    }

    /// Select the rows of `relation.target()` whose foreign key is parameter 0.
    pub fn by_foreign_key(relation: &'static Relation) -> Option<Self> {
        let target = relation.target();
        let column = relation.join_column()?;
        let kind = target
            .columns()
            .into_iter()
            .find(|(c, _)| *c == column)
            .map(|(_, k)| k)?;
        let mut select = Self::all(target, "e");
        select.filter = Some(Predicate::Compare {
            left: Expr::Column(ColumnRef {
                alias: "e".to_string(),
                column,
                name: relation.mapped_by,
                kind,
            }),
            op: CompareOp::Eq,
            right: Expr::Param(0),
        });
        Some(select)
    }

    /// The same query turned into a row count: no ordering, no fetch, no limit.
    pub fn to_count(&self) -> Select {
        let mut count = self.clone();
        count.order.clear();
        count.limit = None;
        for join in &mut count.joins {
            join.fetch = false;
        }
        // Fetch-only joins do not filter and would multiply rows.
        let mut referenced = Vec::new();
        if let Some(filter) = &count.filter {
            filter.aliases(&mut referenced);
        }
        let referenced: Vec<String> = referenced.into_iter().map(str::to_string).collect();
        count.joins.retain(|j| {
            j.kind == JoinKind::Inner || referenced.iter().any(|a| a == &j.alias)
        });
        let distinct = self.distinct
            || self.joins.iter().any(|j| {
                j.kind == JoinKind::Inner && j.relation.kind == crate::entity::RelationKind::OneToMany
            });
        count.selection = Selection::Count {
            expr: if distinct {
                Some(Expr::Column(id_column(self.root, &self.alias)))
            } else {
                None
            },
            distinct,
        };
        count.distinct = false;
        count
    }

    pub fn fetch_joins(&self) -> impl Iterator<Item = &Join> {
        self.joins.iter().filter(|j| j.fetch)
    }

    /// Entity metadata bound to `alias`.
    pub fn entity_for(&self, alias: &str) -> Option<&'static EntityMeta> {
        if alias == self.alias {
            return Some(self.root);
        }
        self.joins.iter().find(|j| j.alias == alias).map(Join::target)
    }

    pub fn param_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        match &self.selection {
            Selection::Columns(exprs) | Selection::Constructor { args: exprs, .. } => {
                exprs.iter().for_each(|e| e.walk_params(&mut out));
            }
            Selection::Count { expr: Some(e), .. } => e.walk_params(&mut out),
            Selection::Count { expr: None, .. } | Selection::Entity => {}
        }
        if let Some(filter) = &self.filter {
            filter.params(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: ColumnRef,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Update {
    pub root: &'static EntityMeta,
    pub alias: String,
    pub assignments: Vec<Assignment>,
    pub filter: Option<Predicate>,
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub root: &'static EntityMeta,
    pub alias: String,
    pub filter: Option<Predicate>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(Select),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn root(&self) -> &'static EntityMeta {
        match self {
            Statement::Select(s) => s.root,
            Statement::Update(u) => u.root,
            Statement::Delete(d) => d.root,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }

    pub fn param_indices(&self) -> Vec<usize> {
        match self {
            Statement::Select(s) => s.param_indices(),
            Statement::Update(u) => {
                let mut out = Vec::new();
                for a in &u.assignments {
                    a.value.walk_params(&mut out);
                }
                if let Some(filter) = &u.filter {
                    filter.params(&mut out);
                }
                out
            }
            Statement::Delete(d) => {
                let mut out = Vec::new();
                if let Some(filter) = &d.filter {
                    filter.params(&mut out);
                }
                out
            }
        }
    }
}

/// A statement with its placeholders, ready to be stored in a repository.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub statement: Statement,
    pub params: Vec<ParamSpec>,
    /// Number of call-site arguments the statement consumes.
    pub arity: usize,
}

/// How a `Like` parameter is wrapped before binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikeWrap {
    #[default]
    None,
    StartsWith,
    EndsWith,
    Contains,
}

/// Escape character of every `LIKE` pattern.
pub const LIKE_ESCAPE: char = '\\';

impl LikeWrap {
    /// Wrap an argument into a pattern. Wrapped arguments match literally:
    /// their own `%`, `_` and `\` are escaped.
    pub fn apply(self, text: &str) -> String {
        if self == LikeWrap::None {
            return text.to_string();
        }
        let mut escaped = String::with_capacity(text.len() + 2);
        for c in text.chars() {
            if matches!(c, '%' | '_' | LIKE_ESCAPE) {
                escaped.push(LIKE_ESCAPE);
            }
            escaped.push(c);
        }
        match self {
            LikeWrap::StartsWith => format!("{escaped}%"),
            LikeWrap::EndsWith => format!("%{escaped}"),
            LikeWrap::Contains | LikeWrap::None => format!("%{escaped}%"),
        }
    }
}

/// One placeholder of a compiled statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Placeholder name for named parameters.
    pub name: Option<String>,
    /// Index of the call-site argument feeding this placeholder.
    pub arg: usize,
    /// Expected kind, when inferable from the compared attribute.
    pub kind: Option<ValueKind>,
    /// Whether the argument must be a list (`In`).
    pub list: bool,
    pub like: LikeWrap,
}

impl ParamSpec {
    pub fn positional(arg: usize) -> Self {
        Self {
            name: None,
            arg,
            kind: None,
            list: false,
            like: LikeWrap::None,
        }
    }
}

pub(crate) fn id_column(meta: &'static EntityMeta, alias: &str) -> ColumnRef {
    let (column, kind) = meta
        .id_attribute()
        .map(|a| (a.column, a.kind))
        .unwrap_or((meta.id, ValueKind::Int));
    ColumnRef {
        alias: alias.to_string(),
        column,
        name: meta.id,
        kind,
    }
}

pub(crate) fn attribute_column(meta: &'static EntityMeta, alias: &str, name: &str) -> Option<ColumnRef> {
    meta.attribute(name).map(|a| ColumnRef {
        alias: alias.to_string(),
        column: a.column,
        name: a.name,
        kind: a.kind,
    })
}
