//! Query derivation from repository method names.
//!
//! `findDistinctTop3ByUsernameAndAgeGreaterThanOrderByAgeDesc` becomes a
//! select on the root entity with a predicate tree, a row cap and an
//! ordering. Names are parsed once, when the repository is built.

use super::{
    attribute_column, id_column, ColumnRef, CompareOp, Compiled, Expr, InList, Join, JoinKind,
    LikeWrap, OrderItem, ParamSpec, Predicate, Select, Selection, Statement,
};
use crate::entity::{EntityMeta, Relation, RelationKind};
use crate::error::RegistrationErrorKind;
use crate::page::Direction;
use crate::value::{Value, ValueKind};

const ROOT_ALIAS: &str = "e";

/// What the prefix of a derived method asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    /// `find`, `read`, `get`, `query`, `search`, `stream`
    Find,
    Count,
    Exists,
    /// `delete`, `remove`: load the matches and remove each one.
    Delete,
}

const PREFIXES: &[(&str, Subject)] = &[
    ("find", Subject::Find),
    ("read", Subject::Find),
    ("get", Subject::Find),
    ("query", Subject::Find),
    ("search", Subject::Find),
    ("stream", Subject::Find),
    ("count", Subject::Count),
    ("exists", Subject::Exists),
    ("delete", Subject::Delete),
    ("remove", Subject::Delete),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    In,
    NotIn,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    NotContaining,
    IsNull,
    IsNotNull,
    True,
    False,
}

impl Op {
    fn is_textual(self) -> bool {
        matches!(
            self,
            Op::Like | Op::NotLike | Op::StartingWith | Op::EndingWith | Op::Containing | Op::NotContaining
        )
    }
}

/// Operator keywords; matched as suffixes, longest first.
const KEYWORDS: &[(&str, Op)] = &[
    ("IsNotNull", Op::IsNotNull),
    ("NotNull", Op::IsNotNull),
    ("IsNull", Op::IsNull),
    ("Null", Op::IsNull),
    ("IsLessThanEqual", Op::Le),
    ("LessThanEqual", Op::Le),
    ("IsLessThan", Op::Lt),
    ("LessThan", Op::Lt),
    ("IsGreaterThanEqual", Op::Ge),
    ("GreaterThanEqual", Op::Ge),
    ("IsGreaterThan", Op::Gt),
    ("GreaterThan", Op::Gt),
    ("IsBefore", Op::Lt),
    ("Before", Op::Lt),
    ("IsAfter", Op::Gt),
    ("After", Op::Gt),
    ("IsBetween", Op::Between),
    ("Between", Op::Between),
    ("IsNotLike", Op::NotLike),
    ("NotLike", Op::NotLike),
    ("IsLike", Op::Like),
    ("Like", Op::Like),
    ("IsStartingWith", Op::StartingWith),
    ("StartingWith", Op::StartingWith),
    ("StartsWith", Op::StartingWith),
    ("IsEndingWith", Op::EndingWith),
    ("EndingWith", Op::EndingWith),
    ("EndsWith", Op::EndingWith),
    ("IsNotContaining", Op::NotContaining),
    ("NotContaining", Op::NotContaining),
    ("NotContains", Op::NotContaining),
    ("IsContaining", Op::Containing),
    ("Containing", Op::Containing),
    ("Contains", Op::Containing),
    ("IsNotIn", Op::NotIn),
    ("NotIn", Op::NotIn),
    ("IsIn", Op::In),
    ("In", Op::In),
    ("IsTrue", Op::True),
    ("True", Op::True),
    ("IsFalse", Op::False),
    ("False", Op::False),
    ("IsNot", Op::NotEq),
    ("Not", Op::NotEq),
    ("Equals", Op::Eq),
    ("Is", Op::Eq),
];

/// A compiled derived query and the kind of result its prefix implies.
#[derive(Debug, Clone)]
pub struct Derived {
    pub subject: Subject,
    pub compiled: Compiled,
}

/// Turn `find_by_username` into `findByUsername`. Camel-case names pass
/// through untouched.
pub fn normalize(name: &str) -> String {
    let is_snake = name.contains('_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !is_snake {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    for (idx, part) in name.split('_').filter(|p| !p.is_empty()).enumerate() {
        if idx == 0 {
            out.push_str(part);
        } else {
            out.push_str(&capitalize(part));
        }
    }
    out
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// `TeamName` → `team_name`.
fn snake_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len() + 4);
    for (idx, c) in word.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Split a PascalCase word into its capitalized parts.
fn words(word: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, c) in word.char_indices() {
        if idx > start && c.is_ascii_uppercase() {
            out.push(&word[start..idx]);
            start = idx;
        }
    }
    if start < word.len() {
        out.push(&word[start..]);
    }
    out
}

fn followed_by_upper_or_end(s: &str, at: usize) -> bool {
    s[at..].chars().next().map_or(true, |c| c.is_ascii_uppercase())
}

/// Split on `sep` where it is followed by an uppercase letter.
fn split_keyword<'a>(s: &'a str, sep: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(found) = s[search..].find(sep) {
        let at = search + found;
        let after = at + sep.len();
        if at > start && after < s.len() && followed_by_upper_or_end(s, after) {
            out.push(&s[start..at]);
            start = after;
        }
        search = after;
    }
    out.push(&s[start..]);
    out
}

fn malformed(msg: impl Into<String>) -> RegistrationErrorKind {
    RegistrationErrorKind::MalformedMethodName(msg.into())
}

/// Compile a method name against the root entity.
pub fn compile(method: &str, root: &'static EntityMeta) -> Result<Derived, RegistrationErrorKind> {
    let name = normalize(method);

    let (prefix, subject) = PREFIXES
        .iter()
        .filter(|(p, _)| name.starts_with(p) && followed_by_upper_or_end(&name, p.len()))
        .max_by_key(|(p, _)| p.len())
        .copied()
        .ok_or_else(|| malformed(format!("'{method}' does not start with a query prefix")))?;
    let rest = &name[prefix.len()..];

    // Subject runs up to the first `By`; a leading `OrderBy` means no criteria.
    let mut by_at = None;
    let mut search = 0;
    while let Some(found) = rest[search..].find("By") {
        let at = search + found;
        if followed_by_upper_or_end(rest, at + 2) {
            by_at = Some(at);
            break;
        }
        search = at + 2;
    }
    let (subject_text, criteria) = match by_at {
        Some(at) if rest[..at].ends_with("Order") => (&rest[..at - "Order".len()], &rest[at - "Order".len()..]),
        Some(at) => (&rest[..at], &rest[at + 2..]),
        None => (rest, ""),
    };

    let distinct = subject_text.contains("Distinct");
    let limit = parse_limit(subject_text)?;

    let (predicate_text, order_text) = match criteria.find("OrderBy") {
        Some(at) => (&criteria[..at], Some(&criteria[at + "OrderBy".len()..])),
        None => (criteria, None),
    };

    let mut builder = Builder {
        root,
        joins: Vec::new(),
        params: Vec::new(),
        next_arg: 0,
    };

    let filter = builder.predicate(predicate_text)?;
    let order = match order_text {
        Some(text) => builder.order(text)?,
        None => Vec::new(),
    };

    let selection = match subject {
        Subject::Count if distinct => Selection::Count {
            expr: Some(Expr::Column(id_column(root, ROOT_ALIAS))),
            distinct: true,
        },
        Subject::Count => Selection::Count {
            expr: None,
            distinct: false,
        },
        Subject::Exists => Selection::Columns(vec![Expr::Column(id_column(root, ROOT_ALIAS))]),
        Subject::Find | Subject::Delete => Selection::Entity,
    };
    let limit = match subject {
        Subject::Exists => Some(1),
        Subject::Count => None,
        Subject::Find | Subject::Delete => limit,
    };

    let select = Select {
        root,
        alias: ROOT_ALIAS.to_string(),
        distinct: distinct && subject != Subject::Count,
        selection,
        joins: builder.joins,
        filter,
        order,
        limit,
    };

    Ok(Derived {
        subject,
        compiled: Compiled {
            statement: Statement::Select(select),
            params: builder.params,
            arity: builder.next_arg,
        },
    })
}

/// `Top3`, `First10`, `First` (= 1) anywhere in the subject.
fn parse_limit(subject: &str) -> Result<Option<u64>, RegistrationErrorKind> {
    for keyword in ["Top", "First"] {
        let mut search = 0;
        while let Some(found) = subject[search..].find(keyword) {
            let at = search + found + keyword.len();
            let digits: String = subject[at..].chars().take_while(char::is_ascii_digit).collect();
            let after = at + digits.len();
            if followed_by_upper_or_end(subject, after) {
                if digits.is_empty() {
                    return Ok(Some(1));
                }
                let n: u64 = digits
                    .parse()
                    .map_err(|_| malformed(format!("invalid row limit '{keyword}{digits}'")))?;
                if n == 0 {
                    return Err(malformed(format!("'{keyword}0' selects no rows")));
                }
                return Ok(Some(n));
            }
            search = at;
        }
    }
    Ok(None)
}

struct Builder {
    root: &'static EntityMeta,
    joins: Vec<Join>,
    params: Vec<ParamSpec>,
    next_arg: usize,
}

/// A resolved property: the column and the relation hops leading to it.
struct Resolved {
    hops: Vec<&'static Relation>,
    column: ColumnResolution,
}

enum ColumnResolution {
    Attribute(&'static str, &'static EntityMeta),
    /// A many-to-one relation compared by its foreign key.
    ForeignKey(&'static Relation),
}

impl Builder {
    fn predicate(&mut self, text: &str) -> Result<Option<Predicate>, RegistrationErrorKind> {
        if text.is_empty() {
            return Ok(None);
        }
        let (text, all_ignore_case) = match text
            .strip_suffix("AllIgnoreCase")
            .or_else(|| text.strip_suffix("AllIgnoringCase"))
        {
            Some(stripped) => (stripped, true),
            None => (text, false),
        };

        let mut alternatives = Vec::new();
        for or_part in split_keyword(text, "Or") {
            let mut clauses = Vec::new();
            for part in split_keyword(or_part, "And") {
                if part.is_empty() {
                    return Err(malformed(format!("empty clause in '{text}'")));
                }
                clauses.push(self.clause(part, all_ignore_case)?);
            }
            alternatives.push(Predicate::and(clauses));
        }
        Ok(Some(Predicate::or(alternatives)))
    }

    fn clause(&mut self, part: &str, all_ignore_case: bool) -> Result<Predicate, RegistrationErrorKind> {
        let (part, explicit_ignore_case) = match part
            .strip_suffix("IgnoreCase")
            .or_else(|| part.strip_suffix("IgnoringCase"))
        {
            Some(stripped) => (stripped, true),
            None => (part, false),
        };

        let mut candidates: Vec<(&str, Op)> = KEYWORDS
            .iter()
            .filter(|(kw, _)| part.len() > kw.len() && part.ends_with(kw))
            .copied()
            .collect();
        candidates.sort_by_key(|(kw, _)| std::cmp::Reverse(kw.len()));

        let mut chosen = None;
        for (kw, op) in &candidates {
            let property = &part[..part.len() - kw.len()];
            if let Some(resolved) = self.resolve(property) {
                chosen = Some((resolved, *op));
                break;
            }
        }
        let (resolved, op) = match chosen {
            Some(found) => found,
            None => match self.resolve(part) {
                Some(resolved) => (resolved, Op::Eq),
                None => {
                    let property = candidates
                        .first()
                        .map(|(kw, _)| &part[..part.len() - kw.len()])
                        .unwrap_or(part);
                    return Err(RegistrationErrorKind::UnknownAttribute {
                        entity: self.root.name.to_string(),
                        attribute: lower_first(property),
                    });
                }
            },
        };

        let column = self.column(&resolved);
        let kind = column.kind;
        let ignore_case = explicit_ignore_case || (all_ignore_case && kind == ValueKind::Text);
        if ignore_case && kind != ValueKind::Text {
            return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                "IgnoreCase requires a text attribute, '{}' is {kind}",
                column.name
            )));
        }
        if op.is_textual() && kind != ValueKind::Text {
            return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                "'{part}' needs a text attribute, '{}' is {kind}",
                column.name
            )));
        }
        if matches!(op, Op::True | Op::False) && kind != ValueKind::Bool {
            return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                "'{part}' needs a boolean attribute, '{}' is {kind}",
                column.name
            )));
        }

        let wrap = |e: Expr| if ignore_case { Expr::Lower(Box::new(e)) } else { e };
        let left = wrap(Expr::Column(column));

        Ok(match op {
            Op::IsNull | Op::IsNotNull => Predicate::IsNull {
                expr: left,
                negated: op == Op::IsNotNull,
            },
            Op::True | Op::False => Predicate::Compare {
                left,
                op: CompareOp::Eq,
                right: Expr::Literal(Value::Bool(op == Op::True)),
            },
            Op::Between => {
                let low = self.param(kind, false, LikeWrap::None);
                let high = self.param(kind, false, LikeWrap::None);
                Predicate::Between {
                    expr: left,
                    low: wrap(low),
                    high: wrap(high),
                    negated: false,
                }
            }
            Op::In | Op::NotIn => {
                let idx = self.param_index(kind, true, LikeWrap::None);
                Predicate::In {
                    expr: left,
                    list: InList::Param(idx),
                    negated: op == Op::NotIn,
                }
            }
            Op::Like | Op::NotLike | Op::StartingWith | Op::EndingWith | Op::Containing | Op::NotContaining => {
                let like = match op {
                    Op::StartingWith => LikeWrap::StartsWith,
                    Op::EndingWith => LikeWrap::EndsWith,
                    Op::Containing | Op::NotContaining => LikeWrap::Contains,
                    _ => LikeWrap::None,
                };
                let pattern = self.param(kind, false, like);
                Predicate::Like {
                    expr: left,
                    pattern: wrap(pattern),
                    negated: matches!(op, Op::NotLike | Op::NotContaining),
                }
            }
            Op::Eq | Op::NotEq | Op::Gt | Op::Ge | Op::Lt | Op::Le => {
                let cmp = match op {
                    Op::Eq => CompareOp::Eq,
                    Op::NotEq => CompareOp::NotEq,
                    Op::Gt => CompareOp::Gt,
                    Op::Ge => CompareOp::Ge,
                    Op::Lt => CompareOp::Lt,
                    _ => CompareOp::Le,
                };
                let right = self.param(kind, false, LikeWrap::None);
                Predicate::Compare {
                    left,
                    op: cmp,
                    right: wrap(right),
                }
            }
        })
    }

    fn param(&mut self, kind: ValueKind, list: bool, like: LikeWrap) -> Expr {
        Expr::Param(self.param_index(kind, list, like))
    }

    /// Consume the next call-site argument.
    fn param_index(&mut self, kind: ValueKind, list: bool, like: LikeWrap) -> usize {
        self.params.push(ParamSpec {
            name: None,
            arg: self.next_arg,
            kind: Some(kind),
            list,
            like,
        });
        self.next_arg += 1;
        self.params.len() - 1
    }

    fn order(&mut self, text: &str) -> Result<Vec<OrderItem>, RegistrationErrorKind> {
        if text.is_empty() {
            return Err(malformed("OrderBy without a property"));
        }
        let mut items = Vec::new();
        let mut start = 0;
        let mut idx = 0;
        while idx < text.len() {
            let rest = &text[idx..];
            let matched = ["Desc", "Asc"]
                .into_iter()
                .find(|d| rest.starts_with(d) && followed_by_upper_or_end(text, idx + d.len()));
            match matched {
                Some(dir) if idx > start => {
                    items.push(self.order_item(&text[start..idx], dir == "Asc")?);
                    idx += dir.len();
                    start = idx;
                }
                _ => idx += rest.chars().next().map_or(1, char::len_utf8),
            }
        }
        if start < text.len() {
            items.push(self.order_item(&text[start..], true)?);
        }
        Ok(items)
    }

    fn order_item(&mut self, property: &str, ascending: bool) -> Result<OrderItem, RegistrationErrorKind> {
        let resolved = self.resolve(property).ok_or_else(|| RegistrationErrorKind::UnknownAttribute {
            entity: self.root.name.to_string(),
            attribute: lower_first(property),
        })?;
        Ok(OrderItem {
            expr: Expr::Column(self.column(&resolved)),
            direction: if ascending { Direction::Asc } else { Direction::Desc },
        })
    }

    fn resolve(&self, property: &str) -> Option<Resolved> {
        if property.is_empty() {
            return None;
        }
        if property.contains('_') {
            let segments: Vec<&str> = property.split('_').collect();
            return resolve_segments(self.root, &segments);
        }
        resolve_words(self.root, &words(property))
    }

    /// Add joins for the hops and return the final column.
    fn column(&mut self, resolved: &Resolved) -> ColumnRef {
        let mut alias = ROOT_ALIAS.to_string();
        for relation in &resolved.hops {
            alias = self.join(&alias, relation);
        }
        match resolved.column {
            ColumnResolution::Attribute(name, meta) => attribute_column(meta, &alias, name)
                .unwrap_or_else(|| id_column(meta, &alias)),
            ColumnResolution::ForeignKey(relation) => ColumnRef {
                alias,
                column: relation.column,
                name: relation.name,
                kind: relation
                    .target()
                    .id_attribute()
                    .map(|a| a.kind)
                    .unwrap_or(ValueKind::Int),
            },
        }
    }

    fn join(&mut self, parent: &str, relation: &'static Relation) -> String {
        if let Some(existing) = self
            .joins
            .iter()
            .find(|j| j.parent == parent && std::ptr::eq(j.relation, relation))
        {
            return existing.alias.clone();
        }
        let alias = format!("{parent}_{}", relation.name);
        self.joins.push(Join {
            kind: JoinKind::Inner,
            parent: parent.to_string(),
            relation,
            alias: alias.clone(),
            fetch: false,
        });
        alias
    }
}

fn lower_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Resolve `Team_Name`-style segments: every segment but the last is a relation.
fn resolve_segments(meta: &'static EntityMeta, segments: &[&str]) -> Option<Resolved> {
    let (last, hops) = segments.split_last()?;
    let mut current = meta;
    let mut relations = Vec::new();
    for hop in hops {
        let relation = current
            .relation(&snake_case(hop))
            .filter(|r| r.kind == RelationKind::ManyToOne)?;
        relations.push(relation);
        current = relation.target();
    }
    let mut tail = resolve_words(current, &words(last))?;
    relations.append(&mut tail.hops);
    Some(Resolved {
        hops: relations,
        column: tail.column,
    })
}

/// Resolve PascalCase words, preferring a plain attribute and then the
/// longest relation-name prefix.
fn resolve_words(meta: &'static EntityMeta, parts: &[&str]) -> Option<Resolved> {
    if parts.is_empty() {
        return None;
    }
    let whole = snake_case(&parts.concat());
    if let Some(attr) = meta.attribute(&whole) {
        return Some(Resolved {
            hops: Vec::new(),
            column: ColumnResolution::Attribute(attr.name, meta),
        });
    }
    if let Some(relation) = meta.relation(&whole).filter(|r| r.kind == RelationKind::ManyToOne) {
        return Some(Resolved {
            hops: Vec::new(),
            column: ColumnResolution::ForeignKey(relation),
        });
    }
    for split in (1..parts.len()).rev() {
        let head = snake_case(&parts[..split].concat());
        let Some(relation) = meta.relation(&head).filter(|r| r.kind == RelationKind::ManyToOne) else {
            continue;
        };
        if let Some(mut tail) = resolve_words(relation.target(), &parts[split..]) {
            tail.hops.insert(0, relation);
            return Some(tail);
        }
    }
    None
}
