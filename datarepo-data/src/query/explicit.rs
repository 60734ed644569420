//! Parser for explicit query strings.
//!
//! Supports a JPQL-like subset:
//!
//! ```text
//! select [distinct] items from Entity alias join* [where cond] [order by ...]
//! update Entity alias set path = expr (, path = expr)* [where cond]
//! delete from Entity alias [where cond]
//! ```
//!
//! Parsing produces a raw tree first; names are resolved against the
//! [`EntityCatalog`] in a second pass, once every alias is known.

use super::lexer::{tokenize, Spanned, Token};
use super::{
    ArithOp, Assignment, ColumnRef, CompareOp, Compiled, Delete, Expr, InList, Join, JoinKind,
    OrderItem, ParamSpec, Predicate, Select, Selection, Statement, Update,
};
use crate::catalog::EntityCatalog;
use crate::entity::{EntityMeta, RelationKind};
use crate::error::RegistrationErrorKind;
use crate::page::Direction;
use crate::value::{Value, ValueKind};

/// Compile an explicit query against `catalog`.
///
/// `params` are the declared parameter names, in call-site order; named
/// placeholders resolve through them.
pub fn compile(
    text: &str,
    catalog: &EntityCatalog,
    params: &[String],
) -> Result<Compiled, RegistrationErrorKind> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };
    let raw = parser.statement()?;
    if let Some(extra) = parser.peek() {
        return Err(parser.error_at(extra.pos, format!("unexpected {}", extra.token.describe())));
    }
    Resolver::new(catalog, params).statement(raw)
}

// ── Raw tree ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum RawParam {
    Named(String),
    Positional(usize),
}

#[derive(Debug, Clone)]
enum RawExpr {
    Path(Vec<String>, usize),
    Param(RawParam, usize),
    Literal(Value),
    Binary(ArithOp, Box<RawExpr>, Box<RawExpr>),
    Neg(Box<RawExpr>),
    Lower(Box<RawExpr>),
    Upper(Box<RawExpr>),
}

#[derive(Debug, Clone)]
enum RawInList {
    Param(RawParam, usize),
    Items(Vec<RawExpr>),
}

#[derive(Debug, Clone)]
enum RawPred {
    And(Vec<RawPred>),
    Or(Vec<RawPred>),
    Not(Box<RawPred>),
    Compare(RawExpr, CompareOp, RawExpr),
    Like(RawExpr, RawExpr, bool),
    In(RawExpr, RawInList, bool),
    Between(RawExpr, RawExpr, RawExpr, bool),
    IsNull(RawExpr, bool),
}

#[derive(Debug)]
enum RawItems {
    Exprs(Vec<RawExpr>),
    /// `count([distinct] target)`; `None` is `count(*)`.
    Count(bool, Option<RawExpr>),
    New(String, Vec<RawExpr>),
}

#[derive(Debug)]
struct RawJoin {
    kind: JoinKind,
    fetch: bool,
    parent: String,
    relation: String,
    alias: Option<String>,
    pos: usize,
}

#[derive(Debug)]
struct RawFrom {
    entity: String,
    alias: String,
}

#[derive(Debug)]
enum RawStatement {
    Select {
        distinct: bool,
        items: RawItems,
        from: RawFrom,
        joins: Vec<RawJoin>,
        filter: Option<RawPred>,
        order: Vec<(RawExpr, Direction)>,
    },
    Update {
        from: RawFrom,
        sets: Vec<(RawExpr, RawExpr)>,
        filter: Option<RawPred>,
    },
    Delete {
        from: RawFrom,
        filter: Option<RawPred>,
    },
}

const RESERVED: &[&str] = &[
    "select", "from", "where", "join", "left", "inner", "outer", "fetch", "on", "order", "by",
    "and", "or", "not", "set", "as", "in", "like", "between", "is", "null", "group", "having",
];

// ── Parser ──────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

type ParseResult<T> = Result<T, RegistrationErrorKind>;

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|s| &s.token)
    }

    fn here(&self) -> usize {
        self.peek().map(|s| s.pos).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> RegistrationErrorKind {
        RegistrationErrorKind::Syntax {
            position,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> RegistrationErrorKind {
        match self.peek() {
            Some(s) => self.error_at(s.pos, format!("expected {expected}, found {}", s.token.describe())),
            None => self.error_at(self.end, format!("expected {expected}, found end of query")),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek_token().is_some_and(|t| t.is_keyword(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&keyword.to_uppercase()))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> ParseResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&token.describe()))
        }
    }

    /// An identifier that is not a reserved word.
    fn name(&mut self, what: &str) -> ParseResult<(String, usize)> {
        let found = match self.peek() {
            Some(Spanned {
                token: Token::Ident(word),
                pos,
            }) if !is_reserved(word) => Some((word.clone(), *pos)),
            _ => None,
        };
        match found {
            Some(out) => {
                self.pos += 1;
                Ok(out)
            }
            None => Err(self.unexpected(what)),
        }
    }

    fn optional_alias(&mut self) -> ParseResult<Option<String>> {
        if self.eat_keyword("as") {
            return self.name("alias").map(|(n, _)| Some(n));
        }
        let is_alias = matches!(self.peek_token(), Some(Token::Ident(word)) if !is_reserved(word));
        if is_alias {
            self.name("alias").map(|(n, _)| Some(n))
        } else {
            Ok(None)
        }
    }

    fn statement(&mut self) -> ParseResult<RawStatement> {
        if self.eat_keyword("select") {
            self.select()
        } else if self.eat_keyword("update") {
            self.update()
        } else if self.eat_keyword("delete") {
            self.expect_keyword("from")?;
            let from = self.from_clause()?;
            let filter = self.where_clause()?;
            Ok(RawStatement::Delete { from, filter })
        } else {
            Err(self.unexpected("SELECT, UPDATE or DELETE"))
        }
    }

    fn from_clause(&mut self) -> ParseResult<RawFrom> {
        let (entity, _) = self.name("entity name")?;
        let alias = self
            .optional_alias()?
            .ok_or_else(|| self.unexpected("alias"))?;
        Ok(RawFrom { entity, alias })
    }

    fn where_clause(&mut self) -> ParseResult<Option<RawPred>> {
        if self.eat_keyword("where") {
            self.condition().map(Some)
        } else {
            Ok(None)
        }
    }

    fn select(&mut self) -> ParseResult<RawStatement> {
        let distinct = self.eat_keyword("distinct");
        let items = self.items()?;
        self.expect_keyword("from")?;
        let from = self.from_clause()?;

        let mut joins = Vec::new();
        loop {
            let pos = self.here();
            let kind = if self.eat_keyword("left") {
                self.eat_keyword("outer");
                JoinKind::Left
            } else {
                self.eat_keyword("inner");
                JoinKind::Inner
            };
            if !self.eat_keyword("join") {
                if self.here() != pos {
                    return Err(self.unexpected("JOIN"));
                }
                break;
            }
            let fetch = self.eat_keyword("fetch");
            let (parent, _) = self.name("join path")?;
            self.expect(Token::Dot)?;
            let (relation, _) = self.name("relation name")?;
            let alias = self.optional_alias()?;
            joins.push(RawJoin {
                kind,
                fetch,
                parent,
                relation,
                alias,
                pos,
            });
        }

        let filter = self.where_clause()?;

        let mut order = Vec::new();
        if self.eat_keyword("order") {
            self.expect_keyword("by")?;
            loop {
                let expr = self.expr()?;
                let direction = if self.eat_keyword("desc") {
                    Direction::Desc
                } else {
                    self.eat_keyword("asc");
                    Direction::Asc
                };
                order.push((expr, direction));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        Ok(RawStatement::Select {
            distinct,
            items,
            from,
            joins,
            filter,
            order,
        })
    }

    fn items(&mut self) -> ParseResult<RawItems> {
        if self.at_keyword("count") && self.peek_at(1) == Some(&Token::LParen) {
            self.pos += 2;
            let distinct = self.eat_keyword("distinct");
            let target = if self.eat(&Token::Star) {
                None
            } else {
                Some(self.expr()?)
            };
            self.expect(Token::RParen)?;
            return Ok(RawItems::Count(distinct, target));
        }
        if self.eat_keyword("new") {
            let (mut name, _) = self.name("projection type")?;
            while self.eat(&Token::Dot) {
                let (part, _) = self.name("projection type")?;
                name.push('.');
                name.push_str(&part);
            }
            self.expect(Token::LParen)?;
            let mut args = vec![self.expr()?];
            while self.eat(&Token::Comma) {
                args.push(self.expr()?);
            }
            self.expect(Token::RParen)?;
            return Ok(RawItems::New(name, args));
        }
        let mut exprs = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(RawItems::Exprs(exprs))
    }

    fn update(&mut self) -> ParseResult<RawStatement> {
        let from = self.from_clause()?;
        self.expect_keyword("set")?;
        let mut sets = Vec::new();
        loop {
            let target = self.path()?;
            self.expect(Token::Eq)?;
            let value = self.expr()?;
            sets.push((target, value));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let filter = self.where_clause()?;
        Ok(RawStatement::Update { from, sets, filter })
    }

    fn condition(&mut self) -> ParseResult<RawPred> {
        let mut parts = vec![self.conjunction()?];
        while self.eat_keyword("or") {
            parts.push(self.conjunction()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            RawPred::Or(parts)
        })
    }

    fn conjunction(&mut self) -> ParseResult<RawPred> {
        let mut parts = vec![self.unary()?];
        while self.eat_keyword("and") {
            parts.push(self.unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            RawPred::And(parts)
        })
    }

    fn unary(&mut self) -> ParseResult<RawPred> {
        if self.eat_keyword("not") {
            return Ok(RawPred::Not(Box::new(self.unary()?)));
        }
        if self.peek_token() == Some(&Token::LParen) {
            // A parenthesis opens either a nested condition or an expression.
            let saved = self.pos;
            self.pos += 1;
            if let Ok(inner) = self.condition() {
                if self.eat(&Token::RParen) && !self.continues_predicate() {
                    return Ok(inner);
                }
            }
            self.pos = saved;
        }
        self.predicate()
    }

    fn continues_predicate(&self) -> bool {
        match self.peek_token() {
            Some(
                Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::Le
                | Token::Gt
                | Token::Ge
                | Token::Plus
                | Token::Minus
                | Token::Star
                | Token::Slash,
            ) => true,
            Some(t) => ["in", "like", "between", "is", "not"].iter().any(|k| t.is_keyword(k)),
            None => false,
        }
    }

    fn predicate(&mut self) -> ParseResult<RawPred> {
        let left = self.expr()?;
        let op = match self.peek_token() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::NotEq) => Some(CompareOp::NotEq),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.expr()?;
            return Ok(RawPred::Compare(left, op, right));
        }
        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            self.expect_keyword("null")?;
            return Ok(RawPred::IsNull(left, negated));
        }
        let negated = self.eat_keyword("not");
        if self.eat_keyword("in") {
            let list = match self.peek().cloned() {
                Some(Spanned {
                    token: Token::Named(name),
                    pos,
                }) => {
                    self.pos += 1;
                    RawInList::Param(RawParam::Named(name), pos)
                }
                Some(Spanned {
                    token: Token::Positional(n),
                    pos,
                }) => {
                    self.pos += 1;
                    RawInList::Param(RawParam::Positional(n), pos)
                }
                _ => {
                    self.expect(Token::LParen)?;
                    let mut items = vec![self.expr()?];
                    while self.eat(&Token::Comma) {
                        items.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    RawInList::Items(items)
                }
            };
            return Ok(RawPred::In(left, list, negated));
        }
        if self.eat_keyword("like") {
            let pattern = self.expr()?;
            return Ok(RawPred::Like(left, pattern, negated));
        }
        if self.eat_keyword("between") {
            let low = self.expr()?;
            self.expect_keyword("and")?;
            let high = self.expr()?;
            return Ok(RawPred::Between(left, low, high, negated));
        }
        Err(self.unexpected("comparison operator"))
    }

    fn expr(&mut self) -> ParseResult<RawExpr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = RawExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> ParseResult<RawExpr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.factor()?;
            left = RawExpr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn factor(&mut self) -> ParseResult<RawExpr> {
        let Some(Spanned { token, pos }) = self.peek().cloned() else {
            return Err(self.unexpected("expression"));
        };
        match token {
            Token::Named(name) => {
                self.pos += 1;
                Ok(RawExpr::Param(RawParam::Named(name), pos))
            }
            Token::Positional(n) => {
                self.pos += 1;
                Ok(RawExpr::Param(RawParam::Positional(n), pos))
            }
            Token::Int(i) => {
                self.pos += 1;
                Ok(RawExpr::Literal(Value::Int(i)))
            }
            Token::Float(f) => {
                self.pos += 1;
                Ok(RawExpr::Literal(Value::Float(f)))
            }
            Token::Text(s) => {
                self.pos += 1;
                Ok(RawExpr::Literal(Value::Text(s)))
            }
            Token::Minus => {
                self.pos += 1;
                Ok(RawExpr::Neg(Box::new(self.factor()?)))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(word) => {
                if word.eq_ignore_ascii_case("true") || word.eq_ignore_ascii_case("false") {
                    self.pos += 1;
                    return Ok(RawExpr::Literal(Value::Bool(word.eq_ignore_ascii_case("true"))));
                }
                if word.eq_ignore_ascii_case("null") {
                    self.pos += 1;
                    return Ok(RawExpr::Literal(Value::Null));
                }
                let is_call = self.peek_at(1) == Some(&Token::LParen);
                if is_call && (word.eq_ignore_ascii_case("lower") || word.eq_ignore_ascii_case("upper")) {
                    self.pos += 2;
                    let inner = Box::new(self.expr()?);
                    self.expect(Token::RParen)?;
                    return Ok(if word.eq_ignore_ascii_case("lower") {
                        RawExpr::Lower(inner)
                    } else {
                        RawExpr::Upper(inner)
                    });
                }
                if is_call {
                    return Err(self.error_at(pos, format!("unsupported function '{word}'")));
                }
                self.path()
            }
            other => Err(self.error_at(pos, format!("expected expression, found {}", other.describe()))),
        }
    }

    fn path(&mut self) -> ParseResult<RawExpr> {
        let (first, pos) = self.name("path")?;
        let mut segments = vec![first];
        while self.eat(&Token::Dot) {
            match self.advance() {
                Some(Spanned {
                    token: Token::Ident(word),
                    ..
                }) => segments.push(word),
                _ => return Err(self.error_at(self.here(), "expected attribute name after '.'")),
            }
        }
        Ok(RawExpr::Path(segments, pos))
    }
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| word.eq_ignore_ascii_case(k))
}

// ── Resolution ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholders {
    Named,
    Positional,
}

struct Resolver<'a> {
    catalog: &'a EntityCatalog,
    declared: &'a [String],
    root: Option<&'static EntityMeta>,
    root_alias: String,
    joins: Vec<Join>,
    params: Vec<ParamSpec>,
    style: Option<Placeholders>,
    max_position: usize,
}

impl<'a> Resolver<'a> {
    fn new(catalog: &'a EntityCatalog, declared: &'a [String]) -> Self {
        Self {
            catalog,
            declared,
            root: None,
            root_alias: String::new(),
            joins: Vec::new(),
            params: Vec::new(),
            style: None,
            max_position: 0,
        }
    }

    fn statement(mut self, raw: RawStatement) -> Result<Compiled, RegistrationErrorKind> {
        let statement = match raw {
            RawStatement::Select {
                distinct,
                items,
                from,
                joins,
                filter,
                order,
            } => {
                let root = self.bind_root(&from)?;
                for join in joins {
                    self.bind_join(join)?;
                }
                let selection = self.selection(items)?;
                let filter = filter.map(|p| self.predicate(p)).transpose()?;
                let order = order
                    .into_iter()
                    .map(|(expr, direction)| {
                        Ok(OrderItem {
                            expr: self.expr(expr)?,
                            direction,
                        })
                    })
                    .collect::<Result<Vec<_>, RegistrationErrorKind>>()?;
                Statement::Select(Select {
                    root,
                    alias: self.root_alias.clone(),
                    distinct,
                    selection,
                    joins: std::mem::take(&mut self.joins),
                    filter,
                    order,
                    limit: None,
                })
            }
            RawStatement::Update { from, sets, filter } => {
                let root = self.bind_root(&from)?;
                let mut assignments = Vec::with_capacity(sets.len());
                for (target, value) in sets {
                    let column = match self.expr(target)? {
                        Expr::Column(column) if column.alias == self.root_alias => column,
                        _ => {
                            return Err(RegistrationErrorKind::InvalidDeclaration(
                                "SET targets must be attributes of the updated entity".into(),
                            ))
                        }
                    };
                    let value = self.expr(value)?;
                    self.hint(&value, Some(column.kind));
                    assignments.push(Assignment { column, value });
                }
                let filter = filter.map(|p| self.predicate(p)).transpose()?;
                self.no_joins("UPDATE")?;
                Statement::Update(Update {
                    root,
                    alias: self.root_alias.clone(),
                    assignments,
                    filter,
                })
            }
            RawStatement::Delete { from, filter } => {
                let root = self.bind_root(&from)?;
                let filter = filter.map(|p| self.predicate(p)).transpose()?;
                self.no_joins("DELETE")?;
                Statement::Delete(Delete {
                    root,
                    alias: self.root_alias.clone(),
                    filter,
                })
            }
        };

        let arity = match self.style {
            Some(Placeholders::Positional) => self.max_position.max(self.declared.len()),
            _ => self.declared.len(),
        };
        Ok(Compiled {
            statement,
            params: self.params,
            arity,
        })
    }

    fn no_joins(&self, what: &str) -> Result<(), RegistrationErrorKind> {
        if self.joins.is_empty() {
            Ok(())
        } else {
            Err(RegistrationErrorKind::InvalidDeclaration(format!(
                "{what} statements cannot navigate relations"
            )))
        }
    }

    fn bind_root(&mut self, from: &RawFrom) -> Result<&'static EntityMeta, RegistrationErrorKind> {
        let meta = self
            .catalog
            .get(&from.entity)
            .ok_or_else(|| RegistrationErrorKind::UnknownEntity(from.entity.clone()))?;
        self.root = Some(meta);
        self.root_alias = from.alias.clone();
        Ok(meta)
    }

    fn entity_for(&self, alias: &str) -> Option<&'static EntityMeta> {
        if alias == self.root_alias {
            return self.root;
        }
        self.joins.iter().find(|j| j.alias == alias).map(Join::target)
    }

    fn bind_join(&mut self, raw: RawJoin) -> Result<(), RegistrationErrorKind> {
        let parent = self
            .entity_for(&raw.parent)
            .ok_or_else(|| RegistrationErrorKind::UnknownAlias(raw.parent.clone()))?;
        let relation = parent.relation(&raw.relation).ok_or_else(|| {
            RegistrationErrorKind::UnknownRelation {
                entity: parent.name.to_string(),
                relation: raw.relation.clone(),
            }
        })?;
        if raw.fetch && raw.parent != self.root_alias {
            return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                "fetch join at {} must start from the root alias '{}'",
                raw.pos, self.root_alias
            )));
        }
        let alias = match raw.alias {
            Some(alias) => {
                if self.entity_for(&alias).is_some() {
                    return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                        "alias '{alias}' is declared twice"
                    )));
                }
                alias
            }
            None => format!("{}_{}", raw.parent, raw.relation),
        };
        self.joins.push(Join {
            kind: raw.kind,
            parent: raw.parent,
            relation,
            alias,
            fetch: raw.fetch,
        });
        Ok(())
    }

    fn selection(&mut self, items: RawItems) -> Result<Selection, RegistrationErrorKind> {
        match items {
            RawItems::Count(distinct, None) => Ok(Selection::Count {
                expr: None,
                distinct,
            }),
            RawItems::Count(distinct, Some(RawExpr::Path(segments, _))) if segments.len() == 1 => {
                let alias = &segments[0];
                let meta = self
                    .entity_for(alias)
                    .ok_or_else(|| RegistrationErrorKind::UnknownAlias(alias.clone()))?;
                if alias == &self.root_alias && !distinct {
                    return Ok(Selection::Count {
                        expr: None,
                        distinct: false,
                    });
                }
                Ok(Selection::Count {
                    expr: Some(Expr::Column(super::id_column(meta, alias))),
                    distinct,
                })
            }
            RawItems::Count(distinct, Some(expr)) => Ok(Selection::Count {
                expr: Some(self.expr(expr)?),
                distinct,
            }),
            RawItems::New(type_name, args) => {
                let args = args
                    .into_iter()
                    .map(|a| self.expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Selection::Constructor { type_name, args })
            }
            RawItems::Exprs(exprs) => {
                if let [RawExpr::Path(segments, _)] = exprs.as_slice() {
                    if segments.len() == 1 {
                        let alias = &segments[0];
                        if alias == &self.root_alias {
                            return Ok(Selection::Entity);
                        }
                        if self.entity_for(alias).is_some() {
                            return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                                "only the root alias '{}' can be selected as an entity",
                                self.root_alias
                            )));
                        }
                        return Err(RegistrationErrorKind::UnknownAlias(alias.clone()));
                    }
                }
                let exprs = exprs
                    .into_iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Selection::Columns(exprs))
            }
        }
    }

    fn predicate(&mut self, raw: RawPred) -> Result<Predicate, RegistrationErrorKind> {
        Ok(match raw {
            RawPred::And(parts) => Predicate::And(
                parts
                    .into_iter()
                    .map(|p| self.predicate(p))
                    .collect::<Result<_, _>>()?,
            ),
            RawPred::Or(parts) => Predicate::Or(
                parts
                    .into_iter()
                    .map(|p| self.predicate(p))
                    .collect::<Result<_, _>>()?,
            ),
            RawPred::Not(inner) => Predicate::Not(Box::new(self.predicate(*inner)?)),
            RawPred::Compare(left, op, right) => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                self.hint(&left, right.kind());
                self.hint(&right, left.kind());
                Predicate::Compare { left, op, right }
            }
            RawPred::Like(expr, pattern, negated) => {
                let expr = self.expr(expr)?;
                let pattern = self.expr(pattern)?;
                self.hint(&pattern, Some(ValueKind::Text));
                Predicate::Like {
                    expr,
                    pattern,
                    negated,
                }
            }
            RawPred::In(expr, list, negated) => {
                let expr = self.expr(expr)?;
                let list = match list {
                    RawInList::Param(param, pos) => {
                        let idx = self.param(param, pos)?;
                        if let Some(spec) = self.params.get_mut(idx) {
                            spec.list = true;
                            spec.kind = expr.kind();
                        }
                        InList::Param(idx)
                    }
                    RawInList::Items(items) => {
                        let items = items
                            .into_iter()
                            .map(|i| self.expr(i))
                            .collect::<Result<Vec<_>, _>>()?;
                        for item in &items {
                            self.hint(item, expr.kind());
                        }
                        InList::Items(items)
                    }
                };
                Predicate::In {
                    expr,
                    list,
                    negated,
                }
            }
            RawPred::Between(expr, low, high, negated) => {
                let expr = self.expr(expr)?;
                let low = self.expr(low)?;
                let high = self.expr(high)?;
                self.hint(&low, expr.kind());
                self.hint(&high, expr.kind());
                Predicate::Between {
                    expr,
                    low,
                    high,
                    negated,
                }
            }
            RawPred::IsNull(expr, negated) => Predicate::IsNull {
                expr: self.expr(expr)?,
                negated,
            },
        })
    }

    /// Record the kind a bare parameter is compared against.
    fn hint(&mut self, expr: &Expr, kind: Option<ValueKind>) {
        let Some(kind) = kind else { return };
        match expr {
            Expr::Param(idx) => {
                if let Some(spec) = self.params.get_mut(*idx) {
                    if spec.kind.is_none() {
                        spec.kind = Some(kind);
                    }
                }
            }
            Expr::Lower(inner) | Expr::Upper(inner) => self.hint(inner, Some(ValueKind::Text)),
            _ => {}
        }
    }

    fn param(&mut self, raw: RawParam, pos: usize) -> Result<usize, RegistrationErrorKind> {
        let (style, spec) = match raw {
            RawParam::Named(name) => {
                let arg = self
                    .declared
                    .iter()
                    .position(|d| d == &name)
                    .ok_or_else(|| RegistrationErrorKind::UnboundPlaceholder(format!(":{name}")))?;
                let mut spec = ParamSpec::positional(arg);
                spec.name = Some(name);
                (Placeholders::Named, spec)
            }
            RawParam::Positional(n) => {
                self.max_position = self.max_position.max(n);
                (Placeholders::Positional, ParamSpec::positional(n - 1))
            }
        };
        match self.style {
            Some(existing) if existing != style => {
                return Err(RegistrationErrorKind::Syntax {
                    position: pos,
                    message: "named and positional placeholders cannot be mixed".into(),
                })
            }
            _ => self.style = Some(style),
        }
        self.params.push(spec);
        Ok(self.params.len() - 1)
    }

    fn expr(&mut self, raw: RawExpr) -> Result<Expr, RegistrationErrorKind> {
        Ok(match raw {
            RawExpr::Path(segments, _) => self.path(&segments)?,
            RawExpr::Param(param, pos) => Expr::Param(self.param(param, pos)?),
            RawExpr::Literal(value) => Expr::Literal(value),
            RawExpr::Binary(op, l, r) => {
                let l = self.expr(*l)?;
                let r = self.expr(*r)?;
                self.hint(&l, r.kind());
                self.hint(&r, l.kind());
                Expr::Binary(op, Box::new(l), Box::new(r))
            }
            RawExpr::Neg(inner) => Expr::Neg(Box::new(self.expr(*inner)?)),
            RawExpr::Lower(inner) => {
                let inner = self.expr(*inner)?;
                self.hint(&inner, Some(ValueKind::Text));
                Expr::Lower(Box::new(inner))
            }
            RawExpr::Upper(inner) => {
                let inner = self.expr(*inner)?;
                self.hint(&inner, Some(ValueKind::Text));
                Expr::Upper(Box::new(inner))
            }
        })
    }

    fn path(&mut self, segments: &[String]) -> Result<Expr, RegistrationErrorKind> {
        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| RegistrationErrorKind::InvalidDeclaration("empty path".into()))?;
        let mut alias = first.clone();
        let mut meta = self
            .entity_for(&alias)
            .ok_or_else(|| RegistrationErrorKind::UnknownAlias(alias.clone()))?;

        if rest.is_empty() {
            return Ok(Expr::Column(super::id_column(meta, &alias)));
        }

        let mut idx = 0;
        loop {
            let name = &rest[idx];
            let last = idx + 1 == rest.len();
            if let Some(column) = super::attribute_column(meta, &alias, name) {
                if !last {
                    return Err(RegistrationErrorKind::UnknownRelation {
                        entity: meta.name.to_string(),
                        relation: name.clone(),
                    });
                }
                return Ok(Expr::Column(column));
            }
            let relation = meta.relation(name).ok_or_else(|| RegistrationErrorKind::UnknownAttribute {
                entity: meta.name.to_string(),
                attribute: name.clone(),
            })?;
            if relation.kind == RelationKind::OneToMany {
                return Err(RegistrationErrorKind::InvalidDeclaration(format!(
                    "collection '{name}' must be navigated with an explicit join"
                )));
            }
            let target = relation.target();
            let fk = ColumnRef {
                alias: alias.clone(),
                column: relation.column,
                name: relation.name,
                kind: target.id_attribute().map(|a| a.kind).unwrap_or(ValueKind::Int),
            };
            // `m.team` and `m.team.id` read the foreign key without a join.
            if last {
                return Ok(Expr::Column(fk));
            }
            if idx + 2 == rest.len() && rest[idx + 1] == target.id {
                return Ok(Expr::Column(fk));
            }
            alias = self.implicit_join(&alias, relation);
            meta = target;
            idx += 1;
        }
    }

    fn implicit_join(&mut self, parent: &str, relation: &'static crate::entity::Relation) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::testing::{Member, Team};

    fn catalog() -> EntityCatalog {
        let mut catalog = EntityCatalog::new();
        catalog.register::<Member>().unwrap();
        catalog
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn select(text: &str, params: &[&str]) -> (Select, Vec<ParamSpec>) {
        let compiled = compile(text, &catalog(), &names(params)).unwrap();
        match compiled.statement {
            Statement::Select(s) => (s, compiled.params),
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn named_parameters_bind_through_declared_names() {
        let (select, params) = select(
            "select m from Member m where m.username = :username and m.age =:age ",
            &["username", "age"],
        );
        assert_eq!(select.selection, Selection::Entity);
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].arg, 0);
        assert_eq!(params[0].kind, Some(ValueKind::Text));
        assert_eq!(params[1].arg, 1);
        assert_eq!(params[1].kind, Some(ValueKind::Int));
    }

    #[test]
    fn unbound_placeholder_is_rejected() {
        let err = compile("select m from Member m where m.username = :name", &catalog(), &names(&["username"]))
            .unwrap_err();
        assert_eq!(err, RegistrationErrorKind::UnboundPlaceholder(":name".into()));
    }

    #[test]
    fn positional_parameters() {
        let compiled = compile("select m from Member m where m.age between ?1 and ?2", &catalog(), &[]).unwrap();
        assert_eq!(compiled.arity, 2);
        assert_eq!(compiled.params[1].arg, 1);
    }

    #[test]
    fn mixed_placeholders_fail() {
        let err = compile("select m from Member m where m.age = ?1 and m.username = :u", &catalog(), &names(&["u"]))
            .unwrap_err();
        assert!(matches!(err, RegistrationErrorKind::Syntax { .. }));
    }

    #[test]
    fn scalar_projection() {
        let (select, _) = select("select m.username from Member  m ", &[]);
        match select.selection {
            Selection::Columns(cols) => assert_eq!(cols.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn constructor_projection_with_join() {
        let (select, _) = select(
            "select new study.datajpa.repository.MemberDto(m.id, m.username, t.name ) from Member m join m.team t",
            &[],
        );
        match &select.selection {
            Selection::Constructor { type_name, args } => {
                assert_eq!(type_name, "study.datajpa.repository.MemberDto");
                assert_eq!(args.len(), 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(select.joins.len(), 1);
        assert_eq!(select.joins[0].alias, "t");
        assert!(!select.joins[0].fetch);
    }

    #[test]
    fn in_list_parameter() {
        let (_, params) = select("select m from Member m where m.username in  :names", &["names"]);
        assert!(params[0].list);
        assert_eq!(params[0].kind, Some(ValueKind::Text));
    }

    #[test]
    fn fetch_join_without_alias() {
        let (select, _) = select("select m from Member m join fetch m.team ", &[]);
        assert_eq!(select.joins.len(), 1);
        assert!(select.joins[0].fetch);
        assert_eq!(select.joins[0].kind, JoinKind::Inner);
    }

    #[test]
    fn left_join_fetch_collection() {
        let (select, _) = select("select distinct t from Team t left join fetch t.members", &[]);
        assert!(select.distinct);
        assert_eq!(select.joins[0].kind, JoinKind::Left);
        assert!(std::ptr::eq(select.root, Team::meta()));
    }

    #[test]
    fn implicit_join_through_many_to_one() {
        let (select, _) = select("select m from Member m where m.team.name = 'teamA'", &[]);
        assert_eq!(select.joins.len(), 1);
        assert_eq!(select.joins[0].alias, "m_team");
    }

    #[test]
    fn foreign_key_path_needs_no_join() {
        let (select, _) = select("select m from Member m where m.team.id = :id", &["id"]);
        assert!(select.joins.is_empty());
    }

    #[test]
    fn bulk_update() {
        let compiled = compile(
            "update Member m set m.age =m.age +1 where m.age >=:age ",
            &catalog(),
            &names(&["age"]),
        )
        .unwrap();
        match compiled.statement {
            Statement::Update(update) => {
                assert_eq!(update.assignments.len(), 1);
                assert_eq!(update.assignments[0].column.column, "age");
                assert!(matches!(update.assignments[0].value, Expr::Binary(ArithOp::Add, _, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delete_statement() {
        let compiled = compile("delete from Member m where m.age < 18", &catalog(), &[]).unwrap();
        assert!(matches!(compiled.statement, Statement::Delete(_)));
    }

    #[test]
    fn count_forms() {
        let (by_attribute, _) = select("select count(m.username) from Member m", &[]);
        assert!(matches!(by_attribute.selection, Selection::Count { expr: Some(_), distinct: false }));
        let (by_alias, _) = select("select count(m) from Member m", &[]);
        assert_eq!(by_alias.selection, Selection::Count { expr: None, distinct: false });
        let (by_star, _) = select("select count(*) from Member m", &[]);
        assert_eq!(by_star.selection, Selection::Count { expr: None, distinct: false });
    }

    #[test]
    fn parenthesized_conditions_and_expressions() {
        let (select, _) = select(
            "select m from Member m where (m.age > 10 or m.age < 5) and (m.age + 1) * 2 > 4 order by m.username desc, m.age",
            &[],
        );
        assert!(matches!(select.filter, Some(Predicate::And(ref parts)) if parts.len() == 2));
        assert_eq!(select.order.len(), 2);
        assert_eq!(select.order[0].direction, Direction::Desc);
    }

    #[test]
    fn unknown_names() {
        let c = catalog();
        assert_eq!(
            compile("select x from Ghost x", &c, &[]).unwrap_err(),
            RegistrationErrorKind::UnknownEntity("Ghost".into())
        );
        assert!(matches!(
            compile("select m from Member m where m.nickname = 'a'", &c, &[]).unwrap_err(),
            RegistrationErrorKind::UnknownAttribute { .. }
        ));
        assert_eq!(
            compile("select m from Member m where x.age = 1", &c, &[]).unwrap_err(),
            RegistrationErrorKind::UnknownAlias("x".into())
        );
        assert!(matches!(
            compile("select m from Member m join m.club c", &c, &[]).unwrap_err(),
            RegistrationErrorKind::UnknownRelation { .. }
        ));
    }

    #[test]
    fn syntax_errors_carry_positions() {
        match compile("select m from Member m where", &catalog(), &[]).unwrap_err() {
            RegistrationErrorKind::Syntax { position, .. } => assert_eq!(position, 28),
            other => panic!("unexpected {other:?}"),
        }
        assert!(compile("select m from Member m order m.age", &catalog(), &[]).is_err());
    }
}
