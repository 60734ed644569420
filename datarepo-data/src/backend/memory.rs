//! In-memory storage engine.
//!
//! Tables are vectors of [`Record`]s behind one async mutex. A transaction
//! holds the mutex for its whole life and works on a copy of the state that
//! replaces the shared state on commit, so transactions are serialized.

use super::{Connection, EntityRow, Row, StorageBackend, Window};
use crate::entity::{EntityMeta, FetchedRecords, Record, RelationKind};
use crate::error::DataError;
use crate::query::{
    ArithOp, CompareOp, Expr, InList, Predicate, Select, Selection, Statement, LIKE_ESCAPE,
};
use crate::value::{Value, ValueKind};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Errors raised by the in-memory engine.
#[derive(Debug)]
pub enum MemoryError {
    DuplicateKey { table: String, id: Value },
    /// A generated identifier was requested for a non-integer key.
    MissingId { table: String },
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::DuplicateKey { table, id } => {
                write!(f, "duplicate key {id} in table {table}")
            }
            MemoryError::MissingId { table } => {
                write!(f, "table {table} needs an explicit identifier")
            }
        }
    }
}

impl std::error::Error for MemoryError {}

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
}

impl MemoryState {
    fn rows(&self, meta: &EntityMeta) -> &[Record] {
        self.tables
            .get(meta.table)
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }
}

/// Statement counters, shared by every connection of a backend.
#[derive(Debug, Default)]
pub struct StatementStats {
    selects: AtomicU64,
    counts: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    bulk: AtomicU64,
}

impl StatementStats {
    pub fn selects(&self) -> u64 {
        self.selects.load(AtomicOrdering::Relaxed)
    }

    pub fn counts(&self) -> u64 {
        self.counts.load(AtomicOrdering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(AtomicOrdering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(AtomicOrdering::Relaxed)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(AtomicOrdering::Relaxed)
    }

    pub fn bulk(&self) -> u64 {
        self.bulk.load(AtomicOrdering::Relaxed)
    }

    pub fn reset(&self) {
        for counter in [
            &self.selects,
            &self.counts,
            &self.inserts,
            &self.updates,
            &self.deletes,
            &self.bulk,
        ] {
            counter.store(0, AtomicOrdering::Relaxed);
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Reference storage engine, used by tests and by the `memory` backend setting.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    stats: Arc<StatementStats>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &StatementStats {
        &self.stats
    }

    /// Committed rows of an entity's table.
    ///
    /// Waits for any open transaction to finish.
    pub async fn rows(&self, meta: &EntityMeta) -> Vec<Record> {
        self.state.lock().await.rows(meta).to_vec()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn begin(&self) -> Result<Box<dyn Connection>, DataError> {
        let guard = self.state.clone().lock_owned().await;
        let work = (*guard).clone();
        tracing::trace!("Memory transaction started");
        Ok(Box::new(MemoryConnection {
            guard,
            work,
            stats: self.stats.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryConnection {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
    stats: Arc<StatementStats>,
}

fn complete(meta: &EntityMeta, record: &mut Record) {
    for (column, _) in meta.columns() {
        if !record.contains(column) {
            record.insert(column, Value::Null);
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn insert(&mut self, meta: &'static EntityMeta, record: &Record) -> Result<Value, DataError> {
        StatementStats::bump(&self.stats.inserts);
        let table = self.work.tables.entry(meta.table.to_string()).or_default();
        let id_column = meta.id_column();
        let mut record = record.clone();
        let id = match record.get(id_column).clone() {
            Value::Null => {
                let is_int = meta.id_attribute().map_or(true, |a| a.kind == ValueKind::Int);
                if !is_int {
                    return Err(DataError::database(MemoryError::MissingId {
                        table: meta.table.to_string(),
                    }));
                }
                table.next_id += 1;
                Value::Int(table.next_id)
            }
            given => {
                if table.rows.iter().any(|r| same(r.get(id_column), &given)) {
                    return Err(DataError::database(MemoryError::DuplicateKey {
                        table: meta.table.to_string(),
                        id: given,
                    }));
                }
                if let Value::Int(i) = given {
                    table.next_id = table.next_id.max(i);
                }
                given
            }
        };
        record.insert(id_column, id.clone());
        complete(meta, &mut record);
        table.rows.push(record);
        tracing::trace!(table = meta.table, %id, "Inserted row");
        Ok(id)
    }

    async fn update(&mut self, meta: &'static EntityMeta, record: &Record) -> Result<u64, DataError> {
        StatementStats::bump(&self.stats.updates);
        let id_column = meta.id_column();
        let id = record.get(id_column);
        let Some(table) = self.work.tables.get_mut(meta.table) else {
            return Ok(0);
        };
        match table.rows.iter_mut().find(|r| same(r.get(id_column), id)) {
            Some(row) => {
                let mut replacement = record.clone();
                complete(meta, &mut replacement);
                *row = replacement;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete(&mut self, meta: &'static EntityMeta, id: &Value) -> Result<u64, DataError> {
        StatementStats::bump(&self.stats.deletes);
        let id_column = meta.id_column();
        let Some(table) = self.work.tables.get_mut(meta.table) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|r| !same(r.get(id_column), id));
        Ok((before - table.rows.len()) as u64)
    }

    async fn select(&mut self, select: &Select, params: &[Value], window: Window) -> Result<Vec<Row>, DataError> {
        if matches!(select.selection, Selection::Count { .. }) {
            StatementStats::bump(&self.stats.counts);
        } else {
            StatementStats::bump(&self.stats.selects);
        }
        let rows = run_select(&self.work, select, params, window.capped(select.limit));
        tracing::trace!(entity = select.root.name, rows = rows.len(), "Memory select");
        Ok(rows)
    }

    async fn execute(&mut self, statement: &Statement, params: &[Value]) -> Result<u64, DataError> {
        StatementStats::bump(&self.stats.bulk);
        match statement {
            Statement::Update(update) => {
                let Some(table) = self.work.tables.get_mut(update.root.table) else {
                    return Ok(0);
                };
                let mut affected = 0;
                for row in table.rows.iter_mut() {
                    let bindings = vec![(update.alias.as_str(), Some(&*row))];
                    let matched = update
                        .filter
                        .as_ref()
                        .map_or(Some(true), |f| test(f, &bindings, params));
                    if matched != Some(true) {
                        continue;
                    }
                    let values: Vec<(&'static str, Value)> = update
                        .assignments
                        .iter()
                        .map(|a| (a.column.column, eval(&a.value, &bindings, params)))
                        .collect();
                    for (column, value) in values {
                        row.insert(column, value);
                    }
                    affected += 1;
                }
                Ok(affected)
            }
            Statement::Delete(delete) => {
                let Some(table) = self.work.tables.get_mut(delete.root.table) else {
                    return Ok(0);
                };
                let before = table.rows.len();
                table.rows.retain(|row| {
                    let bindings = vec![(delete.alias.as_str(), Some(row))];
                    let matched = delete
                        .filter
                        .as_ref()
                        .map_or(Some(true), |f| test(f, &bindings, params));
                    matched != Some(true)
                });
                Ok((before - table.rows.len()) as u64)
            }
            Statement::Select(select) => Err(DataError::Other(format!(
                "execute called with a select on {}",
                select.root.name
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DataError> {
        let MemoryConnection { mut guard, work, .. } = *self;
        *guard = work;
        tracing::trace!("Memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DataError> {
        tracing::trace!("Memory transaction rolled back");
        Ok(())
    }
}

// ── Evaluation ──────────────────────────────────────────────────────────

type Bindings<'a> = Vec<(&'a str, Option<&'a Record>)>;

fn lookup<'a>(bindings: &Bindings<'a>, alias: &str) -> Option<&'a Record> {
    bindings
        .iter()
        .find(|(a, _)| *a == alias)
        .and_then(|(_, record)| *record)
}

fn same(a: &Value, b: &Value) -> bool {
    a.compare(b) == Some(Ordering::Equal)
}

fn run_select(state: &MemoryState, select: &Select, params: &[Value], window: Window) -> Vec<Row> {
    let mut rows: Vec<Bindings<'_>> = state
        .rows(select.root)
        .iter()
        .map(|r| vec![(select.alias.as_str(), Some(r))])
        .collect();

    for join in &select.joins {
        let target = join.target();
        let candidates = state.rows(target);
        let parent_meta = select.entity_for(&join.parent);
        let mut expanded = Vec::with_capacity(rows.len());
        for binding in rows {
            let matches: Vec<&Record> = match (lookup(&binding, &join.parent), parent_meta) {
                (Some(parent), Some(parent_meta)) => match join.relation.kind {
                    RelationKind::ManyToOne => {
                        let key = parent.get(join.relation.column);
                        candidates
                            .iter()
                            .filter(|r| same(r.get(target.id_column()), key))
                            .collect()
                    }
                    RelationKind::OneToMany => {
                        let owner = parent.get(parent_meta.id_column());
                        let fk = join.relation.join_column().unwrap_or_default();
                        candidates.iter().filter(|r| same(r.get(fk), owner)).collect()
                    }
                },
                _ => Vec::new(),
            };
            if matches.is_empty() {
                if join.kind == crate::query::JoinKind::Left {
                    let mut extended = binding.clone();
                    extended.push((join.alias.as_str(), None));
                    expanded.push(extended);
                }
                continue;
            }
            for record in matches {
                let mut extended = binding.clone();
                extended.push((join.alias.as_str(), Some(record)));
                expanded.push(extended);
            }
        }
        rows = expanded;
    }

    if let Some(filter) = &select.filter {
        rows.retain(|b| test(filter, b, params) == Some(true));
    }

    if let Selection::Count { expr, distinct } = &select.selection {
        return vec![Row::Tuple(vec![Value::Int(count_rows(select, &rows, expr.as_ref(), *distinct, params))])];
    }

    if !select.order.is_empty() {
        let mut keyed: Vec<(Vec<Value>, Bindings<'_>)> = rows
            .into_iter()
            .map(|b| {
                let keys = select.order.iter().map(|o| eval(&o.expr, &b, params)).collect();
                (keys, b)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| {
            for (idx, item) in select.order.iter().enumerate() {
                let ord = a[idx].sort_cmp(&b[idx]);
                let ord = if item.direction.is_ascending() { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        rows = keyed.into_iter().map(|(_, b)| b).collect();
    }

    let offset = usize::try_from(window.offset).unwrap_or(usize::MAX);
    let limit = window
        .limit
        .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

    match &select.selection {
        Selection::Entity => {
            let collapse = select.distinct
                || select
                    .fetch_joins()
                    .any(|j| j.relation.kind == RelationKind::OneToMany);
            let root_id = select.root.id_column();
            let mut seen = HashSet::new();
            rows.into_iter()
                .filter_map(|b| lookup(&b, &select.alias).map(|root| (root, b)))
                .filter(|(root, _)| !collapse || seen.insert(root.get(root_id).key()))
                .skip(offset)
                .take(limit)
                .map(|(root, b)| Row::Entity(entity_row(state, select, root, &b)))
                .collect()
        }
        Selection::Columns(exprs) | Selection::Constructor { args: exprs, .. } => {
            let mut seen = HashSet::new();
            rows.iter()
                .map(|b| exprs.iter().map(|e| eval(e, b, params)).collect::<Vec<_>>())
                .filter(|values| {
                    !select.distinct || seen.insert(values.iter().map(Value::key).collect::<Vec<_>>().join("|"))
                })
                .skip(offset)
                .take(limit)
                .map(Row::Tuple)
                .collect()
        }
        Selection::Count { .. } => Vec::new(),
    }
}

fn count_rows(select: &Select, rows: &[Bindings<'_>], expr: Option<&Expr>, distinct: bool, params: &[Value]) -> i64 {
    let values: Vec<Value> = match expr {
        Some(expr) => rows.iter().map(|b| eval(expr, b, params)).collect(),
        None if distinct => rows
            .iter()
            .map(|b| {
                lookup(b, &select.alias)
                    .map(|r| r.get(select.root.id_column()).clone())
                    .unwrap_or(Value::Null)
            })
            .collect(),
        None => return rows.len() as i64,
    };
    let non_null = values.into_iter().filter(|v| !v.is_null());
    if distinct {
        non_null.map(|v| v.key()).collect::<HashSet<_>>().len() as i64
    } else {
        non_null.count() as i64
    }
}

fn entity_row(state: &MemoryState, select: &Select, root: &Record, bindings: &Bindings<'_>) -> EntityRow {
    let mut row = EntityRow::new(root.clone());
    for join in select.fetch_joins() {
        let fetched = match join.relation.kind {
            RelationKind::ManyToOne => FetchedRecords::One(lookup(bindings, &join.alias).cloned()),
            RelationKind::OneToMany => {
                // The whole collection, whatever the filter matched.
                let owner = root.get(select.root.id_column());
                let fk = join.relation.join_column().unwrap_or_default();
                FetchedRecords::Many(
                    state
                        .rows(join.target())
                        .iter()
                        .filter(|r| same(r.get(fk), owner))
                        .cloned()
                        .collect(),
                )
            }
        };
        row.fetched.push((join.relation.name, fetched));
    }
    row
}

fn eval(expr: &Expr, bindings: &Bindings<'_>, params: &[Value]) -> Value {
    match expr {
        Expr::Column(column) => lookup(bindings, &column.alias)
            .map(|r| r.get(column.column).clone())
            .unwrap_or(Value::Null),
        Expr::Param(idx) => params.get(*idx).cloned().unwrap_or(Value::Null),
        Expr::Literal(value) => value.clone(),
        Expr::Binary(op, left, right) => arith(*op, eval(left, bindings, params), eval(right, bindings, params)),
        Expr::Neg(inner) => match eval(inner, bindings, params) {
            Value::Int(i) => i.checked_neg().map_or(Value::Null, Value::Int),
            Value::Float(f) => Value::Float(-f),
            _ => Value::Null,
        },
        Expr::Lower(inner) => match eval(inner, bindings, params) {
            Value::Text(s) => Value::Text(s.to_lowercase()),
            Value::List(items) => Value::List(items.into_iter().map(lower_text).collect()),
            other => other,
        },
        Expr::Upper(inner) => match eval(inner, bindings, params) {
            Value::Text(s) => Value::Text(s.to_uppercase()),
            other => other,
        },
    }
}

fn lower_text(value: Value) -> Value {
    match value {
        Value::Text(s) => Value::Text(s.to_lowercase()),
        other => other,
    }
}

fn arith(op: ArithOp, left: Value, right: Value) -> Value {
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        let result = match op {
            ArithOp::Add => a.checked_add(*b),
            ArithOp::Sub => a.checked_sub(*b),
            ArithOp::Mul => a.checked_mul(*b),
            ArithOp::Div => a.checked_div(*b),
        };
        return result.map_or(Value::Null, Value::Int);
    }
    match (left.as_f64(), right.as_f64()) {
        (Some(_), Some(b)) if op == ArithOp::Div && b == 0.0 => Value::Null,
        (Some(a), Some(b)) => Value::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        }),
        _ => Value::Null,
    }
}

/// Three-valued predicate evaluation; `None` is SQL `UNKNOWN`.
fn test(predicate: &Predicate, bindings: &Bindings<'_>, params: &[Value]) -> Option<bool> {
    match predicate {
        Predicate::And(parts) => {
            let mut result = Some(true);
            for part in parts {
                match test(part, bindings, params) {
                    Some(false) => return Some(false),
                    None => result = None,
                    Some(true) => {}
                }
            }
            result
        }
        Predicate::Or(parts) => {
            let mut result = Some(false);
            for part in parts {
                match test(part, bindings, params) {
                    Some(true) => return Some(true),
                    None => result = None,
                    Some(false) => {}
                }
            }
            result
        }
        Predicate::Not(inner) => test(inner, bindings, params).map(|b| !b),
        Predicate::Compare { left, op, right } => {
            let ord = eval(left, bindings, params).compare(&eval(right, bindings, params))?;
            Some(match op {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::NotEq => ord != Ordering::Equal,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Ge => ord != Ordering::Less,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Le => ord != Ordering::Greater,
            })
        }
        Predicate::Like { expr, pattern, negated } => {
            let value = eval(expr, bindings, params);
            let pattern = eval(pattern, bindings, params);
            let matched = like_match(value.as_str()?, pattern.as_str()?);
            Some(matched != *negated)
        }
        Predicate::In { expr, list, negated } => {
            let value = eval(expr, bindings, params);
            if value.is_null() {
                return None;
            }
            let items: Vec<Value> = match list {
                InList::Param(idx) => match params.get(*idx) {
                    Some(Value::List(items)) => items.clone(),
                    Some(single) => vec![single.clone()],
                    None => Vec::new(),
                },
                InList::Items(exprs) => exprs.iter().map(|e| eval(e, bindings, params)).collect(),
            };
            let mut saw_null = false;
            for item in &items {
                match value.compare(item) {
                    Some(Ordering::Equal) => return Some(!*negated),
                    None if item.is_null() => saw_null = true,
                    _ => {}
                }
            }
            if saw_null {
                None
            } else {
                Some(*negated)
            }
        }
        Predicate::Between { expr, low, high, negated } => {
            let value = eval(expr, bindings, params);
            let above = value.compare(&eval(low, bindings, params)).map(|o| o != Ordering::Less);
            let below = value.compare(&eval(high, bindings, params)).map(|o| o != Ordering::Greater);
            let inside = match (above, below) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            inside.map(|b| b != *negated)
        }
        Predicate::IsNull { expr, negated } => Some(eval(expr, bindings, params).is_null() != *negated),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    Any,
    One,
    Literal(char),
}

/// Case-sensitive `LIKE` with `%`, `_` and a backslash escape.
fn like_match(text: &str, pattern: &str) -> bool {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            LIKE_ESCAPE => LikeToken::Literal(chars.next().unwrap_or(LIKE_ESCAPE)),
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            other => LikeToken::Literal(other),
        });
    }
    let text: Vec<char> = text.chars().collect();
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            LikeToken::Any => {
                let mut seen = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[j];
                    *slot = seen;
                }
            }
            LikeToken::One => {
                for j in 1..=text.len() {
                    next[j] = reachable[j - 1];
                }
            }
            LikeToken::Literal(c) => {
                for j in 1..=text.len() {
                    next[j] = reachable[j - 1] && text[j - 1] == c;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::query::{explicit, Compiled};
    use crate::catalog::EntityCatalog;
    use crate::testing::{Member, Team};

    fn compile(text: &str, params: &[&str]) -> Compiled {
        let catalog = EntityCatalog::new().with::<Member>().unwrap();
        let names: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        explicit::compile(text, &catalog, &names).unwrap()
    }

    fn select_of(compiled: &Compiled) -> &Select {
        match &compiled.statement {
            Statement::Select(s) => s,
            other => panic!("expected select, got {other:?}"),
        }
    }

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let mut conn = backend.begin().await.unwrap();
        let team_a = conn
            .insert(Team::meta(), &Team::named(None, "teamA").to_record())
            .await
            .unwrap();
        conn.insert(Team::meta(), &Team::named(None, "teamB").to_record())
            .await
            .unwrap();
        for (name, age, team) in [
            ("member1", 10, team_a.clone()),
            ("member2", 19, team_a.clone()),
            ("member3", 20, Value::Null),
            ("member4", 21, Value::Int(2)),
            ("member5", 40, Value::Null),
        ] {
            let record = Member::new(name, age).to_record().with("team_id", team);
            conn.insert(Member::meta(), &record).await.unwrap();
        }
        conn.commit().await.unwrap();
        backend
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("member1", "mem%"));
        assert!(like_match("member1", "%ber_"));
        assert!(!like_match("Member1", "mem%"));
        assert!(like_match("50%", "50\\%"));
        assert!(!like_match("500", "50\\%"));
        assert!(like_match("", "%"));
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(arith(ArithOp::Add, Value::Int(20), Value::Int(1)), Value::Int(21));
        assert_eq!(arith(ArithOp::Div, Value::Int(7), Value::Int(2)), Value::Int(3));
        assert_eq!(arith(ArithOp::Div, Value::Int(7), Value::Int(0)), Value::Null);
        assert_eq!(arith(ArithOp::Mul, Value::Float(1.5), Value::Int(2)), Value::Float(3.0));
    }

    #[tokio::test]
    async fn insert_generates_sequential_ids() {
        let backend = seeded().await;
        let rows = backend.rows(Member::meta()).await;
        let ids: Vec<Value> = rows.iter().map(|r| r.get("id").clone()).collect();
        assert_eq!(ids, (1..=5).map(Value::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn duplicate_key_is_a_database_error() {
        let backend = MemoryBackend::new();
        let mut conn = backend.begin().await.unwrap();
        let record = Member::new("a", 1).to_record().with("id", 7);
        conn.insert(Member::meta(), &record).await.unwrap();
        let err = conn.insert(Member::meta(), &record).await.unwrap_err();
        assert!(matches!(err, DataError::Database(_)));
        // explicit ids advance the sequence
        let next = conn.insert(Member::meta(), &Member::new("b", 2).to_record()).await.unwrap();
        assert_eq!(next, Value::Int(8));
    }

    #[tokio::test]
    async fn rollback_discards_work() {
        let backend = seeded().await;
        let mut conn = backend.begin().await.unwrap();
        conn.delete(Member::meta(), &Value::Int(1)).await.unwrap();
        conn.rollback().await.unwrap();
        assert_eq!(backend.rows(Member::meta()).await.len(), 5);
    }

    #[tokio::test]
    async fn bulk_update_increments_matching_rows() {
        let backend = seeded().await;
        let compiled = compile("update Member m set m.age = m.age + 1 where m.age >= :age", &["age"]);
        let mut conn = backend.begin().await.unwrap();
        let affected = conn.execute(&compiled.statement, &[Value::Int(20)]).await.unwrap();
        conn.commit().await.unwrap();
        assert_eq!(affected, 3);
        let mut ages: Vec<i64> = backend
            .rows(Member::meta())
            .await
            .iter()
            .filter_map(|r| r.get("age").as_i64())
            .collect();
        ages.sort();
        assert_eq!(ages, vec![10, 19, 21, 22, 41]);
        assert_eq!(backend.stats().bulk(), 1);
    }

    #[tokio::test]
    async fn inner_join_drops_rows_without_team() {
        let backend = seeded().await;
        let compiled = compile("select m.username, t.name from Member m join m.team t order by m.username", &[]);
        let mut conn = backend.begin().await.unwrap();
        let rows = conn.select(select_of(&compiled), &[], Window::all()).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[2],
            Row::Tuple(vec![Value::from("member4"), Value::from("teamB")])
        );
    }

    #[tokio::test]
    async fn fetch_join_attaches_related_rows() {
        let backend = seeded().await;
        let compiled = compile("select m from Member m left join fetch m.team", &[]);
        let mut conn = backend.begin().await.unwrap();
        let rows = conn.select(select_of(&compiled), &[], Window::all()).await.unwrap();
        assert_eq!(rows.len(), 5);
        let Row::Entity(first) = &rows[0] else { panic!("entity row expected") };
        assert_eq!(first.fetched.len(), 1);
        assert!(matches!(&first.fetched[0], ("team", FetchedRecords::One(Some(_)))));
        let Row::Entity(third) = &rows[2] else { panic!("entity row expected") };
        assert!(matches!(&third.fetched[0], ("team", FetchedRecords::One(None))));
    }

    #[tokio::test]
    async fn collection_fetch_collapses_duplicates() {
        let backend = seeded().await;
        let catalog = EntityCatalog::new().with::<Team>().unwrap();
        let compiled = explicit::compile("select t from Team t join fetch t.members", &catalog, &[]).unwrap();
        let mut conn = backend.begin().await.unwrap();
        let rows = conn.select(select_of(&compiled), &[], Window::all()).await.unwrap();
        assert_eq!(rows.len(), 2);
        let Row::Entity(team_a) = &rows[0] else { panic!("entity row expected") };
        match &team_a.fetched[0] {
            ("members", FetchedRecords::Many(members)) => assert_eq!(members.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn order_window_and_count() {
        let backend = seeded().await;
        let compiled = compile("select m from Member m order by m.age desc", &[]);
        let select = select_of(&compiled);
        let mut conn = backend.begin().await.unwrap();
        let rows = conn.select(select, &[], Window::new(1, 2)).await.unwrap();
        let ages: Vec<i64> = rows
            .iter()
            .filter_map(|r| match r {
                Row::Entity(e) => e.record.get("age").as_i64(),
                Row::Tuple(_) => None,
            })
            .collect();
        assert_eq!(ages, vec![21, 20]);
        let total = super::super::count(conn.as_mut(), &select.to_count(), &[]).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(backend.stats().counts(), 1);
    }

    #[tokio::test]
    async fn null_semantics_in_predicates() {
        let backend = seeded().await;
        let compiled = compile("select m.username from Member m where m.team.id <> 1", &[]);
        let mut conn = backend.begin().await.unwrap();
        let rows = conn.select(select_of(&compiled), &[], Window::all()).await.unwrap();
        // rows with a null team are UNKNOWN, not true
        assert_eq!(rows, vec![Row::Tuple(vec![Value::from("member4")])]);

        let compiled = compile("select m.username from Member m where m.team is null", &[]);
        let rows = conn.select(select_of(&compiled), &[], Window::all()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn in_list_parameter() {
        let backend = seeded().await;
        let compiled = compile("select m.username from Member m where m.username in :names order by m.username", &["names"]);
        let mut conn = backend.begin().await.unwrap();
        let rows = conn
            .select(select_of(&compiled), &[Value::from(vec!["member1", "member3", "ghost"])], Window::all())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn bulk_delete() {
        let backend = seeded().await;
        let compiled = compile("delete from Member m where m.age < 20", &[]);
        let mut conn = backend.begin().await.unwrap();
        assert_eq!(conn.execute(&compiled.statement, &[]).await.unwrap(), 2);
        conn.commit().await.unwrap();
        assert_eq!(backend.rows(Member::meta()).await.len(), 3);
    }
}
