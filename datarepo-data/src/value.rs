use crate::error::DataError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The static type of an entity attribute or a bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
        }
    }

    /// Whether a value of kind `other` may be bound where `self` is expected.
    ///
    /// Integers widen to floats; everything else must match exactly.
    pub fn accepts(self, other: ValueKind) -> bool {
        self == other || (self == ValueKind::Float && other == ValueKind::Int)
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single dynamically typed cell exchanged with a storage backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The kind of a scalar value; `None` for `Null` and lists.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Null | Value::List(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// SQL-style comparison. `None` when either side is `Null` or the kinds
    /// are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) | (Value::Float(_), Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting: nulls first, then by kind, then by value.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            _ => self
                .compare(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::List(_) => 4,
        }
    }

    /// Stable textual key, used for identity lookups.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{f}"),
            Value::Text(s) => format!("t:{s}"),
            Value::List(items) => {
                let keys: Vec<String> = items.iter().map(Value::key).collect();
                format!("l:[{}]", keys.join(","))
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{s}'"),
            Value::List(items) => {
                f.write_str("(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

// ── Conversions into Value ──────────────────────────────────────────────

macro_rules! impl_from_int {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(v: &[T]) -> Self {
        Value::List(v.iter().cloned().map(Into::into).collect())
    }
}

// ── Conversions out of Value ────────────────────────────────────────────

/// Trait for converting a [`Value`] read from storage into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError>;
}

fn mismatch(column: &str, expected: &str, value: &Value) -> DataError {
    DataError::Other(format!(
        "column '{column}': expected {expected}, found {value}"
    ))
}

impl FromValue for Value {
    fn from_value(value: &Value, _column: &str) -> Result<Self, DataError> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        value.as_i64().ok_or_else(|| mismatch(column, "int", value))
    }
}

macro_rules! impl_from_value_int {
    ($($ty:ty),+) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
                    let i = i64::from_value(value, column)?;
                    <$ty>::try_from(i).map_err(|_| mismatch(column, stringify!($ty), value))
                }
            }
        )+
    };
}

impl_from_value_int!(i8, i16, i32, u8, u16, u32);

impl FromValue for f64 {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        value.as_f64().ok_or_else(|| mismatch(column, "float", value))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        f64::from_value(value, column).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        match value {
            Value::Bool(b) => Ok(*b),
            // SQLite stores booleans as integers
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(mismatch(column, "bool", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(column, "text", value))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other, column).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value, column: &str) -> Result<Self, DataError> {
        match value {
            Value::List(items) => items.iter().map(|v| T::from_value(v, column)).collect(),
            other => Err(mismatch(column, "list", other)),
        }
    }
}

/// Static type information for attribute field types.
///
/// Used by `#[derive(Entity)]` to describe columns without parsing types.
pub trait ValueType {
    const KIND: ValueKind;
    const NULLABLE: bool = false;
}

macro_rules! impl_value_type {
    ($kind:ident: $($ty:ty),+) => {
        $(
            impl ValueType for $ty {
                const KIND: ValueKind = ValueKind::$kind;
            }
        )+
    };
}

impl_value_type!(Int: i8, i16, i32, i64, u8, u16, u32);
impl_value_type!(Float: f32, f64);
impl_value_type!(Bool: bool);
impl_value_type!(Text: String);

impl<T: ValueType> ValueType for Option<T> {
    const KIND: ValueKind = T::KIND;
    const NULLABLE: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_compare_numerically() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Float(3.0).compare(&Value::Int(3)), Some(Ordering::Equal));
    }

    #[test]
    fn null_is_incomparable_but_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
        assert_eq!(Value::Text("a".into()).sort_cmp(&Value::Null), Ordering::Greater);
    }

    #[test]
    fn text_and_int_are_not_comparable() {
        assert_eq!(Value::Text("1".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn option_and_vec_conversions() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
        assert_eq!(
            Value::from(vec!["AAA", "BBB"]),
            Value::List(vec![Value::Text("AAA".into()), Value::Text("BBB".into())])
        );
    }

    #[test]
    fn from_value_checks_ranges() {
        assert_eq!(i32::from_value(&Value::Int(20), "age").unwrap(), 20);
        assert!(i8::from_value(&Value::Int(1000), "age").is_err());
        assert!(String::from_value(&Value::Int(1), "name").is_err());
        assert_eq!(Option::<String>::from_value(&Value::Null, "name").unwrap(), None);
    }

    #[test]
    fn bool_accepts_sqlite_integers() {
        assert!(bool::from_value(&Value::Int(1), "active").unwrap());
        assert!(!bool::from_value(&Value::Int(0), "active").unwrap());
        assert!(bool::from_value(&Value::Int(2), "active").is_err());
    }

    #[test]
    fn float_accepts_int_binding() {
        assert!(ValueKind::Float.accepts(ValueKind::Int));
        assert!(!ValueKind::Int.accepts(ValueKind::Float));
    }

    #[test]
    fn value_type_reports_nullability() {
        assert_eq!(<Option<i32> as ValueType>::KIND, ValueKind::Int);
        assert!(<Option<i32> as ValueType>::NULLABLE);
        assert!(!<String as ValueType>::NULLABLE);
    }
}
