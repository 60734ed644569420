//! Result shaping helpers: projections, scalars, single-result checks.

use crate::error::DataError;
use crate::value::{FromValue, Value};

/// A read-only shape built directly from query columns.
///
/// Implemented by `#[derive(Projection)]`. `NAME` is matched against the
/// type named in a constructor expression (`select new MemberDto(...)`),
/// `FIELDS` against entity attributes when a derived query projects.
pub trait Projection: Sized + Send + 'static {
    const NAME: &'static str;
    const FIELDS: &'static [&'static str];

    fn from_values(values: Vec<Value>) -> Result<Self, DataError>;
}

/// Take the only element, failing on zero or several.
pub(crate) fn expect_one<T>(mut items: Vec<T>, method: &str) -> Result<T, DataError> {
    match items.len() {
        0 => Err(DataError::NotFound(format!("{method} returned no result"))),
        1 => items
            .pop()
            .ok_or_else(|| DataError::NotFound(format!("{method} returned no result"))),
        found => Err(DataError::NonUnique {
            query: method.to_string(),
            found,
        }),
    }
}

/// Take the element if there is at most one.
pub(crate) fn expect_optional<T>(mut items: Vec<T>, method: &str) -> Result<Option<T>, DataError> {
    match items.len() {
        0 | 1 => Ok(items.pop()),
        found => Err(DataError::NonUnique {
            query: method.to_string(),
            found,
        }),
    }
}

/// Convert a single-column row into a scalar.
pub(crate) fn scalar<S: FromValue>(row: Vec<Value>, column: &str) -> Result<S, DataError> {
    let mut it = row.into_iter();
    match (it.next(), it.next()) {
        (Some(value), None) => S::from_value(&value, column),
        _ => Err(DataError::binding(format!(
            "{column} does not select exactly one column"
        ))),
    }
}

pub(crate) fn project<D: Projection>(row: Vec<Value>) -> Result<D, DataError> {
    if row.len() != D::FIELDS.len() {
        return Err(DataError::Other(format!(
            "{} expects {} columns, row has {}",
            D::NAME,
            D::FIELDS.len(),
            row.len()
        )));
    }
    D::from_values(row)
}

/// Compare a constructor expression's type name with a projection name.
///
/// Qualified names (`study.MemberDto`, `dto::MemberDto`) match on the last
/// segment.
pub fn projection_name_matches(type_name: &str, projection: &str) -> bool {
    let last = type_name
        .rsplit(|c| c == '.' || c == ':')
        .next()
        .unwrap_or(type_name);
    last == projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemberDto;

    #[test]
    fn one_rejects_empty_and_many() {
        assert!(matches!(expect_one(Vec::<i32>::new(), "m"), Err(DataError::NotFound(_))));
        assert!(matches!(
            expect_one(vec![1, 2], "m"),
            Err(DataError::NonUnique { found: 2, .. })
        ));
        assert_eq!(expect_one(vec![7], "m").unwrap(), 7);
    }

    #[test]
    fn optional_allows_empty() {
        assert_eq!(expect_optional(Vec::<i32>::new(), "m").unwrap(), None);
        assert!(expect_optional(vec![1, 2], "m").is_err());
    }

    #[test]
    fn scalar_requires_single_column() {
        let name: String = scalar(vec![Value::from("AAA")], "username").unwrap();
        assert_eq!(name, "AAA");
        assert!(scalar::<String>(vec![Value::from("a"), Value::from(1)], "x").is_err());
    }

    #[test]
    fn projection_from_row() {
        let dto: MemberDto = project(vec![Value::from(1), Value::from("AAA"), Value::from("teamA")]).unwrap();
        assert_eq!(dto.team_name, "teamA");
        assert!(project::<MemberDto>(vec![Value::from(1)]).is_err());
    }

    #[test]
    fn qualified_names_match_last_segment() {
        assert!(projection_name_matches("study.datajpa.MemberDto", "MemberDto"));
        assert!(projection_name_matches("MemberDto", "MemberDto"));
        assert!(!projection_name_matches("OtherDto", "MemberDto"));
    }
}
