//! Call-time argument binding.

use super::{Compiled, ParamSpec};
use crate::error::DataError;
use crate::value::Value;

/// Bind call-site arguments to a compiled statement's placeholders.
///
/// The result is indexed like `compiled.params`, which is how statements
/// reference their parameters. Fails before anything reaches storage.
pub fn bind(compiled: &Compiled, args: &[Value], method: &str) -> Result<Vec<Value>, DataError> {
    if args.len() != compiled.arity {
        return Err(DataError::binding(format!(
            "{method} expects {} argument(s), got {}",
            compiled.arity,
            args.len()
        )));
    }
    compiled
        .params
        .iter()
        .map(|spec| {
            let value = args.get(spec.arg).ok_or_else(|| {
                DataError::binding(format!("{method}: no argument for {}", describe(spec)))
            })?;
            bind_one(spec, value, method)
        })
        .collect()
}

fn describe(spec: &ParamSpec) -> String {
    match &spec.name {
        Some(name) => format!("parameter :{name}"),
        None => format!("argument #{}", spec.arg + 1),
    }
}

fn bind_one(spec: &ParamSpec, value: &Value, method: &str) -> Result<Value, DataError> {
    if spec.list {
        return match value {
            Value::List(items) => {
                for item in items {
                    check_kind(spec, item, method)?;
                }
                Ok(value.clone())
            }
            other => Err(DataError::binding(format!(
                "{method}: {} expects a list, got {other}",
                describe(spec)
            ))),
        };
    }
    if let Value::List(_) = value {
        return Err(DataError::binding(format!(
            "{method}: {} does not accept a list",
            describe(spec)
        )));
    }
    check_kind(spec, value, method)?;
    if spec.like == super::LikeWrap::None {
        return Ok(value.clone());
    }
    match value {
        Value::Text(text) => Ok(Value::Text(spec.like.apply(text))),
        Value::Null => Ok(Value::Null),
        other => Err(DataError::binding(format!(
            "{method}: {} expects text, got {other}",
            describe(spec)
        ))),
    }
}

fn check_kind(spec: &ParamSpec, value: &Value, method: &str) -> Result<(), DataError> {
    match (spec.kind, value.kind()) {
        (Some(expected), Some(found)) if !expected.accepts(found) => Err(DataError::binding(format!(
            "{method}: {} expects {expected}, got {found} ({value})",
            describe(spec)
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::query::derive;
    use crate::testing::Member;

    fn derived(method: &str) -> Compiled {
        derive::compile(method, Member::meta()).unwrap().compiled
    }

    #[test]
    fn arity_is_checked() {
        let compiled = derived("findByUsernameAndAgeGreaterThan");
        let err = bind(&compiled, &[Value::from("AAA")], "findByUsernameAndAgeGreaterThan").unwrap_err();
        assert!(matches!(err, DataError::Binding(_)), "{err}");
        let bound = bind(&compiled, &[Value::from("AAA"), Value::from(15)], "m").unwrap();
        assert_eq!(bound, vec![Value::from("AAA"), Value::from(15)]);
    }

    #[test]
    fn kinds_are_checked() {
        let compiled = derived("findByAge");
        assert!(bind(&compiled, &[Value::from("ten")], "findByAge").is_err());
        // nulls bind anywhere
        assert!(bind(&compiled, &[Value::Null], "findByAge").is_ok());
    }

    #[test]
    fn in_requires_a_list() {
        let compiled = derived("findByUsernameIn");
        assert!(bind(&compiled, &[Value::from("AAA")], "findByUsernameIn").is_err());
        let bound = bind(&compiled, &[Value::from(vec!["AAA", "BBB"])], "findByUsernameIn").unwrap();
        assert_eq!(bound[0], Value::from(vec!["AAA", "BBB"]));
        assert!(bind(&compiled, &[Value::from(vec![1, 2])], "findByUsernameIn").is_err());
    }

    #[test]
    fn like_wrapping_escapes_wildcards() {
        let compiled = derived("findByUsernameStartingWith");
        let bound = bind(&compiled, &[Value::from("mem_1%")], "m").unwrap();
        assert_eq!(bound, vec![Value::from("mem\\_1\\%%")]);

        let compiled = derived("findByUsernameLike");
        let bound = bind(&compiled, &[Value::from("mem%")], "m").unwrap();
        assert_eq!(bound, vec![Value::from("mem%")]);
    }

    #[test]
    fn scalar_rejects_lists() {
        let compiled = derived("findByUsername");
        assert!(bind(&compiled, &[Value::from(vec!["a"])], "findByUsername").is_err());
    }
}
