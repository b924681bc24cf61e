//! Comparison, boolean logic and fallbacks.

use std::cmp::Ordering;

use super::{Arity, HelperError, HelperRegistry};
use crate::data::Value;

pub(super) fn register(registry: &mut HelperRegistry) {
    registry.register("eq", Arity::at_least(2), |_, args| {
        let first = &args[0];
        Ok(Value::Bool(args[1..].iter().any(|other| first.loose_eq(other))))
    });
    registry.register("ne", Arity::exact(2), |_, args| Ok(Value::Bool(!args[0].loose_eq(&args[1]))));
    registry.register("lt", Arity::exact(2), |_, args| ordered("lt", args, |o| o == Ordering::Less));
    registry.register("le", Arity::exact(2), |_, args| ordered("le", args, |o| o != Ordering::Greater));
    registry.register("gt", Arity::exact(2), |_, args| ordered("gt", args, |o| o == Ordering::Greater));
    registry.register("ge", Arity::exact(2), |_, args| ordered("ge", args, |o| o != Ordering::Less));

    // Like Go, `and`/`or` return an operand rather than a bool.
    registry.register("and", Arity::at_least(1), |_, args| {
        let picked = args.iter().find(|a| !a.is_truthy()).unwrap_or(&args[args.len() - 1]);
        Ok(picked.clone())
    });
    registry.register("or", Arity::at_least(1), |_, args| {
        let picked = args.iter().find(|a| a.is_truthy()).unwrap_or(&args[args.len() - 1]);
        Ok(picked.clone())
    });
    registry.register("not", Arity::exact(1), |_, args| Ok(Value::Bool(!args[0].is_truthy())));

    registry.register("default", Arity::between(1, 2), |_, args| {
        match args.get(1) {
            Some(value) if value.is_truthy() => Ok(value.clone()),
            _ => Ok(args[0].clone()),
        }
    });
    registry.register("coalesce", Arity::at_least(0), |_, args| {
        Ok(args.iter().find(|a| a.is_truthy()).cloned().unwrap_or(Value::Null))
    });
    registry.register("ternary", Arity::exact(3), |_, args| {
        Ok(if args[2].is_truthy() { args[0].clone() } else { args[1].clone() })
    });
}

fn ordered(name: &str, args: &[Value], test: impl Fn(Ordering) -> bool) -> Result<Value, HelperError> {
    let ordering = args[0].compare(&args[1]).ok_or_else(|| {
        HelperError::invalid(
            name,
            format!("incompatible types for comparison: {} and {}", args[0].kind(), args[1].kind()),
        )
    })?;
    Ok(Value::Bool(test(ordering)))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn test_eq_any_of() {
        assert_eq!(call("eq", &[s("b"), s("a"), s("b")]).unwrap(), Value::Bool(true));
        assert_eq!(call("eq", &[Value::Uint(2), Value::Float(2.0)]).unwrap(), Value::Bool(true));
        assert_eq!(call("ne", &[s("a"), s("b")]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_ordering_widens_numbers() {
        assert_eq!(call("lt", &[Value::Int(1), Value::Float(1.5)]).unwrap(), Value::Bool(true));
        assert_eq!(call("ge", &[Value::Uint(3), Value::Int(3)]).unwrap(), Value::Bool(true));
        assert_eq!(call("gt", &[s("b"), s("a")]).unwrap(), Value::Bool(true));
        let err = call("lt", &[s("a"), Value::Int(1)]).unwrap_err();
        assert!(err.to_string().contains("incompatible types"));
    }

    #[test]
    fn test_and_or_return_operands() {
        assert_eq!(call("and", &[Value::Int(1), s(""), s("x")]).unwrap(), s(""));
        assert_eq!(call("and", &[Value::Int(1), s("x")]).unwrap(), s("x"));
        assert_eq!(call("or", &[Value::Null, s("x")]).unwrap(), s("x"));
        assert_eq!(call("or", &[Value::Null, Value::Int(0)]).unwrap(), Value::Int(0));
        assert_eq!(call("not", &[Value::Seq(vec![])]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_fallbacks() {
        assert_eq!(call("default", &[s("N/A"), s("")]).unwrap(), s("N/A"));
        assert_eq!(call("default", &[s("N/A"), s("Bob")]).unwrap(), s("Bob"));
        assert_eq!(call("default", &[s("N/A"), Value::Null]).unwrap(), s("N/A"));
        assert_eq!(call("coalesce", &[Value::Null, s(""), s("z")]).unwrap(), s("z"));
        assert_eq!(call("coalesce", &[]).unwrap(), Value::Null);
        assert_eq!(call("ternary", &[s("yes"), s("no"), Value::Bool(false)]).unwrap(), s("no"));
    }
}
