//! Sequence, mapping and string accessors.

use super::{int_arg, text_arg, Arity, HelperError, HelperRegistry};
use crate::data::Value;

pub(super) fn register(registry: &mut HelperRegistry) {
    registry.register("len", Arity::exact(1), |_, args| {
        let n = match &args[0] {
            Value::String(s) | Value::Markup(s) => s.chars().count(),
            other => other
                .len()
                .ok_or_else(|| HelperError::invalid("len", format!("len of type {}", other.kind())))?,
        };
        Ok(Value::Int(n as i64))
    });
    registry.register("first", Arity::exact(1), |_, args| edge("first", &args[0], true));
    registry.register("last", Arity::exact(1), |_, args| edge("last", &args[0], false));
    registry.register("index", Arity::at_least(1), |_, args| {
        args[1..].iter().try_fold(args[0].clone(), |item, key| index(&item, key))
    });
    registry.register("slice", Arity::between(1, 3), |_, args| slice(&args[0], &args[1..]));
    registry.register("join", Arity::exact(2), |_, args| {
        // `join .Items ", "` and `.Items | join ", "` both work.
        let (items, sep) = match (&args[0], &args[1]) {
            (Value::Seq(items), sep) | (sep, Value::Seq(items)) => (items, sep),
            (Value::Null, _) | (_, Value::Null) => return Ok(Value::from("")),
            (other, _) => {
                return Err(HelperError::invalid("join", format!("cannot join {}", other.kind())));
            }
        };
        let sep = text_arg(sep);
        let parts: Vec<String> = items.iter().map(text_arg).collect();
        Ok(Value::from(parts.join(&sep)))
    });
    registry.register("contains", Arity::exact(2), |_, args| {
        let is_collection = |v: &Value| matches!(v, Value::Seq(_) | Value::Map(_));
        let (collection, needle) = if !is_collection(&args[0]) && is_collection(&args[1]) {
            (&args[1], &args[0])
        } else {
            (&args[0], &args[1])
        };
        let found = match collection {
            Value::Seq(items) => items.iter().any(|item| item.loose_eq(needle)),
            Value::Map(map) => map.contains_key(&text_arg(needle)),
            Value::Null => false,
            other => text_arg(other).contains(&text_arg(needle)),
        };
        Ok(Value::Bool(found))
    });
}

fn edge(name: &str, value: &Value, first: bool) -> Result<Value, HelperError> {
    match value {
        Value::Seq(items) => {
            let item = if first { items.first() } else { items.last() };
            Ok(item.cloned().unwrap_or(Value::Null))
        }
        Value::String(s) => {
            let c = if first { s.chars().next() } else { s.chars().last() };
            Ok(c.map(|c| Value::from(c.to_string())).unwrap_or(Value::Null))
        }
        Value::Null => Ok(Value::Null),
        other => Err(HelperError::invalid(name, format!("cannot take {} of {}", name, other.kind()))),
    }
}

fn index(item: &Value, key: &Value) -> Result<Value, HelperError> {
    match item {
        Value::Seq(items) => {
            let i = int_arg("index", key)?;
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| HelperError::invalid("index", format!("index out of range: {}", i)))
        }
        Value::Map(map) => Ok(map.get(&text_arg(key)).cloned().unwrap_or(Value::Null)),
        Value::String(s) => {
            let i = int_arg("index", key)?;
            usize::try_from(i)
                .ok()
                .and_then(|i| s.as_bytes().get(i))
                .map(|b| Value::Uint(*b as u64))
                .ok_or_else(|| HelperError::invalid("index", format!("index out of range: {}", i)))
        }
        other => Err(HelperError::invalid("index", format!("can't index item of type {}", other.kind()))),
    }
}

/// Bounds are clamped to the length of the operand.
fn slice(value: &Value, bounds: &[Value]) -> Result<Value, HelperError> {
    let len = match value {
        Value::Seq(items) => items.len(),
        Value::String(s) => s.chars().count(),
        Value::Null => return Ok(Value::Null),
        other => return Err(HelperError::invalid("slice", format!("can't slice item of type {}", other.kind()))),
    };
    let clamp = |v: &Value| -> Result<usize, HelperError> { Ok(int_arg("slice", v)?.clamp(0, len as i64) as usize) };
    let start = bounds.first().map(clamp).transpose()?.unwrap_or(0);
    let end = bounds.get(1).map(clamp).transpose()?.unwrap_or(len);
    if start > end {
        return Err(HelperError::invalid("slice", format!("invalid slice index: {} > {}", start, end)));
    }
    Ok(match value {
        Value::Seq(items) => Value::Seq(items[start..end].to_vec()),
        Value::String(s) => Value::from(s.chars().skip(start).take(end - start).collect::<String>()),
        _ => Value::Null,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use std::collections::BTreeMap;

    fn seq(items: &[&str]) -> Value {
        Value::Seq(items.iter().map(|i| s(i)).collect())
    }

    #[test]
    fn test_len_counts_runes() {
        assert_eq!(call("len", &[s("héllo")]).unwrap(), Value::Int(5));
        assert_eq!(call("len", &[seq(&["a", "b"])]).unwrap(), Value::Int(2));
        assert_eq!(call("len", &[Value::Null]).unwrap(), Value::Int(0));
        assert!(call("len", &[Value::Int(3)]).is_err());
    }

    #[test]
    fn test_first_last() {
        assert_eq!(call("first", &[seq(&["a", "b"])]).unwrap(), s("a"));
        assert_eq!(call("last", &[seq(&["a", "b"])]).unwrap(), s("b"));
        assert_eq!(call("first", &[seq(&[])]).unwrap(), Value::Null);
    }

    #[test]
    fn test_index_nested() {
        let inner = Value::Map(BTreeMap::from([("k".to_string(), s("v"))]));
        let outer = Value::Seq(vec![inner]);
        assert_eq!(call("index", &[outer.clone(), Value::Int(0), s("k")]).unwrap(), s("v"));
        assert_eq!(call("index", &[outer.clone(), Value::Int(0), s("missing")]).unwrap(), Value::Null);
        let err = call("index", &[outer, Value::Int(3)]).unwrap_err();
        assert!(err.to_string().contains("index out of range: 3"));
    }

    #[test]
    fn test_slice() {
        assert_eq!(call("slice", &[seq(&["a", "b", "c"]), Value::Int(1)]).unwrap(), seq(&["b", "c"]));
        assert_eq!(call("slice", &[seq(&["a", "b", "c"]), Value::Int(0), Value::Int(2)]).unwrap(), seq(&["a", "b"]));
        assert_eq!(call("slice", &[s("héllo"), Value::Int(1), Value::Int(3)]).unwrap(), s("él"));
        assert_eq!(call("slice", &[s("abc"), Value::Int(1), Value::Int(99)]).unwrap(), s("bc"));
    }

    #[test]
    fn test_join_either_order() {
        assert_eq!(call("join", &[seq(&["a", "b"]), s(", ")]).unwrap(), s("a, b"));
        assert_eq!(call("join", &[s("-"), seq(&["a", "b"])]).unwrap(), s("a-b"));
        assert_eq!(call("join", &[s("-"), Value::Null]).unwrap(), s(""));
    }

    #[test]
    fn test_contains() {
        assert_eq!(call("contains", &[seq(&["a", "b"]), s("b")]).unwrap(), Value::Bool(true));
        assert_eq!(call("contains", &[s("b"), seq(&["a", "b"])]).unwrap(), Value::Bool(true));
        assert_eq!(call("contains", &[s("hello world"), s("world")]).unwrap(), Value::Bool(true));
        let map = Value::Map(BTreeMap::from([("k".to_string(), Value::Null)]));
        assert_eq!(call("contains", &[map, s("k")]).unwrap(), Value::Bool(true));
    }
}
