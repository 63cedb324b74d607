//! JSON marshalling
//!
//! Marshalling renders scalars exactly (decimals keep their digits), times
//! as quoted RFC 3339 strings and durations as their quoted textual form.
//! Compound values are walked recursively with a visited set keyed by
//! compound identity, so a reference cycle fails instead of recursing
//! forever.
//!
//! Unmarshalling infers the value variant from the JSON shape: a number
//! parseable as an integer becomes Integer, any other number Decimal,
//! arrays become slices, objects string-maps, null nil.

use super::{Value, VmMap, VmSlice};
use crate::{VmError, VmResult};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Marshal a value to JSON text.
pub fn to_json(value: &Value) -> VmResult<String> {
    let mut out = String::new();
    let mut visited: Vec<*const ()> = Vec::new();
    write_value(value, &mut out, &mut visited)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String, visited: &mut Vec<*const ()>) -> VmResult<()> {
    match value {
        Value::Nil => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Decimal(d) => out.push_str(&d.normalize().to_string()),
        Value::String(s) => out.push_str(&escape(s)?),
        Value::Time(t) => {
            out.push('"');
            out.push_str(&t.text());
            out.push('"');
        }
        Value::Duration(d) => {
            out.push('"');
            out.push_str(&d.text());
            out.push('"');
        }
        Value::Slice(items) => write_slice(items, out, visited)?,
        Value::Map(entries) => write_map(entries, out, visited)?,
        Value::Chan(_) | Value::Func(_) | Value::Struct(_) | Value::Ref(_) => {
            return Err(VmError::Json(format!(
                "несериализуемое значение типа {}",
                value.kind().name()
            )))
        }
    }
    Ok(())
}

fn write_slice(items: &VmSlice, out: &mut String, visited: &mut Vec<*const ()>) -> VmResult<()> {
    let id = Arc::as_ptr(items) as *const ();
    enter(visited, id)?;
    out.push('[');
    for (i, v) in items.read().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_value(v, out, visited)?;
    }
    out.push(']');
    visited.pop();
    Ok(())
}

fn write_map(entries: &VmMap, out: &mut String, visited: &mut Vec<*const ()>) -> VmResult<()> {
    let id = Arc::as_ptr(entries) as *const ();
    enter(visited, id)?;
    out.push('{');
    for (i, (k, v)) in entries.read().iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape(k)?);
        out.push(':');
        write_value(v, out, visited)?;
    }
    out.push('}');
    visited.pop();
    Ok(())
}

fn enter(visited: &mut Vec<*const ()>, id: *const ()) -> VmResult<()> {
    if visited.contains(&id) {
        return Err(VmError::Json("циклическая ссылка".into()));
    }
    visited.push(id);
    Ok(())
}

fn escape(s: &str) -> VmResult<String> {
    serde_json::to_string(s).map_err(|e| VmError::Json(e.to_string()))
}

/// Unmarshal JSON text into a value.
pub fn from_json(s: &str) -> VmResult<Value> {
    let raw: serde_json::Value =
        serde_json::from_str(s).map_err(|e| VmError::Json(e.to_string()))?;
    infer(&raw)
}

fn infer(raw: &serde_json::Value) -> VmResult<Value> {
    Ok(match raw {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                let text = n.to_string();
                let d = if text.contains(['e', 'E']) {
                    Decimal::from_scientific(&text)
                        .map_err(|e| VmError::Json(e.to_string()))?
                } else {
                    Decimal::from_str(&text).map_err(|e| VmError::Json(e.to_string()))?
                };
                Value::Decimal(d)
            }
        }
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(infer(item)?);
            }
            Value::slice(out)
        }
        serde_json::Value::Object(entries) => {
            let mut out = IndexMap::with_capacity(entries.len());
            for (k, v) in entries {
                out.insert(k.clone(), infer(v)?);
            }
            Value::map(out)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_scalars() {
        assert_eq!(to_json(&Value::Nil).unwrap(), "null");
        assert_eq!(to_json(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(to_json(&Value::Int(-5)).unwrap(), "-5");
        assert_eq!(to_json(&Value::Decimal(dec("1.25"))).unwrap(), "1.25");
        assert_eq!(to_json(&Value::str("а\"б")).unwrap(), "\"а\\\"б\"");
    }

    #[test]
    fn test_inference() {
        assert_eq!(from_json("3").unwrap(), Value::Int(3));
        assert_eq!(from_json("3.5").unwrap(), Value::Decimal(dec("3.5")));
        assert_eq!(from_json("true").unwrap(), Value::Bool(true));
        assert_eq!(from_json("null").unwrap(), Value::Nil);
        assert_eq!(from_json("\"х\"").unwrap(), Value::str("х"));
        assert_eq!(
            from_json("[1,2,3]").unwrap(),
            Value::slice(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_roundtrip() {
        let mut entries = IndexMap::new();
        entries.insert("цел".to_string(), Value::Int(7));
        entries.insert("число".to_string(), Value::Decimal(dec("2.5")));
        entries.insert("текст".to_string(), Value::str("привет"));
        entries.insert("флаг".to_string(), Value::Bool(false));
        entries.insert("пусто".to_string(), Value::Nil);
        entries.insert(
            "массив".to_string(),
            Value::slice(vec![Value::Int(1), Value::str("а")]),
        );
        let v = Value::map(entries);
        assert_eq!(from_json(&to_json(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn test_big_integer_roundtrip() {
        let v = Value::Int(i64::MAX);
        assert_eq!(from_json(&to_json(&v).unwrap()).unwrap(), v);
    }

    #[test]
    fn test_time_marshals_quoted() {
        let t = super::super::time::VmTime::parse("2024-03-09T15:04:05+00:00").unwrap();
        let s = to_json(&Value::Time(t)).unwrap();
        assert!(s.starts_with('"') && s.ends_with('"'));
    }

    #[test]
    fn test_duration_marshals_text_form() {
        let d = super::super::duration::VmDuration(1_500_000_000);
        assert_eq!(to_json(&Value::Duration(d)).unwrap(), "\"1.5с\"");
    }

    #[test]
    fn test_cycle_detection() {
        let inner = Value::slice(vec![]);
        if let Value::Slice(items) = &inner {
            items.write().push(inner.clone());
        }
        assert!(matches!(to_json(&inner), Err(VmError::Json(_))));
    }

    #[test]
    fn test_shared_but_acyclic_is_fine() {
        let shared = Value::slice(vec![Value::Int(1)]);
        let outer = Value::slice(vec![shared.clone(), shared]);
        assert_eq!(to_json(&outer).unwrap(), "[[1],[1]]");
    }

    #[test]
    fn test_unserializable() {
        let c = Value::Chan(Arc::new(super::super::channel::Channel::new(1)));
        assert!(to_json(&c).is_err());
    }
}
