//! Dynamically-typed value system
//!
//! A `Value` is a tagged union. The variant tag never changes; conversions
//! produce new values. Scalar variants copy, compound variants (slice, map,
//! channel, function, user object) share by reference, so mutation through
//! one alias is visible through every other.

pub mod channel;
pub mod convert;
pub mod duration;
pub mod func;
pub mod json;
pub mod ops;
pub mod time;

use crate::names::{self, NameId};
use crate::{VmError, VmResult};
use channel::Channel;
use duration::VmDuration;
use func::Func;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use time::VmTime;

/// Shared growable sequence of values.
pub type VmSlice = Arc<RwLock<Vec<Value>>>;

/// Shared string-keyed mapping. Iteration follows insertion order, which is
/// what the FOREACH key snapshot is taken from.
pub type VmMap = Arc<RwLock<IndexMap<String, Value>>>;

/// Opaque host object exposed to scripts.
///
/// The engine treats it as a bag of late-bound methods; everything else
/// about it belongs to the embedding application.
pub trait UserObject: Send + Sync {
    /// Type name shown to scripts.
    fn type_name(&self) -> &str;
    /// Textual form for printing.
    fn text(&self) -> String;
    /// Late-bound method lookup by case-folded name id.
    fn method_member(&self, name: NameId) -> Option<Func>;
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    /// The absent value
    Nil,
    /// Two-valued logic
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Exact fixed-point decimal
    Decimal(Decimal),
    /// Immutable UTF-8 text
    String(Arc<str>),
    /// Absolute instant with a fixed UTC offset
    Time(VmTime),
    /// Signed nanosecond span
    Duration(VmDuration),
    /// Shared growable sequence
    Slice(VmSlice),
    /// Shared string-keyed mapping
    Map(VmMap),
    /// Blocking FIFO channel
    Chan(Arc<Channel>),
    /// Callable (native builtin or compiled closure)
    Func(Arc<Func>),
    /// Host object with late-bound methods
    Struct(Arc<dyn UserObject>),
    /// Boxed scalar giving reference semantics to copies
    Ref(Arc<RwLock<Value>>),
}

/// Variant tag of a value, used as the conversion target id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `Неопределено`
    Nil,
    /// `Булево`
    Bool,
    /// `ЦелоеЧисло`
    Int,
    /// `Число`
    Decimal,
    /// `Строка`
    String,
    /// `Дата`
    Time,
    /// `Длительность`
    Duration,
    /// `Массив`
    Slice,
    /// `Структура`
    Map,
    /// `Канал`
    Chan,
    /// `Функция`
    Func,
    /// Host object
    Struct,
    /// Boxed scalar
    Ref,
}

impl TypeTag {
    /// Canonical type name shown to scripts.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "Неопределено",
            TypeTag::Bool => "Булево",
            TypeTag::Int => "ЦелоеЧисло",
            TypeTag::Decimal => "Число",
            TypeTag::String => "Строка",
            TypeTag::Time => "Дата",
            TypeTag::Duration => "Длительность",
            TypeTag::Slice => "Массив",
            TypeTag::Map => "Структура",
            TypeTag::Chan => "Канал",
            TypeTag::Func => "Функция",
            TypeTag::Struct => "Объект",
            TypeTag::Ref => "Ссылка",
        }
    }

    /// Resolve a case-folded type name, Russian or Latin alias.
    pub fn from_name(lower: &str) -> Option<Self> {
        Some(match lower {
            "неопределено" | "nil" => TypeTag::Nil,
            "булево" | "bool" => TypeTag::Bool,
            "целоечисло" | "int" => TypeTag::Int,
            "число" | "decimal" => TypeTag::Decimal,
            "строка" | "string" => TypeTag::String,
            "дата" | "date" => TypeTag::Time,
            "длительность" | "duration" => TypeTag::Duration,
            "массив" | "array" => TypeTag::Slice,
            "структура" | "map" => TypeTag::Map,
            "канал" | "chan" => TypeTag::Chan,
            "функция" | "func" => TypeTag::Func,
            _ => return None,
        })
    }

    /// Zero value of the type, as produced by the `MAKE` instruction.
    pub fn zero_value(self) -> VmResult<Value> {
        Ok(match self {
            TypeTag::Nil => Value::Nil,
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Int => Value::Int(0),
            TypeTag::Decimal => Value::Decimal(Decimal::ZERO),
            TypeTag::String => Value::str(""),
            TypeTag::Time => Value::Time(VmTime::zero()),
            TypeTag::Duration => Value::Duration(VmDuration(0)),
            TypeTag::Slice => Value::slice(Vec::new()),
            TypeTag::Map => Value::map(IndexMap::new()),
            TypeTag::Chan => Value::Chan(Arc::new(Channel::new(0))),
            TypeTag::Func | TypeTag::Struct | TypeTag::Ref => {
                return Err(VmError::TypeConversion)
            }
        })
    }
}

impl Value {
    /// String value from a `&str`.
    pub fn str(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    /// String value from an owned `String`.
    pub fn string(s: String) -> Self {
        Value::String(Arc::from(s.as_str()))
    }

    /// Slice value from a vector.
    pub fn slice(items: Vec<Value>) -> Self {
        Value::Slice(Arc::new(RwLock::new(items)))
    }

    /// Map value from an index map.
    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    /// Variant tag of the value.
    pub fn kind(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Decimal(_) => TypeTag::Decimal,
            Value::String(_) => TypeTag::String,
            Value::Time(_) => TypeTag::Time,
            Value::Duration(_) => TypeTag::Duration,
            Value::Slice(_) => TypeTag::Slice,
            Value::Map(_) => TypeTag::Map,
            Value::Chan(_) => TypeTag::Chan,
            Value::Func(_) => TypeTag::Func,
            Value::Struct(_) => TypeTag::Struct,
            Value::Ref(_) => TypeTag::Ref,
        }
    }

    /// Whether this is the nil singleton.
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Condition check for conditional jumps and loop conditions.
    ///
    /// Bool is itself, integers compare against zero, nil is false.
    pub fn truthy(&self) -> VmResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Nil => Ok(false),
            _ => Err(VmError::TypeMismatch),
        }
    }

    /// Integer payload, if this is an integer.
    pub fn as_int(&self) -> VmResult<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            _ => Err(VmError::TypeMismatch),
        }
    }

    /// Late-bound method lookup by interned name.
    ///
    /// The name is case-folded before the per-variant table is consulted.
    pub fn method_member(&self, name: NameId) -> Option<Func> {
        let lower = names::name_of_lower(name);
        match self {
            Value::Time(t) => t.method_member(&lower),
            Value::Chan(c) => Channel::method_member(c, &lower),
            Value::Struct(s) => s.method_member(names::lower_id(name)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Неопределено"),
            Value::Bool(true) => f.write_str("Истина"),
            Value::Bool(false) => f.write_str("Ложь"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d.normalize()),
            Value::String(s) => f.write_str(s),
            Value::Time(t) => f.write_str(&t.text()),
            Value::Duration(d) => f.write_str(&d.text()),
            Value::Slice(items) => {
                f.write_str("[")?;
                for (i, v) in items.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match v {
                        Value::String(s) => write!(f, "{:?}", s)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.read().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match v {
                        Value::String(s) => write!(f, "{:?}: {:?}", k, s)?,
                        other => write!(f, "{:?}: {}", k, other)?,
                    }
                }
                f.write_str("}")
            }
            Value::Chan(c) => write!(f, "Канал({})", c.capacity()),
            Value::Func(func) => {
                let name = names::name_of(func.name);
                if name.is_empty() {
                    f.write_str("Функция")
                } else {
                    write!(f, "Функция {}", name)
                }
            }
            Value::Struct(s) => f.write_str(&s.text()),
            Value::Ref(inner) => write!(f, "{}", inner.read()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}({:?})", self.kind().name(), s),
            other => write!(f, "{}({})", other.kind().name(), other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Int(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Int(a)) => {
                Decimal::from(*a) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Slice(a), Value::Slice(b)) => {
                Arc::ptr_eq(a, b) || *a.read() == *b.read()
            }
            (Value::Map(a), Value::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v == w))
            }
            (Value::Chan(a), Value::Chan(b)) => Arc::ptr_eq(a, b),
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Struct(a), Value::Struct(b)) => Arc::ptr_eq(a, b),
            (Value::Ref(a), Value::Ref(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Value::Nil.kind().name(), "Неопределено");
        assert_eq!(Value::Int(1).kind().name(), "ЦелоеЧисло");
        assert_eq!(Value::str("x").kind().name(), "Строка");
        assert_eq!(Value::slice(vec![]).kind().name(), "Массив");
    }

    #[test]
    fn test_type_tag_from_name() {
        assert_eq!(TypeTag::from_name("целоечисло"), Some(TypeTag::Int));
        assert_eq!(TypeTag::from_name("массив"), Some(TypeTag::Slice));
        assert_eq!(TypeTag::from_name("string"), Some(TypeTag::String));
        assert_eq!(TypeTag::from_name("чтоугодно"), None);
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(TypeTag::Int.zero_value().unwrap(), Value::Int(0));
        assert_eq!(TypeTag::Bool.zero_value().unwrap(), Value::Bool(false));
        assert_eq!(TypeTag::String.zero_value().unwrap(), Value::str(""));
        assert!(TypeTag::Func.zero_value().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(6).to_string(), "6");
        assert_eq!(Value::Bool(true).to_string(), "Истина");
        assert_eq!(Value::Nil.to_string(), "Неопределено");
        assert_eq!(
            Value::slice(vec![Value::Int(1), Value::str("а")]).to_string(),
            "[1, \"а\"]"
        );
    }

    #[test]
    fn test_compound_aliasing() {
        let a = Value::slice(vec![Value::Int(1)]);
        let b = a.clone();
        if let Value::Slice(items) = &a {
            items.write().push(Value::Int(2));
        }
        if let Value::Slice(items) = &b {
            assert_eq!(items.read().len(), 2);
        } else {
            unreachable!();
        }
    }

    #[test]
    fn test_mixed_numeric_equality() {
        assert_eq!(Value::Int(2), Value::Decimal(Decimal::from(2)));
        assert_ne!(Value::Int(2), Value::Decimal(Decimal::new(21, 1)));
    }

    #[test]
    fn test_user_object_methods() {
        struct Counter;
        impl UserObject for Counter {
            fn type_name(&self) -> &str {
                "Счётчик"
            }
            fn text(&self) -> String {
                "Счётчик".to_string()
            }
            fn method_member(&self, name: NameId) -> Option<crate::Func> {
                if &*crate::names::name_of_lower(name) == "ноль" {
                    Some(crate::func_must_params("Ноль", 0, |_, rets| {
                        rets.push(Value::Int(0));
                        Ok(())
                    }))
                } else {
                    None
                }
            }
        }

        let v = Value::Struct(Arc::new(Counter));
        assert_eq!(v.to_string(), "Счётчик");
        let m = v.method_member(crate::names::intern("Ноль")).unwrap();
        assert_eq!(m.invoke(&[]).unwrap(), Value::Int(0));
        assert!(v.method_member(crate::names::intern("нет")).is_none());
    }

    #[test]
    fn test_truthy() {
        assert!(Value::Bool(true).truthy().unwrap());
        assert!(!Value::Nil.truthy().unwrap());
        assert!(Value::Int(5).truthy().unwrap());
        assert!(!Value::Int(0).truthy().unwrap());
        assert!(Value::str("x").truthy().is_err());
    }
}
