//! Type conversion
//!
//! `convert_to_type` implements the closed conversion graph. Converting a
//! value to its own type is the identity; everything not on the graph fails
//! with `TypeConversion`. String sources additionally understand hex
//! integer literals, the accepted date formats, and JSON for the compound
//! targets.

use super::json;
use super::time::VmTime;
use super::{TypeTag, Value};
use crate::{VmError, VmResult};
use rust_decimal::Decimal;
use std::str::FromStr;

impl Value {
    /// Convert to the type named by `target`.
    pub fn convert_to_type(&self, target: TypeTag) -> VmResult<Value> {
        if self.kind() == target {
            return Ok(self.clone());
        }
        match (self, target) {
            (Value::String(s), TypeTag::Int) => parse_int(s).map(Value::Int),
            (Value::String(s), TypeTag::Decimal) => parse_decimal(s).map(Value::Decimal),
            (Value::String(s), TypeTag::Time) => VmTime::parse(s).map(Value::Time),
            (Value::String(s), TypeTag::Bool) => parse_bool(s).map(Value::Bool),
            (Value::String(s), TypeTag::Slice) => {
                let v = json::from_json(s)?;
                match v {
                    Value::Slice(_) => Ok(v),
                    _ => Err(VmError::TypeConversion),
                }
            }
            (Value::String(s), TypeTag::Map) => {
                let v = json::from_json(s)?;
                match v {
                    Value::Map(_) => Ok(v),
                    _ => Err(VmError::TypeConversion),
                }
            }
            (Value::String(s), TypeTag::Duration) => {
                super::duration::VmDuration::parse(s).map(Value::Duration)
            }

            (Value::Int(i), TypeTag::Decimal) => Ok(Value::Decimal(Decimal::from(*i))),
            (Value::Int(i), TypeTag::String) => Ok(Value::string(i.to_string())),
            (Value::Int(i), TypeTag::Bool) => Ok(Value::Bool(*i != 0)),

            (Value::Decimal(d), TypeTag::Int) => Ok(Value::Int(
                d.trunc().to_string().parse().map_err(|_| VmError::NumericOverflow)?,
            )),
            (Value::Decimal(d), TypeTag::String) => Ok(Value::string(d.normalize().to_string())),

            (Value::Bool(b), TypeTag::String) => Ok(Value::str(if *b { "Истина" } else { "Ложь" })),
            (Value::Bool(b), TypeTag::Int) => Ok(Value::Int(i64::from(*b))),

            // a time marshals to its quoted JSON form
            (Value::Time(t), TypeTag::String) => Ok(Value::string(format!("\"{}\"", t.text()))),
            (Value::Duration(d), TypeTag::String) => Ok(Value::string(d.text())),

            (Value::Slice(_) | Value::Map(_), TypeTag::String) => {
                json::to_json(self).map(Value::string)
            }

            _ => Err(VmError::TypeConversion),
        }
    }

    /// `CASTNUM`: force the value into the numeric domain.
    ///
    /// Strings with an exponent or a decimal point become decimals, other
    /// strings integers (with `0x` hex accepted); numerics pass through.
    pub fn cast_number(&self) -> VmResult<Value> {
        match self {
            Value::Int(_) | Value::Decimal(_) => Ok(self.clone()),
            Value::String(s) => {
                if s.contains(['.', 'e', 'E']) {
                    parse_decimal(s).map(Value::Decimal)
                } else {
                    parse_int(s).map(Value::Int)
                }
            }
            _ => Err(VmError::TypeMismatch),
        }
    }
}

fn parse_int(s: &str) -> VmResult<i64> {
    let r = if let Some(hex) = s.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    r.map_err(|_| VmError::Parse(format!("Неверное целое число: {}", s)))
}

fn parse_decimal(s: &str) -> VmResult<Decimal> {
    let r = if s.contains(['e', 'E']) {
        Decimal::from_scientific(s).map_err(|_| ())
    } else {
        Decimal::from_str(s).map_err(|_| ())
    };
    r.map_err(|_| VmError::Parse(format!("Неверное число: {}", s)))
}

fn parse_bool(s: &str) -> VmResult<bool> {
    match s.to_lowercase().as_str() {
        "истина" | "true" | "да" | "1" => Ok(true),
        "ложь" | "false" | "нет" | "0" => Ok(false),
        _ => Err(VmError::Parse(format!("Неверное булево: {}", s))),
    }
}
