//! Binary and unary operator dispatch
//!
//! Each variant decides which operators it supports; anything else fails
//! with `TypeMismatch`. Mixed Integer/Decimal operands promote to Decimal,
//! so decimal arithmetic never silently loses precision.

use super::duration::VmDuration;
use super::Value;
use crate::ops::Op;
use crate::{VmError, VmResult};
use rust_decimal::Decimal;
use std::cmp::Ordering;

impl Value {
    /// Apply binary operator `op` with `self` on the left.
    pub fn eval_binop(&self, op: Op, other: &Value) -> VmResult<Value> {
        // Equality against nil is defined for every variant.
        if matches!(op, Op::Eql | Op::Neq) && (self.is_nil() || other.is_nil()) {
            let eq = self.is_nil() && other.is_nil();
            return Ok(Value::Bool(if op == Op::Eql { eq } else { !eq }));
        }

        match (self, other) {
            (Value::Int(a), Value::Int(b)) => int_binop(op, *a, *b),
            (Value::Int(a), Value::Decimal(b)) => decimal_binop(op, Decimal::from(*a), *b),
            (Value::Decimal(a), Value::Int(b)) => decimal_binop(op, *a, Decimal::from(*b)),
            (Value::Decimal(a), Value::Decimal(b)) => decimal_binop(op, *a, *b),
            (Value::String(a), _) => string_binop(op, a, other),
            (Value::Bool(a), Value::Bool(b)) => bool_binop(op, *a, *b),
            (Value::Time(a), _) => a.eval_binop(op, other),
            (Value::Duration(a), _) => duration_binop(op, *a, other),
            (Value::Slice(a), Value::Slice(b)) => match op {
                Op::Add => {
                    let mut joined = a.read().clone();
                    joined.extend(b.read().iter().cloned());
                    Ok(Value::slice(joined))
                }
                Op::Eql => Ok(Value::Bool(self == other)),
                Op::Neq => Ok(Value::Bool(self != other)),
                _ => Err(VmError::TypeMismatch),
            },
            (Value::Map(_), Value::Map(_)) => match op {
                Op::Eql => Ok(Value::Bool(self == other)),
                Op::Neq => Ok(Value::Bool(self != other)),
                _ => Err(VmError::TypeMismatch),
            },
            _ => Err(VmError::TypeMismatch),
        }
    }

    /// Apply a unary operator in place of the value.
    ///
    /// `-` negates numerics, `!` inverts booleans, `^` is bitwise complement
    /// on integers.
    pub fn eval_unary(&self, op: char) -> VmResult<Value> {
        match (op, self) {
            ('-', Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or(VmError::NumericOverflow),
            ('-', Value::Decimal(d)) => Ok(Value::Decimal(-*d)),
            ('-', Value::Duration(d)) => d
                .0
                .checked_neg()
                .map(|n| Value::Duration(VmDuration(n)))
                .ok_or(VmError::NumericOverflow),
            ('!', Value::Bool(b)) => Ok(Value::Bool(!b)),
            ('^', Value::Int(i)) => Ok(Value::Int(!i)),
            _ => Err(VmError::TypeMismatch),
        }
    }
}

fn cmp_result(op: Op, ord: Ordering) -> VmResult<Value> {
    Ok(Value::Bool(match op {
        Op::Eql => ord == Ordering::Equal,
        Op::Neq => ord != Ordering::Equal,
        Op::Gtr => ord == Ordering::Greater,
        Op::Geq => ord != Ordering::Less,
        Op::Lss => ord == Ordering::Less,
        Op::Leq => ord != Ordering::Greater,
        _ => return Err(VmError::TypeMismatch),
    }))
}

fn int_binop(op: Op, a: i64, b: i64) -> VmResult<Value> {
    match op {
        Op::Add => a.checked_add(b).map(Value::Int).ok_or(VmError::NumericOverflow),
        Op::Sub => a.checked_sub(b).map(Value::Int).ok_or(VmError::NumericOverflow),
        Op::Mul => a.checked_mul(b).map(Value::Int).ok_or(VmError::NumericOverflow),
        Op::Quo => {
            if b == 0 {
                Err(VmError::DivisionByZero)
            } else {
                a.checked_div(b).map(Value::Int).ok_or(VmError::NumericOverflow)
            }
        }
        Op::Rem => {
            if b == 0 {
                Err(VmError::DivisionByZero)
            } else {
                a.checked_rem(b).map(Value::Int).ok_or(VmError::NumericOverflow)
            }
        }
        Op::Pow => {
            if b < 0 {
                // negative exponent leaves the integer domain
                return decimal_binop(op, Decimal::from(a), Decimal::from(b));
            }
            let exp = u32::try_from(b).map_err(|_| VmError::NumericOverflow)?;
            a.checked_pow(exp).map(Value::Int).ok_or(VmError::NumericOverflow)
        }
        Op::Shl => {
            let sh = u32::try_from(b).map_err(|_| VmError::NumericOverflow)?;
            if sh > 63 {
                return Err(VmError::NumericOverflow);
            }
            a.checked_shl(sh).map(Value::Int).ok_or(VmError::NumericOverflow)
        }
        Op::Shr => {
            let sh = u32::try_from(b).map_err(|_| VmError::NumericOverflow)?;
            if sh > 63 {
                return Err(VmError::NumericOverflow);
            }
            Ok(Value::Int(a >> sh))
        }
        Op::Or => Ok(Value::Int(a | b)),
        Op::And => Ok(Value::Int(a & b)),
        Op::Lor | Op::Land => Err(VmError::TypeMismatch),
        _ => cmp_result(op, a.cmp(&b)),
    }
}

fn decimal_binop(op: Op, a: Decimal, b: Decimal) -> VmResult<Value> {
    match op {
        Op::Add => a.checked_add(b).map(Value::Decimal).ok_or(VmError::NumericOverflow),
        Op::Sub => a.checked_sub(b).map(Value::Decimal).ok_or(VmError::NumericOverflow),
        Op::Mul => a.checked_mul(b).map(Value::Decimal).ok_or(VmError::NumericOverflow),
        Op::Quo => {
            if b.is_zero() {
                Err(VmError::DivisionByZero)
            } else {
                a.checked_div(b).map(Value::Decimal).ok_or(VmError::NumericOverflow)
            }
        }
        Op::Rem => {
            if b.is_zero() {
                Err(VmError::DivisionByZero)
            } else {
                a.checked_rem(b).map(Value::Decimal).ok_or(VmError::NumericOverflow)
            }
        }
        Op::Pow => {
            // only integral exponents keep the arithmetic exact
            if !b.is_integer() {
                return Err(VmError::TypeMismatch);
            }
            let exp = b.mantissa() / 10i128.pow(b.scale());
            decimal_powi(a, exp as i64).map(Value::Decimal)
        }
        Op::Or | Op::And | Op::Lor | Op::Land | Op::Shl | Op::Shr => Err(VmError::TypeMismatch),
        _ => cmp_result(op, a.cmp(&b)),
    }
}

/// Exact integral power by repeated squaring; negative exponents go through
/// the reciprocal.
fn decimal_powi(base: Decimal, exp: i64) -> VmResult<Decimal> {
    if exp < 0 {
        let positive = decimal_powi(base, -exp)?;
        if positive.is_zero() {
            return Err(VmError::DivisionByZero);
        }
        return Decimal::ONE.checked_div(positive).ok_or(VmError::NumericOverflow);
    }
    let mut result = Decimal::ONE;
    let mut factor = base;
    let mut n = exp as u64;
    while n > 0 {
        if n & 1 == 1 {
            result = result.checked_mul(factor).ok_or(VmError::NumericOverflow)?;
        }
        n >>= 1;
        if n > 0 {
            factor = factor.checked_mul(factor).ok_or(VmError::NumericOverflow)?;
        }
    }
    Ok(result)
}

fn string_binop(op: Op, a: &str, other: &Value) -> VmResult<Value> {
    match (op, other) {
        (Op::Add, Value::String(b)) => Ok(Value::string(format!("{}{}", a, b))),
        // `-` removes every occurrence of the right operand
        (Op::Sub, Value::String(b)) => Ok(Value::string(a.replace(&**b, ""))),
        // repetition; negative count yields the empty string
        (Op::Mul, Value::Int(n)) => {
            let n = (*n).max(0) as usize;
            Ok(Value::string(a.repeat(n)))
        }
        (op, Value::String(b)) if op.is_comparison() => cmp_result(op, a.as_bytes().cmp(b.as_bytes())),
        _ => Err(VmError::TypeMismatch),
    }
}

fn bool_binop(op: Op, a: bool, b: bool) -> VmResult<Value> {
    match op {
        Op::Lor | Op::Or => Ok(Value::Bool(a || b)),
        Op::Land | Op::And => Ok(Value::Bool(a && b)),
        Op::Eql => Ok(Value::Bool(a == b)),
        Op::Neq => Ok(Value::Bool(a != b)),
        _ => Err(VmError::TypeMismatch),
    }
}

fn duration_binop(op: Op, a: VmDuration, other: &Value) -> VmResult<Value> {
    match (op, other) {
        (Op::Add, Value::Duration(b)) => a
            .0
            .checked_add(b.0)
            .map(|n| Value::Duration(VmDuration(n)))
            .ok_or(VmError::NumericOverflow),
        (Op::Sub, Value::Duration(b)) => a
            .0
            .checked_sub(b.0)
            .map(|n| Value::Duration(VmDuration(n)))
            .ok_or(VmError::NumericOverflow),
        (Op::Add, Value::Time(t)) => Ok(Value::Time(t.add(a)?)),
        (op, Value::Duration(b)) if op.is_comparison() => cmp_result(op, a.0.cmp(&b.0)),
        _ => Err(VmError::TypeMismatch),
    }
}
