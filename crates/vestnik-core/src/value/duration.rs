//! Signed nanosecond spans
//!
//! The textual form decomposes largest-unit-first with localized suffixes
//! (`1ч2м3с`, `500мс`); zero prints as `0с`, sub-second values use the
//! fractional form with trailing zeros trimmed. Parsing accepts Go-style
//! duration strings (`1.5s`, `500ms`, `2h45m`).

use crate::{VmError, VmResult};
use std::fmt;

/// Signed span in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmDuration(pub i64);

/// One nanosecond.
pub const NANOSECOND: i64 = 1;
/// One microsecond.
pub const MICROSECOND: i64 = 1000 * NANOSECOND;
/// One millisecond.
pub const MILLISECOND: i64 = 1000 * MICROSECOND;
/// One second.
pub const SECOND: i64 = 1000 * MILLISECOND;
/// One minute.
pub const MINUTE: i64 = 60 * SECOND;
/// One hour.
pub const HOUR: i64 = 60 * MINUTE;
/// One day.
pub const DAY: i64 = 24 * HOUR;

impl VmDuration {
    /// Localized textual form.
    pub fn text(&self) -> String {
        if self.0 == 0 {
            return "0с".to_string();
        }
        let neg = self.0 < 0;
        let u = self.0.unsigned_abs();
        let mut out = String::new();
        if neg {
            out.push('-');
        }

        if u < SECOND as u64 {
            // single sub-second unit with a fraction
            let (prec, unit) = if u < MICROSECOND as u64 {
                (0, "нс")
            } else if u < MILLISECOND as u64 {
                (3, "мкс")
            } else {
                (6, "мс")
            };
            out.push_str(&frac(u, prec));
            out.push_str(unit);
            return out;
        }

        let days = u / DAY as u64;
        let hours = u / HOUR as u64 % 24;
        let minutes = u / MINUTE as u64 % 60;
        let sub_minute = u % MINUTE as u64;
        if days > 0 {
            out.push_str(&days.to_string());
            out.push('д');
        }
        if days > 0 || hours > 0 {
            out.push_str(&hours.to_string());
            out.push('ч');
        }
        if days > 0 || hours > 0 || minutes > 0 {
            out.push_str(&minutes.to_string());
            out.push('м');
        }
        out.push_str(&frac(sub_minute, 9));
        out.push('с');
        out
    }

    /// Parse a Go-style duration string: a sign followed by one or more
    /// `<number><unit>` groups, units `ns us µs ms s m h d`.
    pub fn parse(s: &str) -> VmResult<Self> {
        let err = || VmError::Parse(format!("Неверная длительность: {}", s));
        let mut rest = s;
        let mut neg = false;
        if let Some(r) = rest.strip_prefix('-') {
            neg = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('+') {
            rest = r;
        }
        if rest == "0" {
            return Ok(VmDuration(0));
        }
        if rest.is_empty() {
            return Err(err());
        }

        let mut total: i64 = 0;
        while !rest.is_empty() {
            let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let int_part: u64 = if int_len == 0 {
                0
            } else {
                rest[..int_len].parse().map_err(|_| err())?
            };
            rest = &rest[int_len..];

            let mut frac_digits = "";
            if let Some(r) = rest.strip_prefix('.') {
                let frac_len = r.find(|c: char| !c.is_ascii_digit()).unwrap_or(r.len());
                frac_digits = &r[..frac_len];
                rest = &r[frac_len..];
            }
            if int_len == 0 && frac_digits.is_empty() {
                return Err(err());
            }

            let (unit, unit_len) = match () {
                _ if rest.starts_with("ns") => (NANOSECOND, 2),
                _ if rest.starts_with("us") => (MICROSECOND, 2),
                _ if rest.starts_with("µs") => (MICROSECOND, "µs".len()),
                _ if rest.starts_with("ms") => (MILLISECOND, 2),
                _ if rest.starts_with('s') => (SECOND, 1),
                _ if rest.starts_with('m') => (MINUTE, 1),
                _ if rest.starts_with('h') => (HOUR, 1),
                _ if rest.starts_with('d') => (DAY, 1),
                _ => return Err(err()),
            };
            rest = &rest[unit_len..];

            let mut part = (int_part as i64)
                .checked_mul(unit)
                .ok_or(VmError::NumericOverflow)?;
            if !frac_digits.is_empty() {
                let mut scale = unit;
                for c in frac_digits.chars() {
                    scale /= 10;
                    part = part
                        .checked_add(scale * (c as i64 - '0' as i64))
                        .ok_or(VmError::NumericOverflow)?;
                    if scale == 0 {
                        break;
                    }
                }
            }
            total = total.checked_add(part).ok_or(VmError::NumericOverflow)?;
        }

        Ok(VmDuration(if neg { -total } else { total }))
    }

    /// Binary form: little-endian signed 64-bit nanoseconds.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode the binary form.
    pub fn from_bytes(data: &[u8]) -> VmResult<Self> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| VmError::Parse("Неверная длительность".into()))?;
        Ok(VmDuration(i64::from_le_bytes(bytes)))
    }
}

/// Render `v / 10^prec` with the fraction trimmed of trailing zeros.
fn frac(v: u64, prec: u32) -> String {
    let scale = 10u64.pow(prec);
    let whole = v / scale;
    let mut rem = v % scale;
    if rem == 0 {
        return whole.to_string();
    }
    let mut digits = prec;
    while rem % 10 == 0 {
        rem /= 10;
        digits -= 1;
    }
    format!("{}.{:0width$}", whole, rem, width = digits as usize)
}

impl fmt::Display for VmDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}
