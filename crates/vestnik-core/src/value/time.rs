//! Absolute instants
//!
//! A time value is an instant plus a fixed UTC offset. Comparison and
//! equality are by instant; the offset only affects the broken-down fields
//! and textual forms.
//!
//! The format grammar is dual-language (Cyrillic/Latin), longest token
//! first. A day-of-month token switches the full/short month name from the
//! nominative to the genitive form for every later month token.

use super::duration::VmDuration;
use super::func::{func_must_params, Func};
use super::Value;
use crate::ops::Op;
use crate::{VmError, VmResult};
use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Timelike};

/// Instant with a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VmTime(pub DateTime<FixedOffset>);

const WEEKDAYS: [&str; 8] = [
    "", // день недели 0 не бывает
    "понедельник",
    "вторник",
    "среда",
    "четверг",
    "пятница",
    "суббота",
    "воскресенье",
];

const WEEKDAYS_SHORT: [&str; 7] = ["пн", "вт", "ср", "чт", "пт", "сб", "вс"];

const MONTHS_NOMINATIVE: [&str; 13] = [
    "",
    "январь",
    "февраль",
    "март",
    "апрель",
    "май",
    "июнь",
    "июль",
    "август",
    "сентябрь",
    "октябрь",
    "ноябрь",
    "декабрь",
];

const MONTHS_GENITIVE: [&str; 13] = [
    "",
    "января",
    "февраля",
    "марта",
    "апреля",
    "мая",
    "июня",
    "июля",
    "августа",
    "сентября",
    "октября",
    "ноября",
    "декабря",
];

impl VmTime {
    /// Current instant in the local offset.
    pub fn now() -> Self {
        VmTime(Local::now().fixed_offset())
    }

    /// The epoch instant, used as the type's zero value.
    pub fn zero() -> Self {
        VmTime(
            DateTime::from_timestamp(0, 0)
                .expect("epoch is representable")
                .fixed_offset(),
        )
    }

    /// Parse a date/time string, trying the accepted formats in order.
    pub fn parse(s: &str) -> VmResult<Self> {
        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Ok(VmTime(t));
        }
        const NAIVE_FORMATS: [&str; 4] = [
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S",
            "%d.%m.%Y %H:%M:%S",
            "%Y%m%d%H%M%S",
        ];
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Self::from_local_naive(naive);
            }
        }
        const DATE_FORMATS: [&str; 3] = ["%Y%m%d", "%d.%m.%Y", "%Y-%m-%d"];
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
                let naive = date.and_hms_opt(0, 0, 0).ok_or_else(date_parse_error)?;
                return Self::from_local_naive(naive);
            }
        }
        if let Ok(t) = DateTime::parse_from_rfc2822(s) {
            return Ok(VmTime(t));
        }
        Err(date_parse_error())
    }

    fn from_local_naive(naive: NaiveDateTime) -> VmResult<Self> {
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| VmTime(t.fixed_offset()))
            .ok_or_else(date_parse_error)
    }

    /// RFC 3339 textual form.
    pub fn text(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Calendar year.
    pub fn year(&self) -> i64 {
        self.0.year() as i64
    }

    /// Calendar month, 1–12.
    pub fn month(&self) -> i64 {
        self.0.month() as i64
    }

    /// Day of month, 1–31.
    pub fn day(&self) -> i64 {
        self.0.day() as i64
    }

    /// ISO 8601 week and week-year, in that order.
    pub fn iso_week(&self) -> (i64, i64) {
        let w = self.0.iso_week();
        (w.week() as i64, w.year() as i64)
    }

    /// Day of week, 1 = Monday … 7 = Sunday.
    pub fn weekday(&self) -> i64 {
        self.0.weekday().number_from_monday() as i64
    }

    /// Quarter of the year, 1–4.
    pub fn quarter(&self) -> i64 {
        (self.month() - 1) / 3 + 1
    }

    /// Day of year, 1–366.
    pub fn day_of_year(&self) -> i64 {
        self.0.ordinal() as i64
    }

    /// Hour of day, 0–23.
    pub fn hour(&self) -> i64 {
        self.0.hour() as i64
    }

    /// Minute of hour.
    pub fn minute(&self) -> i64 {
        self.0.minute() as i64
    }

    /// Second of minute.
    pub fn second(&self) -> i64 {
        self.0.second() as i64
    }

    /// Millisecond part of the current second.
    pub fn millisecond(&self) -> i64 {
        (self.0.nanosecond() / 1_000_000) as i64
    }

    /// Microsecond part of the current second.
    pub fn microsecond(&self) -> i64 {
        (self.0.nanosecond() / 1_000) as i64
    }

    /// Nanosecond part of the current second.
    pub fn nanosecond(&self) -> i64 {
        self.0.nanosecond() as i64
    }

    /// Shift by a duration.
    pub fn add(&self, d: VmDuration) -> VmResult<VmTime> {
        self.0
            .checked_add_signed(chrono::Duration::nanoseconds(d.0))
            .map(VmTime)
            .ok_or(VmError::NumericOverflow)
    }

    /// Span between two instants.
    pub fn sub_time(&self, other: &VmTime) -> VmResult<VmDuration> {
        (self.0 - other.0)
            .num_nanoseconds()
            .map(VmDuration)
            .ok_or(VmError::NumericOverflow)
    }

    /// Apply the localized format grammar.
    pub fn format(&self, pattern: &str) -> String {
        let src: Vec<char> = pattern.chars().collect();
        let mut out = String::with_capacity(pattern.len() * 2);
        let mut was_day = false;

        let month = self.month() as usize;
        let month_name = |was_day: bool| {
            if was_day {
                MONTHS_GENITIVE[month]
            } else {
                MONTHS_NOMINATIVE[month]
            }
        };

        let mut i = 0;
        while i < src.len() {
            if i + 4 <= src.len() {
                let s: String = src[i..i + 4].iter().collect();
                match s.as_str() {
                    "дддд" | "dddd" => {
                        out.push_str(WEEKDAYS[self.weekday() as usize]);
                        i += 4;
                        continue;
                    }
                    "ММММ" | "MMMM" => {
                        out.push_str(month_name(was_day));
                        i += 4;
                        continue;
                    }
                    "гггг" | "yyyy" => {
                        out.push_str(&self.year().to_string());
                        i += 4;
                        continue;
                    }
                    _ => {}
                }
            }
            if i + 3 <= src.len() {
                let s: String = src[i..i + 3].iter().collect();
                match s.as_str() {
                    "ддд" | "ddd" => {
                        out.push_str(WEEKDAYS_SHORT[self.weekday() as usize - 1]);
                        i += 3;
                        continue;
                    }
                    "МММ" | "MMM" => {
                        out.extend(month_name(was_day).chars().take(3));
                        i += 3;
                        continue;
                    }
                    "ссс" | "sss" => {
                        out.push_str(&format!("{:03}", self.millisecond()));
                        i += 3;
                        continue;
                    }
                    _ => {}
                }
            }
            if i + 2 <= src.len() {
                let s: String = src[i..i + 2].iter().collect();
                match s.as_str() {
                    "дд" | "dd" => {
                        out.push_str(&format!("{:02}", self.day()));
                        i += 2;
                        was_day = true;
                        continue;
                    }
                    "ММ" | "MM" => {
                        out.push_str(&format!("{:02}", self.month()));
                        i += 2;
                        continue;
                    }
                    "гг" | "yy" => {
                        out.push_str(&format!("{:02}", self.year() % 100));
                        i += 2;
                        continue;
                    }
                    "чч" | "hh" => {
                        out.push_str(&format!("{:02}", self.hour()));
                        i += 2;
                        continue;
                    }
                    "мм" | "mm" => {
                        out.push_str(&format!("{:02}", self.minute()));
                        i += 2;
                        continue;
                    }
                    "сс" | "ss" => {
                        out.push_str(&format!("{:02}", self.second()));
                        i += 2;
                        continue;
                    }
                    _ => {}
                }
            }
            match src[i] {
                'д' | 'd' => {
                    out.push_str(&self.day().to_string());
                    was_day = true;
                }
                'М' | 'M' => out.push_str(&self.month().to_string()),
                'г' | 'y' => out.push_str(&(self.year() % 100).to_string()),
                'ч' | 'h' => out.push_str(&self.hour().to_string()),
                'м' | 'm' => out.push_str(&self.minute().to_string()),
                'с' | 's' => out.push_str(&self.second().to_string()),
                'К' | 'Q' => out.push_str(&self.quarter().to_string()),
                c => out.push(c),
            }
            i += 1;
        }
        out
    }

    /// Operator dispatch with a time on the left.
    pub fn eval_binop(&self, op: Op, other: &Value) -> VmResult<Value> {
        match (op, other) {
            (Op::Add, Value::Duration(d)) => Ok(Value::Time(self.add(*d)?)),
            (Op::Sub, Value::Duration(d)) => {
                let neg = d.0.checked_neg().ok_or(VmError::NumericOverflow)?;
                Ok(Value::Time(self.add(VmDuration(neg))?))
            }
            (Op::Sub, Value::Time(t)) => Ok(Value::Duration(self.sub_time(t)?)),
            (Op::Eql, Value::Time(t)) => Ok(Value::Bool(self.0 == t.0)),
            (Op::Neq, Value::Time(t)) => Ok(Value::Bool(self.0 != t.0)),
            (Op::Gtr, Value::Time(t)) => Ok(Value::Bool(self.0 > t.0)),
            (Op::Geq, Value::Time(t)) => Ok(Value::Bool(self.0 >= t.0)),
            (Op::Lss, Value::Time(t)) => Ok(Value::Bool(self.0 < t.0)),
            (Op::Leq, Value::Time(t)) => Ok(Value::Bool(self.0 <= t.0)),
            _ => Err(VmError::TypeMismatch),
        }
    }

    /// Method table consulted by late-bound member lookup.
    ///
    /// `неделя` appends two values: ISO week, then ISO year.
    pub fn method_member(&self, lower: &str) -> Option<Func> {
        let t = *self;
        Some(match lower {
            "год" | "year" => func_must_params("Год", 0, move |_, rets| {
                rets.push(Value::Int(t.year()));
                Ok(())
            }),
            "месяц" | "month" => func_must_params("Месяц", 0, move |_, rets| {
                rets.push(Value::Int(t.month()));
                Ok(())
            }),
            "день" | "day" => func_must_params("День", 0, move |_, rets| {
                rets.push(Value::Int(t.day()));
                Ok(())
            }),
            "неделя" | "week" => func_must_params("Неделя", 0, move |_, rets| {
                let (week, year) = t.iso_week();
                rets.push(Value::Int(week));
                rets.push(Value::Int(year));
                Ok(())
            }),
            "деньнедели" | "weekday" => func_must_params("ДеньНедели", 0, move |_, rets| {
                rets.push(Value::Int(t.weekday()));
                Ok(())
            }),
            "квартал" | "quarter" => func_must_params("Квартал", 0, move |_, rets| {
                rets.push(Value::Int(t.quarter()));
                Ok(())
            }),
            "деньгода" | "yearday" => func_must_params("ДеньГода", 0, move |_, rets| {
                rets.push(Value::Int(t.day_of_year()));
                Ok(())
            }),
            "час" | "hour" => func_must_params("Час", 0, move |_, rets| {
                rets.push(Value::Int(t.hour()));
                Ok(())
            }),
            "минута" | "minute" => func_must_params("Минута", 0, move |_, rets| {
                rets.push(Value::Int(t.minute()));
                Ok(())
            }),
            "секунда" | "second" => func_must_params("Секунда", 0, move |_, rets| {
                rets.push(Value::Int(t.second()));
                Ok(())
            }),
            "миллисекунда" | "millisecond" => {
                func_must_params("Миллисекунда", 0, move |_, rets| {
                    rets.push(Value::Int(t.millisecond()));
                    Ok(())
                })
            }
            "микросекунда" | "microsecond" => {
                func_must_params("Микросекунда", 0, move |_, rets| {
                    rets.push(Value::Int(t.microsecond()));
                    Ok(())
                })
            }
            "наносекунда" | "nanosecond" => {
                func_must_params("Наносекунда", 0, move |_, rets| {
                    rets.push(Value::Int(t.nanosecond()));
                    Ok(())
                })
            }
            "формат" | "format" => func_must_params("Формат", 1, move |args, rets| {
                let pattern = match &args[0] {
                    Value::String(s) => s.clone(),
                    _ => return Err(VmError::TypeMismatch),
                };
                rets.push(Value::string(t.format(&pattern)));
                Ok(())
            }),
            "добавить" | "add" => func_must_params("Добавить", 1, move |args, rets| {
                let d = match &args[0] {
                    Value::Duration(d) => *d,
                    _ => return Err(VmError::TypeMismatch),
                };
                rets.push(Value::Time(t.add(d)?));
                Ok(())
            }),
            "вычесть" | "sub" => func_must_params("Вычесть", 1, move |args, rets| {
                let other = match &args[0] {
                    Value::Time(other) => *other,
                    _ => return Err(VmError::TypeMismatch),
                };
                rets.push(Value::Duration(t.sub_time(&other)?));
                Ok(())
            }),
            _ => return None,
        })
    }

    /// Binary form: unix seconds (i64 LE), subsecond nanos (u32 LE), UTC
    /// offset seconds (i32 LE).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.0.timestamp().to_le_bytes());
        out.extend_from_slice(&self.0.timestamp_subsec_nanos().to_le_bytes());
        out.extend_from_slice(&self.0.offset().local_minus_utc().to_le_bytes());
        out
    }

    /// Decode the binary form produced by [`VmTime::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> VmResult<Self> {
        if data.len() < 16 {
            return Err(date_parse_error());
        }
        let secs = i64::from_le_bytes(data[0..8].try_into().unwrap());
        let nanos = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let offset = i32::from_le_bytes(data[12..16].try_into().unwrap());
        let offset = FixedOffset::east_opt(offset).ok_or_else(date_parse_error)?;
        DateTime::from_timestamp(secs, nanos)
            .map(|t| VmTime(t.with_timezone(&offset)))
            .ok_or_else(date_parse_error)
    }
}

fn date_parse_error() -> VmError {
    VmError::Parse("Неверный формат даты и времени".into())
}
