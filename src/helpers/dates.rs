//! Date helpers.
//!
//! Layouts may be written either as Go reference layouts (`2006-01-02`,
//! `Jan 2, 2006 15:04`) or as strftime patterns; anything containing `%` is
//! taken as strftime.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, Months, NaiveDate, NaiveDateTime, TimeDelta};

use super::{int_arg, text_arg, Arity, HelperError, HelperRegistry};
use crate::data::Value;

/// Go reference tokens, longest first so `2006` wins over `2`.
const GO_TOKENS: &[(&str, &str)] = &[
    (".000000000", "%.9f"),
    ("January", "%B"),
    (".000000", "%.6f"),
    ("Monday", "%A"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    ("2006", "%Y"),
    (".000", "%.3f"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("01", "%m"),
    ("02", "%d"),
    ("_2", "%e"),
    ("15", "%H"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
    ("4", "%-M"),
    ("5", "%-S"),
];

/// Layouts tried, in order, when a date arrives as text.
const COMMON_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

pub fn go_layout_to_strftime(layout: &str) -> String {
    if layout.contains('%') {
        return layout.to_string();
    }
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'scan: while !rest.is_empty() {
        for (token, item) in GO_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(item);
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

fn looks_like_layout(text: &str) -> bool {
    text.contains('%') || ["2006", "15:04", "January", "Monday"].iter().any(|t| text.contains(t))
}

pub(crate) fn format_date(date: &DateTime<FixedOffset>, layout: &str) -> Result<String, HelperError> {
    let pattern = go_layout_to_strftime(layout);
    let items: Vec<Item<'_>> = StrftimeItems::new(&pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(HelperError::invalid("formatDate", format!("invalid layout {:?}", layout)));
    }
    Ok(date.format_with_items(items.iter()).to_string())
}

/// Parses with one layout, accepting values with or without an offset or time.
fn parse_with_layout(text: &str, layout: &str) -> Option<DateTime<FixedOffset>> {
    let pattern = go_layout_to_strftime(layout);
    if let Ok(date) = DateTime::parse_from_str(text, &pattern) {
        return Some(date);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, &pattern) {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(text, &pattern)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

pub(crate) fn parse_any(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .ok()
        .or_else(|| COMMON_LAYOUTS.iter().find_map(|layout| parse_with_layout(text, layout)))
}

fn date_arg(name: &str, value: &Value) -> Result<DateTime<FixedOffset>, HelperError> {
    match value {
        Value::Date(date) => Ok(*date),
        Value::String(text) => {
            parse_any(text).ok_or_else(|| HelperError::invalid(name, format!("cannot parse {:?} as a date", text)))
        }
        other => Err(HelperError::invalid(name, format!("expected a date, got {}", other.kind()))),
    }
}

/// Splits `(date, n)` arguments given in either order.
fn date_and_count<'a>(args: &'a [Value]) -> (&'a Value, &'a Value) {
    if args[0].is_number() && !args[1].is_number() {
        (&args[1], &args[0])
    } else {
        (&args[0], &args[1])
    }
}

fn shift_months(name: &str, date: DateTime<FixedOffset>, months: i64) -> Result<Value, HelperError> {
    let overflow = || HelperError::invalid(name, "date out of range");
    let count = u32::try_from(months.unsigned_abs()).map_err(|_| overflow())?;
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(count))
    } else {
        date.checked_sub_months(Months::new(count))
    };
    shifted.map(Value::Date).ok_or_else(overflow)
}

pub(super) fn register(registry: &mut HelperRegistry) {
    registry.register("now", Arity::exact(0), |_, _| Ok(Value::Date(Local::now().fixed_offset())));

    registry.register("formatDate", Arity::exact(2), |_, args| {
        // `formatDate .Due "2006-01-02"` or `.Due | formatDate "2006-01-02"`.
        let (value, layout) = match (&args[0], &args[1]) {
            (Value::Date(_), layout) => (&args[0], layout),
            (layout, Value::Date(_)) => (&args[1], layout),
            (a, b) if looks_like_layout(&text_arg(a)) && !looks_like_layout(&text_arg(b)) => (b, a),
            (a, b) => (a, b),
        };
        let date = match value {
            Value::Date(date) => *date,
            Value::Null => return Ok(Value::from("")),
            Value::String(text) => match parse_any(text) {
                Some(date) => date,
                None => return Ok(value.clone()),
            },
            other => {
                return Err(HelperError::invalid(
                    "formatDate",
                    format!("expected a date, got {}", other.kind()),
                ));
            }
        };
        Ok(format_date(&date, &text_arg(layout))?.into())
    });

    registry.register("parseDate", Arity::between(1, 2), |_, args| {
        let (text, layout) = match args {
            [text] => (text_arg(text), None),
            [a, b] if looks_like_layout(&text_arg(a)) && !looks_like_layout(&text_arg(b)) => {
                (text_arg(b), Some(text_arg(a)))
            }
            [a, b, ..] => (text_arg(a), Some(text_arg(b))),
            [] => return Err(HelperError::invalid("parseDate", "missing date")),
        };
        let parsed = match &layout {
            Some(layout) => parse_with_layout(text.trim(), layout),
            None => parse_any(&text),
        };
        parsed.map(Value::Date).ok_or_else(|| {
            HelperError::invalid("parseDate", format!("cannot parse {:?} as a date", text))
        })
    });

    registry.register("addDays", Arity::exact(2), |_, args| {
        let (date, days) = date_and_count(args);
        let date = date_arg("addDays", date)?;
        let days = int_arg("addDays", days)?;
        TimeDelta::try_days(days)
            .and_then(|delta| date.checked_add_signed(delta))
            .map(Value::Date)
            .ok_or_else(|| HelperError::invalid("addDays", "date out of range"))
    });
    registry.register("addMonths", Arity::exact(2), |_, args| {
        let (date, months) = date_and_count(args);
        shift_months("addMonths", date_arg("addMonths", date)?, int_arg("addMonths", months)?)
    });
    registry.register("addYears", Arity::exact(2), |_, args| {
        let (date, years) = date_and_count(args);
        let months = int_arg("addYears", years)?
            .checked_mul(12)
            .ok_or_else(|| HelperError::invalid("addYears", "date out of range"))?;
        shift_months("addYears", date_arg("addYears", date)?, months)
    });
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn date(text: &str) -> Value {
        Value::Date(DateTime::parse_from_rfc3339(text).unwrap())
    }

    #[test]
    fn test_go_layouts() {
        assert_eq!(go_layout_to_strftime("2006-01-02"), "%Y-%m-%d");
        assert_eq!(go_layout_to_strftime("Jan 2, 2006 15:04"), "%b %-d, %Y %H:%M");
        assert_eq!(go_layout_to_strftime("Monday, January 02"), "%A, %B %d");
        assert_eq!(go_layout_to_strftime("%d/%m/%Y"), "%d/%m/%Y");
    }

    #[test]
    fn test_format_date_value() {
        let due = date("2024-03-05T14:30:00+01:00");
        assert_eq!(call("formatDate", &[due.clone(), s("02.01.2006")]).unwrap(), s("05.03.2024"));
        assert_eq!(call("formatDate", &[s("Jan 2, 2006"), due]).unwrap(), s("Mar 5, 2024"));
    }

    #[test]
    fn test_format_date_from_text() {
        assert_eq!(call("formatDate", &[s("2024-03-05"), s("02/01/2006")]).unwrap(), s("05/03/2024"));
        assert_eq!(call("formatDate", &[s("2006-01-02"), s("2024-12-31")]).unwrap(), s("2024-12-31"));
        assert_eq!(call("formatDate", &[s("soon"), s("2006-01-02")]).unwrap(), s("soon"));
    }

    #[test]
    fn test_parse_date() {
        let parsed = call("parseDate", &[s("05/03/2024"), s("02/01/2006")]).unwrap();
        assert_eq!(parsed, date("2024-03-05T00:00:00+00:00"));
        assert_eq!(call("parseDate", &[s("2024-03-05T10:00:00Z")]).unwrap(), date("2024-03-05T10:00:00+00:00"));
        assert!(call("parseDate", &[s("nope"), s("2006-01-02")]).is_err());
    }

    #[test]
    fn test_date_arithmetic() {
        let start = date("2024-01-31T00:00:00+00:00");
        assert_eq!(call("addDays", &[start.clone(), Value::Int(1)]).unwrap(), date("2024-02-01T00:00:00+00:00"));
        assert_eq!(call("addDays", &[Value::Int(-1), start.clone()]).unwrap(), date("2024-01-30T00:00:00+00:00"));
        assert_eq!(call("addMonths", &[start.clone(), Value::Int(1)]).unwrap(), date("2024-02-29T00:00:00+00:00"));
        assert_eq!(call("addYears", &[s("2024-02-29"), Value::Int(1)]).unwrap(), date("2025-02-28T00:00:00+00:00"));
    }

    #[test]
    fn test_now_is_a_date() {
        assert!(matches!(call("now", &[]).unwrap(), Value::Date(_)));
    }
}
