//! Arithmetic and number formatting.
//!
//! Integer operands stay integral; any float operand widens the result.
//! Division and modulo by zero yield zero unless strict math is enabled.

use super::{int_arg, text_arg, Arity, HelperContext, HelperError, HelperRegistry};
use crate::data::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i128),
    Float(f64),
}

impl Num {
    fn from_value(name: &str, value: &Value) -> Result<Self, HelperError> {
        if value.is_null() {
            return Ok(Num::Int(0));
        }
        if let Some(n) = value.as_i128() {
            return Ok(Num::Int(n));
        }
        if let Value::String(s) = value {
            if let Ok(n) = s.trim().parse::<i128>() {
                return Ok(Num::Int(n));
            }
        }
        value
            .as_f64()
            .map(Num::Float)
            .ok_or_else(|| HelperError::invalid(name, format!("expected a number, got {}", value.kind())))
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Num::Int(n) => n == 0,
            Num::Float(f) => f == 0.0,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(n) => Value::from_i128(n),
            Num::Float(f) => Value::Float(f),
        }
    }
}

#[derive(Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Mod => "mod",
        }
    }

    fn apply(self, ctx: &HelperContext<'_>, a: Num, b: Num) -> Result<Num, HelperError> {
        if matches!(self, Op::Div | Op::Mod) && b.is_zero() {
            if ctx.strict_math {
                return Err(HelperError::DivisionByZero {
                    name: self.name().to_string(),
                });
            }
            return Ok(Num::Int(0));
        }
        if let (Num::Int(x), Num::Int(y)) = (a, b) {
            let exact = match self {
                Op::Add => x.checked_add(y),
                Op::Sub => x.checked_sub(y),
                Op::Mul => x.checked_mul(y),
                Op::Div => x.checked_div(y),
                Op::Mod => x.checked_rem(y),
            };
            if let Some(n) = exact {
                return Ok(Num::Int(n));
            }
        }
        let (x, y) = (a.as_f64(), b.as_f64());
        Ok(Num::Float(match self {
            Op::Add => x + y,
            Op::Sub => x - y,
            Op::Mul => x * y,
            Op::Div => x / y,
            Op::Mod => x % y,
        }))
    }
}

fn fold(op: Op, ctx: &HelperContext<'_>, args: &[Value]) -> Result<Value, HelperError> {
    let mut acc = Num::from_value(op.name(), &args[0])?;
    for arg in &args[1..] {
        acc = op.apply(ctx, acc, Num::from_value(op.name(), arg)?)?;
    }
    Ok(acc.into_value())
}

pub(super) fn register(registry: &mut HelperRegistry) {
    registry.register("add", Arity::at_least(2), |ctx, args| fold(Op::Add, ctx, args));
    registry.register("sub", Arity::exact(2), |ctx, args| fold(Op::Sub, ctx, args));
    registry.register("mul", Arity::at_least(2), |ctx, args| fold(Op::Mul, ctx, args));
    registry.register("div", Arity::exact(2), |ctx, args| fold(Op::Div, ctx, args));
    registry.register("mod", Arity::exact(2), |ctx, args| fold(Op::Mod, ctx, args));

    registry.register("formatNumber", Arity::between(1, 2), |_, args| {
        let (n, decimals) = number_and_decimals("formatNumber", &args[0], args.get(1))?;
        Ok(format_number("formatNumber", n, decimals)?.into())
    });
    registry.register("formatMoney", Arity::between(2, 3), |_, args| {
        // `formatMoney .Total "$"` and `.Total | formatMoney "$"` both work.
        let (amount, symbol) = if args.len() == 2 && !is_numeric(&args[0]) && is_numeric(&args[1]) {
            (&args[1], &args[0])
        } else {
            (&args[0], &args[1])
        };
        let n = Num::from_value("formatMoney", amount)?;
        let decimals = match args.get(2) {
            Some(d) => decimals_arg("formatMoney", d)?,
            None => 2,
        };
        let formatted = format_number("formatMoney", n, Some(decimals))?;
        let symbol = text_arg(symbol);
        Ok(match formatted.strip_prefix('-') {
            Some(magnitude) => format!("-{}{}", symbol, magnitude),
            None => format!("{}{}", symbol, formatted),
        }
        .into())
    });
    registry.register("formatPercent", Arity::between(1, 2), |_, args| {
        let (n, decimals) = match number_and_decimals("formatPercent", &args[0], args.get(1))? {
            (n, None) => (n, Some(0)),
            other => other,
        };
        let scaled = Num::Float(n.as_f64() * 100.0);
        Ok(format!("{}%", format_number("formatPercent", scaled, decimals)?).into())
    });
}

fn is_numeric(value: &Value) -> bool {
    value.is_number() || value.as_f64().is_some()
}

fn decimals_arg(name: &str, value: &Value) -> Result<usize, HelperError> {
    let d = int_arg(name, value)?;
    usize::try_from(d).map_err(|_| HelperError::invalid(name, "decimals must not be negative"))
}

/// Accepts `(n)`, `(n, decimals)` and the pipeline order `(decimals, n)`.
fn number_and_decimals(
    name: &str,
    first: &Value,
    second: Option<&Value>,
) -> Result<(Num, Option<usize>), HelperError> {
    match second {
        None => Ok((Num::from_value(name, first)?, None)),
        Some(second) => {
            let (n, d) = match (first, second) {
                (Value::Int(_) | Value::Uint(_), Value::Float(_)) => (second, first),
                _ => (first, second),
            };
            Ok((Num::from_value(name, n)?, Some(decimals_arg(name, d)?)))
        }
    }
}

/// English grouping: `1234567.891` with two decimals is `1,234,567.89`.
fn format_number(name: &str, n: Num, decimals: Option<usize>) -> Result<String, HelperError> {
    if let Num::Float(f) = n {
        if !f.is_finite() {
            return Err(HelperError::invalid(name, format!("cannot format {}", f)));
        }
    }
    let decimals = decimals.unwrap_or(match n {
        Num::Int(_) => 0,
        Num::Float(_) => 2,
    });
    let plain = match n {
        Num::Int(i) if decimals == 0 => i.to_string(),
        _ => format!("{:.*}", decimals, n.as_f64()),
    };
    let (negative, digits) = match plain.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, plain.as_str()),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if let Some(frac) = frac_part {
        grouped.push('.');
        grouped.push_str(frac);
    }

    let is_zero = digits.chars().all(|c| c == '0' || c == '.');
    Ok(if negative && !is_zero {
        format!("-{}", grouped)
    } else {
        grouped
    })
}
