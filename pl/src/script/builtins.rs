//! Pure built-in functions available to every template
//!
//! `isset` and `empty` are not here: they inspect their argument without
//! evaluating it and live in the interpreter.

use serde_json::Value;

use super::value::{Num, ValueExt, compare, escape_html, expect_number};
use crate::error::RenderError;

/// Upper bound on `range()` output
const MAX_RANGE: u64 = 100_000;

pub const NAMES: &[&str] = &[
    "count",
    "length",
    "upper",
    "lower",
    "ucfirst",
    "trim",
    "join",
    "escape",
    "e",
    "range",
    "min",
    "max",
    "abs",
    "round",
    "number_format",
    "default",
];

/// Calls a built-in; `None` when `name` is not one
pub fn call(name: &str, args: &[Value]) -> Option<Result<Value, RenderError>> {
    let result = match name {
        "count" => count(args),
        "length" => length(args),
        "upper" => string_arg(name, args).map(|s| Value::from(s.to_uppercase())),
        "lower" => string_arg(name, args).map(|s| Value::from(s.to_lowercase())),
        "ucfirst" => string_arg(name, args).map(|s| Value::from(ucfirst(&s))),
        "trim" => string_arg(name, args).map(|s| Value::from(s.trim())),
        "join" => join(args),
        "escape" | "e" => string_arg(name, args).map(|s| Value::from(escape_html(&s))),
        "range" => range(args),
        "min" => extreme(name, args, std::cmp::Ordering::Less),
        "max" => extreme(name, args, std::cmp::Ordering::Greater),
        "abs" => arg(name, args, 0).and_then(|v| match expect_number(v, name)? {
            Num::Int(i) => Num::Int(i.checked_abs().ok_or_else(|| overflow(name))?).into_value(),
            Num::Float(f) => Num::Float(f.abs()).into_value(),
        }),
        "round" => round(args),
        "number_format" => number_format(args),
        "default" => arg(name, args, 0).and_then(|v| {
            if v.is_truthy() {
                Ok(v.clone())
            } else {
                arg(name, args, 1).cloned()
            }
        }),
        _ => return None,
    };
    Some(result)
}

/// Uppercases the first character
pub fn ucfirst(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn overflow(name: &str) -> RenderError {
    RenderError::Function {
        name: name.to_string(),
        message: "integer overflow".to_string(),
    }
}

fn arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Value, RenderError> {
    args.get(index).ok_or_else(|| RenderError::Function {
        name: name.to_string(),
        message: format!("missing argument {}", index + 1),
    })
}

fn string_arg(name: &str, args: &[Value]) -> Result<String, RenderError> {
    arg(name, args, 0).map(ValueExt::render_to_string)
}

fn count(args: &[Value]) -> Result<Value, RenderError> {
    match arg("count", args, 0)? {
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(Value::from(map.len())),
        Value::Null => Ok(Value::from(0)),
        other => Err(RenderError::type_error(format!(
            "count() expects array or object, got {}",
            other.type_name()
        ))),
    }
}

fn length(args: &[Value]) -> Result<Value, RenderError> {
    match arg("length", args, 0)? {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        _ => count(args),
    }
}

fn join(args: &[Value]) -> Result<Value, RenderError> {
    let separator = args.get(1).map(ValueExt::render_to_string).unwrap_or_default();
    let parts: Vec<String> = match arg("join", args, 0)? {
        Value::Array(items) => items.iter().map(ValueExt::render_to_string).collect(),
        Value::Object(map) => map.values().map(ValueExt::render_to_string).collect(),
        other => {
            return Err(RenderError::type_error(format!(
                "join() expects array, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::from(parts.join(&separator)))
}

fn int_arg(name: &str, args: &[Value], index: usize) -> Result<i64, RenderError> {
    match expect_number(arg(name, args, index)?, name)? {
        Num::Int(i) => Ok(i),
        Num::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        Num::Float(f) => Err(RenderError::type_error(format!("{}() expects an integer, got {}", name, f))),
    }
}

fn range(args: &[Value]) -> Result<Value, RenderError> {
    let start = int_arg("range", args, 0)?;
    let end = int_arg("range", args, 1)?;

    if end.abs_diff(start) >= MAX_RANGE {
        return Err(RenderError::Function {
            name: "range".to_string(),
            message: format!("range of more than {} items", MAX_RANGE),
        });
    }

    let items: Vec<Value> = if start <= end {
        (start..=end).map(Value::from).collect()
    } else {
        (end..=start).rev().map(Value::from).collect()
    };
    Ok(Value::Array(items))
}

fn extreme(name: &str, args: &[Value], want: std::cmp::Ordering) -> Result<Value, RenderError> {
    let candidates: &[Value] = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };

    let mut best: Option<&Value> = None;
    for candidate in candidates {
        best = match best {
            Some(current) if compare(candidate, current)? != want => Some(current),
            _ => Some(candidate),
        };
    }

    best.cloned().ok_or_else(|| RenderError::Function {
        name: name.to_string(),
        message: "expects at least one value".to_string(),
    })
}

fn round(args: &[Value]) -> Result<Value, RenderError> {
    let value = expect_number(arg("round", args, 0)?, "round")?;
    let precision = if args.len() > 1 { int_arg("round", args, 1)? } else { 0 };

    match value {
        Num::Int(i) if precision >= 0 => Ok(Value::from(i)),
        value => {
            let factor = 10f64.powi(precision.clamp(-15, 15) as i32);
            let rounded = (value.as_f64() * factor).round() / factor;
            if precision <= 0 && rounded.abs() < i64::MAX as f64 {
                Ok(Value::from(rounded as i64))
            } else {
                Num::Float(rounded).into_value()
            }
        }
    }
}

fn number_format(args: &[Value]) -> Result<Value, RenderError> {
    let value = expect_number(arg("number_format", args, 0)?, "number_format")?.as_f64();
    let decimals = if args.len() > 1 {
        int_arg("number_format", args, 1)?.clamp(0, 15) as usize
    } else {
        0
    };

    let formatted = format!("{:.*}", decimals, value.abs());
    let (whole, fraction) = match formatted.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(formatted.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if let Some(fraction) = fraction {
        grouped.push('.');
        grouped.push_str(fraction);
    }
    if value < 0.0 && grouped.chars().any(|c| c.is_ascii_digit() && c != '0') {
        grouped.insert(0, '-');
    }

    Ok(Value::from(grouped))
}
