//! Value semantics for template script
//!
//! Render data is plain JSON. These helpers give it the truthiness, equality,
//! ordering and arithmetic that templates expect.

use serde_json::{Number, Value};
use std::cmp::Ordering;

use crate::error::RenderError;

pub trait ValueExt {
    /// Check if value is truthy (for conditionals)
    fn is_truthy(&self) -> bool;

    /// Get the type name for error messages
    fn type_name(&self) -> &'static str;

    /// Render as the text an echo writes
    fn render_to_string(&self) -> String;
}

impl ValueExt for Value {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !s.is_empty() && s != "0",
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(n) if n.is_f64() => "float",
            Value::Number(_) => "int",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn render_to_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
                (Some(i), _, _) => i.to_string(),
                (_, Some(u), _) => u.to_string(),
                (_, _, Some(f)) => f.to_string(),
                _ => n.to_string(),
            },
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => self.to_string(),
        }
    }
}

/// A number pulled out of a value for arithmetic
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Result<Value, RenderError> {
        match self {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| RenderError::type_error(format!("arithmetic produced {}", f))),
        }
    }
}

/// Numeric view of a value; numeric strings count, other strings do not
pub fn to_number(value: &Value) -> Option<Num> {
    match value {
        Value::Null => Some(Num::Int(0)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Num::Int)
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Num::Float))
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn expect_number(value: &Value, op: &str) -> Result<Num, RenderError> {
    to_number(value).ok_or_else(|| {
        RenderError::type_error(format!("unsupported operand type {} for {}", value.type_name(), op))
    })
}

/// Equality for `==`: numbers compare by value, booleans by truthiness
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Bool(_), _) | (_, Value::Bool(_)) => left.is_truthy() == right.is_truthy(),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Number(_), Value::Number(_) | Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (to_number(left), to_number(right)) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
                (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
                _ => false,
            }
        }
        _ => left == right,
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`
pub fn compare(left: &Value, right: &Value) -> Result<Ordering, RenderError> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => None,
        _ => match (to_number(left), to_number(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => None,
        },
    };

    ordering.ok_or_else(|| {
        RenderError::type_error(format!("cannot compare {} with {}", left.type_name(), right.type_name()))
    })
}

/// Escapes text for an HTML body or attribute
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(!json!(null).is_truthy());
        assert!(!json!("").is_truthy());
        assert!(!json!("0").is_truthy());
        assert!(!json!(0.0).is_truthy());
        assert!(!json!([]).is_truthy());
        assert!(json!("no").is_truthy());
        assert!(json!({"a": 1}).is_truthy());
    }

    #[test]
    fn test_render_to_string() {
        assert_eq!(json!(null).render_to_string(), "");
        assert_eq!(json!(true).render_to_string(), "true");
        assert_eq!(json!(2.0).render_to_string(), "2");
        assert_eq!(json!(2.5).render_to_string(), "2.5");
        assert_eq!(json!([1, "a"]).render_to_string(), r#"[1,"a"]"#);
    }

    #[test]
    fn test_loose_and_strict_equality() {
        assert!(loose_eq(&json!(1), &json!("1")));
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(loose_eq(&json!(true), &json!("yes")));
        assert!(loose_eq(&json!(null), &json!("")));
        assert!(!loose_eq(&json!("a"), &json!("b")));
        assert_ne!(json!(1), json!("1"));
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(&json!(2), &json!(10)).unwrap(), Ordering::Less);
        assert_eq!(compare(&json!("b"), &json!("a")).unwrap(), Ordering::Greater);
        assert_eq!(compare(&json!("10"), &json!(9.5)).unwrap(), Ordering::Greater);
        assert!(compare(&json!([1]), &json!(1)).is_err());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&#039;&lt;/a&gt;");
    }
}
