//! Primitive conversions and loose (`==`) equality.

use super::{Object, Primitive, Value};

/// Formats a number the way it prints in messages: integral values without a
/// fractional part, `NaN`, `Infinity` and `-Infinity` spelled out, `-0` as `0`.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let radix = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .iter()
        .find(|(prefix, _)| trimmed.starts_with(prefix));
    if let Some((prefix, radix)) = radix {
        return u64::from_str_radix(&trimmed[prefix.len()..], *radix)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // Rust accepts "inf" and "nan" spellings that are not numeric literals here.
    if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

impl Value {
    /// Truthiness: `undefined`, `null`, `false`, `0`, `NaN` and `""` are falsy;
    /// every object (including a boxed `false`) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// Numeric conversion.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Object(_) => self.to_primitive().to_number(),
        }
    }

    /// String conversion (as opposed to [`crate::value::dump`], no quoting).
    pub fn to_text(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Object(_) => self.to_primitive().to_text(),
        }
    }

    /// Converts an object to a primitive; primitives are returned unchanged.
    ///
    /// Cyclic arrays render their inner occurrence as an empty string.
    pub fn to_primitive(&self) -> Value {
        let mut seen = Vec::new();
        self.to_primitive_guarded(&mut seen)
    }

    fn to_primitive_guarded(&self, seen: &mut Vec<usize>) -> Value {
        let Value::Object(obj) = self else {
            return self.clone();
        };
        if seen.contains(&obj.addr()) {
            return Value::String(String::new());
        }
        seen.push(obj.addr());
        let object = obj.borrow();
        let primitive = match &*object {
            Object::Boxed(Primitive::Bool(b)) => Value::Bool(*b),
            Object::Boxed(Primitive::Number(n)) => Value::Number(*n),
            Object::Boxed(Primitive::String(s)) => Value::String(s.clone()),
            Object::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.to_primitive_guarded(seen).to_text(),
                    })
                    .collect();
                Value::String(parts.join(","))
            }
            Object::Date(at) => Value::String(at.to_rfc2822()),
            Object::RegExp { source, flags } => Value::String(format!("/{source}/{flags}")),
            Object::Function(function) => Value::String(function.source.clone()),
            Object::Record { .. } => Value::String("[object Object]".to_string()),
            Object::Set(_) => Value::String("[object Set]".to_string()),
            Object::Map(_) => Value::String("[object Map]".to_string()),
        };
        seen.pop();
        primitive
    }

    /// Loose equality (`==`).
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(_), Value::Object(_)) => self.strict_equals(other),
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (Value::Object(_), _) => self.to_primitive().loose_equals(other),
            (_, Value::Object(_)) => self.loose_equals(&other.to_primitive()),
            (Value::Number(a), Value::String(_)) => *a == other.to_number(),
            (Value::String(_), Value::Number(b)) => self.to_number() == *b,
            _ => self.strict_equals(other),
        }
    }
}
