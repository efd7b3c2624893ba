//! Typed reads from an attribute map. Every accessor is total: a missing key
//! or a value of the wrong kind yields the supplied default.

use crate::ast::{AttributeValue, Attributes};

/// Read a string attribute. Non-string values fall back to `default`.
pub fn get_string_attr(attrs: &Attributes, key: &str, default: &str) -> String {
    match attrs.get(key) {
        Some(AttributeValue::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}

/// Read an integer attribute. Floats are floored; strings are read as a
/// base-10 integer prefix, giving 0 when there is none.
pub fn get_integer_attr(attrs: &Attributes, key: &str, default: i64) -> i64 {
    match attrs.get(key) {
        Some(AttributeValue::Integer(n)) => *n,
        Some(AttributeValue::Float(x)) => x.floor() as i64,
        Some(AttributeValue::String(s)) => parse_int_prefix(s).unwrap_or(0),
        _ => default,
    }
}

pub fn get_boolean_attr(attrs: &Attributes, key: &str, default: bool) -> bool {
    match attrs.get(key) {
        Some(AttributeValue::Boolean(b)) => *b,
        Some(AttributeValue::String(s)) if s == "true" => true,
        Some(AttributeValue::String(s)) if s == "false" => false,
        _ => default,
    }
}

/// `"  42abc"` reads as 42, `"-7"` as -7, `"abc"` as nothing.
fn parse_int_prefix(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (sign, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1, &trimmed[1..]),
        Some(b'+') => (1, &trimmed[1..]),
        _ => (1, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse::<i64>().ok().map(|n| sign * n)
}
