//! Duration literals such as `250ms`, `30s`, `15m`, `2h`, `7d`.

use trellis_types::{Result, TrellisError};
use winnow::ascii::{digit1, space0};
use winnow::combinator::{alt, eof, opt};
use winnow::{ModalResult, Parser};

/// Milliseconds per unit.
pub fn unit_multiplier(unit: &str) -> Option<i64> {
    match unit {
        "ms" => Some(1),
        "s" => Some(1_000),
        "m" => Some(60_000),
        "h" => Some(3_600_000),
        "d" => Some(86_400_000),
        _ => None,
    }
}

fn duration_parts<'i>(input: &mut &'i str) -> ModalResult<(&'i str, &'i str)> {
    let (number, _, unit, _) = (
        (opt('-'), digit1).take(),
        space0,
        alt(("ms", "s", "m", "h", "d")),
        eof,
    )
        .parse_next(input)?;
    Ok((number, unit))
}

/// Convert a duration literal to milliseconds.
pub fn parse_duration(text: &str) -> Result<i64> {
    let invalid = || TrellisError::InvalidDuration(text.to_string());
    let mut input = text.trim();
    let (number, unit) = duration_parts(&mut input).map_err(|_| invalid())?;
    let value: i64 = number.parse().map_err(|_| invalid())?;
    let multiplier = unit_multiplier(unit).ok_or_else(invalid)?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

pub fn is_duration_string(text: &str) -> bool {
    parse_duration(text).is_ok()
}
