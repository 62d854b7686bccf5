//! # Duration Parsing
//!
//! Parses Prometheus duration strings such as `15s`, `1m30s` or `1h`.
//! Units must appear from largest to smallest and each at most once.

use std::time::Duration;

/// Units in the order they may appear, with their length in milliseconds
const UNITS: [(&str, u64); 7] = [
    ("y", 365 * 24 * 60 * 60 * 1000),
    ("w", 7 * 24 * 60 * 60 * 1000),
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

/// Parse a Prometheus duration string
///
/// # Errors
///
/// Returns a human-readable reason when the string is empty, uses an unknown
/// unit, repeats a unit or lists units out of order.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration string".to_string());
    }
    if value == "0" {
        return Ok(Duration::ZERO);
    }

    let bytes = value.as_bytes();
    let mut pos = 0;
    let mut next_unit = 0;
    let mut total_ms: u64 = 0;

    while pos < bytes.len() {
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            return Err(format!("expected a number at position {digits_start}"));
        }
        let number: u64 = value[digits_start..pos]
            .parse()
            .map_err(|e| format!("invalid number: {e}"))?;

        let unit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let unit = &value[unit_start..pos];
        if unit.is_empty() {
            return Err(format!("missing unit after {number}"));
        }

        let index = UNITS
            .iter()
            .position(|(name, _)| *name == unit)
            .ok_or_else(|| format!("unknown unit '{unit}'"))?;
        if index < next_unit {
            return Err(format!("unit '{unit}' is repeated or out of order"));
        }
        next_unit = index + 1;

        total_ms = number
            .checked_mul(UNITS[index].1)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(|| "duration out of range".to_string())?;
    }

    Ok(Duration::from_millis(total_ms))
}
