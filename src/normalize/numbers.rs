//! Currency, percent and plain numeric parsing.

use crate::error::{PipelineError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLAIN_NUMBER: Regex = Regex::new(r"^-?(\d+(\.\d*)?|\.\d+)$").unwrap();
}

/// Parse `$1,234.50`, `(150.00)`, `($150.00)`, `12%`, `-3.5` and plain integers.
/// Parenthesized values are negative (accounting notation).
pub fn parse_number(input: &str) -> Result<f64> {
    let invalid = || PipelineError::InvalidNumber(input.to_string());
    let mut s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let negative_parens = s.starts_with('(') && s.ends_with(')');
    if negative_parens {
        s = s[1..s.len() - 1].trim();
    }
    if let Some(rest) = s.strip_suffix('%') {
        s = rest.trim_end();
    }

    let mut cleaned = String::with_capacity(s.len());
    let mut seen_symbol = false;
    for c in s.chars() {
        match c {
            '$' if !seen_symbol => seen_symbol = true,
            ',' | ' ' => {}
            _ => cleaned.push(c),
        }
    }

    if !PLAIN_NUMBER.is_match(&cleaned) {
        return Err(invalid());
    }
    if negative_parens && cleaned.starts_with('-') {
        return Err(invalid());
    }
    let value: f64 = cleaned.parse().map_err(|_| invalid())?;
    Ok(if negative_parens { -value } else { value })
}

/// Integers accept a zero fraction (`"12.0"`) the way spreadsheet exports write them.
pub fn parse_integer(input: &str) -> Result<i64> {
    let trimmed = input.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }
    let f = parse_number(trimmed)?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Ok(f as i64)
    } else {
        Err(PipelineError::InvalidNumber(input.to_string()))
    }
}

/// Booleans as exported by the student information system (`Y`/`N`, `TRUE`, `1`).
pub fn parse_bool(input: &str) -> Result<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Ok(true),
        "false" | "f" | "no" | "n" | "0" => Ok(false),
        _ => Err(PipelineError::InvalidNumber(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_and_percent() {
        assert_eq!(parse_number("($150.00)").unwrap(), -150.0);
        assert_eq!(parse_number("$150.00").unwrap(), 150.0);
        assert_eq!(parse_number("12%").unwrap(), 12.0);
        assert_eq!(parse_number("$ 1,234.50").unwrap(), 1234.5);
        assert_eq!(parse_number("(75)").unwrap(), -75.0);
        assert_eq!(parse_number("-3.25").unwrap(), -3.25);
    }

    #[test]
    fn test_unparseable_remainder() {
        for bad in ["", "$", "12%%", "abc", "1.2.3", "$$5", "(-5)", "NaN", "inf", "5 dollars"] {
            assert!(
                matches!(parse_number(bad), Err(PipelineError::InvalidNumber(_))),
                "{bad} should fail"
            );
        }
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("2027").unwrap(), 2027);
        assert_eq!(parse_integer("2027.0").unwrap(), 2027);
        assert!(parse_integer("20.5").is_err());
        assert!(parse_integer("Student ID:").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("Y").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
