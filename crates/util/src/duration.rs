//! Parsing helpers for plugin parameters.
//!
//! Plugin and finalizer parameters arrive as plain strings (`"10s"`,
//! `"500,503"`); these helpers turn them into typed values with errors that
//! name the offending input.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamParseError {
    #[error("invalid duration '{0}': expected terms like 1h30m, 10s or 250ms")]
    Duration(String),

    #[error("invalid status code '{0}'")]
    Status(String),

    #[error("invalid boolean '{0}'")]
    Bool(String),
}

/// Parses durations like `10s`, `250ms`, `2m` or `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration, ParamParseError> {
    humantime::parse_duration(input.trim()).map_err(|_| ParamParseError::Duration(input.to_string()))
}

/// Parses a comma-separated status list such as `500,502,503`.
pub fn parse_status_list(input: &str) -> Result<Vec<u16>, ParamParseError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<u16>().map_err(|_| ParamParseError::Status(part.to_string())))
        .collect()
}

pub fn parse_bool(input: &str) -> Result<bool, ParamParseError> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ParamParseError::Bool(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_durations() {
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration(" 1m 30s "), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_unitless_or_unknown_durations() {
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10 parsecs").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn parses_status_lists() {
        assert_eq!(parse_status_list("500, 503"), Ok(vec![500, 503]));
        assert_eq!(parse_status_list("5xx"), Err(ParamParseError::Status("5xx".into())));
    }

    #[test]
    fn parses_bools() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool(""), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }
}
