//! Refresh interval parsing.
//!
//! Intervals use the familiar `1h30m` / `45s` / `1.5m` duration syntax, and
//! parse errors are worded the way users of that syntax expect them
//! (`time: invalid duration "abc"`).

use std::time::Duration;
use thiserror::Error;

/// Interval used when `refreshInterval` is unset or empty
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Smallest accepted interval
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("time: invalid duration \"{0}\"")]
    Invalid(String),
    #[error("time: missing unit in duration \"{0}\"")]
    MissingUnit(String),
    #[error("time: unknown unit \"{unit}\" in duration \"{input}\"")]
    UnknownUnit { unit: String, input: String },
    #[error("refresh interval '{0}' is too low (must not be less than 5s)")]
    TooLow(String),
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}

/// Parses a signed duration into nanoseconds.
pub fn parse_duration_nanos(input: &str) -> Result<i128, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || number == "." || number.matches('.').count() > 1 {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;
        rest = &rest[unit_len..];

        total += value * scale;
    }

    if !total.is_finite() || total > i64::MAX as f64 {
        return Err(invalid());
    }
    let nanos = total.round() as i128;
    Ok(if negative { -nanos } else { nanos })
}

/// Resolves a Repository's `refreshInterval`.
///
/// Unset or empty yields [`DEFAULT_REFRESH_INTERVAL`]; anything below
/// [`MIN_REFRESH_INTERVAL`] is rejected.
pub fn parse_refresh_interval(value: Option<&str>) -> Result<Duration, DurationError> {
    let raw = match value.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_REFRESH_INTERVAL),
        Some(raw) => raw,
    };
    let nanos = parse_duration_nanos(raw)?;
    if nanos < MIN_REFRESH_INTERVAL.as_nanos() as i128 {
        return Err(DurationError::TooLow(raw.to_string()));
    }
    let secs = (nanos / 1_000_000_000) as u64;
    let sub = (nanos % 1_000_000_000) as u32;
    Ok(Duration::new(secs, sub))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration_nanos("5s"), Ok(5_000_000_000));
        assert_eq!(parse_duration_nanos("1h30m"), Ok(5_400_000_000_000));
        assert_eq!(parse_duration_nanos("1.5m"), Ok(90_000_000_000));
        assert_eq!(parse_duration_nanos("250ms"), Ok(250_000_000));
        assert_eq!(parse_duration_nanos("-2s"), Ok(-2_000_000_000));
        assert_eq!(parse_duration_nanos("0"), Ok(0));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_duration_nanos("abc").unwrap_err().to_string(),
            r#"time: invalid duration "abc""#
        );
        assert_eq!(
            parse_duration_nanos("5").unwrap_err().to_string(),
            r#"time: missing unit in duration "5""#
        );
        assert_eq!(
            parse_duration_nanos("5d").unwrap_err().to_string(),
            r#"time: unknown unit "d" in duration "5d""#
        );
        assert!(parse_duration_nanos("1..5s").is_err());
        assert!(parse_duration_nanos("-").is_err());
    }

    #[test]
    fn test_refresh_interval_defaults() {
        assert_eq!(parse_refresh_interval(None), Ok(DEFAULT_REFRESH_INTERVAL));
        assert_eq!(parse_refresh_interval(Some("")), Ok(DEFAULT_REFRESH_INTERVAL));
        assert_eq!(parse_refresh_interval(Some("5s")), Ok(Duration::from_secs(5)));
        assert_eq!(parse_refresh_interval(Some("10m")), Ok(Duration::from_secs(600)));
    }

    #[test]
    fn test_refresh_interval_boundaries() {
        let err = parse_refresh_interval(Some("abc")).unwrap_err();
        assert!(err.to_string().contains(r#"time: invalid duration "abc""#));

        let err = parse_refresh_interval(Some("2s")).unwrap_err();
        assert!(
            err.to_string()
                .contains("refresh interval '2s' is too low (must not be less than 5s)")
        );

        assert!(matches!(
            parse_refresh_interval(Some("4999ms")),
            Err(DurationError::TooLow(_))
        ));
        assert!(matches!(
            parse_refresh_interval(Some("-1m")),
            Err(DurationError::TooLow(_))
        ));
    }
}
