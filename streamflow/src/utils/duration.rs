//! Duration strings such as `"250ms"`, `"1.5s"` or `"1h30m"`.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while parsing a duration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    /// A number was not followed by a known unit.
    #[error("unknown unit '{unit}' in duration '{input}'")]
    UnknownUnit {
        /// The offending unit.
        unit: String,
        /// The full input.
        input: String,
    },

    /// The string is not a duration.
    #[error("invalid duration '{0}'")]
    Invalid(String),
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}

/// Parses a duration.
///
/// A bare integer is read as milliseconds and the empty string is zero.
/// Otherwise the input is a sequence of decimal numbers each followed by one
/// of `ns`, `us`, `ms`, `s`, `m` or `h`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use streamflow::utils::parse_duration;
///
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
/// ```
///
/// # Errors
///
/// Returns `DurationError` if the input is negative, malformed or uses an
/// unknown unit.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Duration::ZERO);
    }
    if let Ok(millis) = trimmed.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }

    let invalid = || DurationError::Invalid(input.to_string());
    let mut total_nanos = 0f64;
    let mut rest = trimmed;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        if num_len == 0 {
            return Err(invalid());
        }
        let value: f64 = rest[..num_len].parse().map_err(|_| invalid())?;
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;
        rest = &rest[unit_len..];

        total_nanos += value * scale;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("3h").unwrap(), Duration::from_secs(3 * 3600));
        assert_eq!(parse_duration("7us").unwrap(), Duration::from_micros(7));
        assert_eq!(parse_duration("9ns").unwrap(), Duration::from_nanos(9));
    }

    #[test]
    fn test_compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_bare_integer_is_millis() {
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(parse_duration("").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("  ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(parse_duration("-1s"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("s"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse_duration("10"), Ok(_)));
        assert!(matches!(
            parse_duration("10d"),
            Err(DurationError::UnknownUnit { .. })
        ));
    }
}
