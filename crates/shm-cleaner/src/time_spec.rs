//! Parsing of `<number>[smhd]` time specifications.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CleanupError, Result};

static TIME_SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\+?([0-9]*\.[0-9]+|[0-9]+\.?[0-9]*)([smhdSMHD])?$").expect("valid regex")
});

/// Unit applied to a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> u64 {
        match self {
            TimeUnit::Seconds => 1,
            TimeUnit::Minutes => 60,
            TimeUnit::Hours => 3600,
            TimeUnit::Days => 86400,
        }
    }

    fn from_suffix(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            's' => Some(TimeUnit::Seconds),
            'm' => Some(TimeUnit::Minutes),
            'h' => Some(TimeUnit::Hours),
            'd' => Some(TimeUnit::Days),
            _ => None,
        }
    }
}

/// Parse a time specification such as `1`, `2.5h` or `.5d`.
///
/// `implied` is used when no unit suffix is present. `what` names the value in
/// the error message.
pub fn parse_time_spec(spec: &str, implied: TimeUnit, what: &'static str) -> Result<Duration> {
    let invalid = || CleanupError::InvalidTimeSpec {
        what,
        value: spec.to_string(),
    };

    let caps = TIME_SPEC_RE.captures(spec.trim()).ok_or_else(invalid)?;
    let number: f64 = caps[1].parse().map_err(|_| invalid())?;
    let unit = match caps.get(2) {
        Some(m) => m.as_str().chars().next().and_then(TimeUnit::from_suffix).ok_or_else(invalid)?,
        None => implied,
    };

    Duration::try_from_secs_f64(number * unit.seconds() as f64).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(spec: &str, implied: TimeUnit) -> u64 {
        parse_time_spec(spec, implied, "test").unwrap().as_secs()
    }

    #[test]
    fn test_bare_number_uses_implied_unit() {
        assert_eq!(secs("1", TimeUnit::Days), 86400);
        assert_eq!(secs("45", TimeUnit::Seconds), 45);
    }

    #[test]
    fn test_suffix_overrides_implied_unit() {
        assert_eq!(secs("10s", TimeUnit::Days), 10);
        assert_eq!(secs("3m", TimeUnit::Days), 180);
        assert_eq!(secs("2H", TimeUnit::Seconds), 7200);
        assert_eq!(secs("1D", TimeUnit::Seconds), 86400);
    }

    #[test]
    fn test_decimal_forms() {
        assert_eq!(secs("1.5h", TimeUnit::Seconds), 5400);
        assert_eq!(secs(".5d", TimeUnit::Seconds), 43200);
        assert_eq!(secs("2.", TimeUnit::Minutes), 120);
        assert_eq!(secs("+30", TimeUnit::Seconds), 30);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "d", "1w", "-1", "1.2.3", "one", "1 d", "inf", "NaN", "1e3"] {
            let err = parse_time_spec(bad, TimeUnit::Days, "age threshold").unwrap_err();
            assert!(
                matches!(err, CleanupError::InvalidTimeSpec { what: "age threshold", .. }),
                "accepted {bad:?}"
            );
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn test_rejects_overflow() {
        let huge = "9".repeat(400);
        assert!(parse_time_spec(&huge, TimeUnit::Days, "age threshold").is_err());
    }
}
