//! Duration parsing for `wait`, retry delays and timeouts
//!
//! Durations appear in definitions either as ISO 8601 strings (`PT5S`,
//! `P1DT2H`) or as an object with named unit fields.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::time::Duration as StdDuration;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid ISO 8601 duration: {input}: {message}"))]
    InvalidDuration { input: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A duration as authored in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DurationSpec {
    /// ISO 8601 string, e.g. `PT1M30S`.
    Iso8601(String),
    /// Named unit fields, e.g. `{ minutes: 1, seconds: 30 }`.
    Units(DurationUnits),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DurationUnits {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub milliseconds: u64,
}

impl DurationSpec {
    pub fn to_std(&self) -> Result<StdDuration> {
        match self {
            DurationSpec::Iso8601(s) => parse_iso8601(s),
            DurationSpec::Units(u) => {
                let millis = u.milliseconds
                    + u.seconds * 1_000
                    + u.minutes * 60_000
                    + u.hours * 3_600_000
                    + u.days * 86_400_000;
                Ok(StdDuration::from_millis(millis))
            }
        }
    }
}

/// Parse an ISO 8601 duration. Supports day and time components
/// (`P1DT2H30M`, `PT0.5S`); larger calendar units are rejected because
/// their length is not fixed.
pub fn parse_iso8601(input: &str) -> Result<StdDuration> {
    let trimmed = input.trim();
    let rest = trimmed
        .strip_prefix('P')
        .context(InvalidDurationSnafu { input: trimmed, message: "must start with 'P'" })?;

    if rest.is_empty() {
        return InvalidDurationSnafu { input: trimmed, message: "no components" }.fail();
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total_ms: f64 = 0.0;
    total_ms += parse_components(trimmed, date_part, &[('D', 86_400_000.0)])?;
    total_ms += parse_components(
        trimmed,
        time_part,
        &[('H', 3_600_000.0), ('M', 60_000.0), ('S', 1_000.0)],
    )?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok(StdDuration::from_millis(total_ms as u64))
}

fn parse_components(input: &str, part: &str, units: &[(char, f64)]) -> Result<f64> {
    let mut total_ms = 0.0;
    let mut current = String::new();

    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            current.push(ch);
            continue;
        }
        if current.is_empty() {
            return InvalidDurationSnafu { input, message: format!("unit '{ch}' without value") }
                .fail();
        }
        let value: f64 = current.parse().map_err(|_| Error::InvalidDuration {
            input: input.to_string(),
            message: format!("bad number '{current}'"),
        })?;
        let factor = units
            .iter()
            .find(|(unit, _)| *unit == ch)
            .map(|(_, factor)| *factor)
            .context(InvalidDurationSnafu { input, message: format!("unsupported unit '{ch}'") })?;
        total_ms += value * factor;
        current.clear();
    }

    if !current.is_empty() {
        return InvalidDurationSnafu { input, message: "trailing number without unit" }.fail();
    }
    Ok(total_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_iso8601("PT5S").unwrap().as_secs(), 5);
    }

    #[test]
    fn test_parse_composite() {
        assert_eq!(parse_iso8601("PT1H30M15S").unwrap().as_secs(), 3600 + 1800 + 15);
    }

    #[test]
    fn test_parse_days_and_time() {
        assert_eq!(parse_iso8601("P1DT2H").unwrap().as_secs(), 86_400 + 7_200);
    }

    #[test]
    fn test_parse_fractional_seconds() {
        assert_eq!(parse_iso8601("PT0.5S").unwrap().as_millis(), 500);
    }

    #[test]
    fn test_parse_zero_duration() {
        assert_eq!(parse_iso8601("PT0S").unwrap().as_millis(), 0);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_iso8601("5S").is_err());
        assert!(parse_iso8601("P").is_err());
        assert!(parse_iso8601("PT5X").is_err());
        assert!(parse_iso8601("P1Y").is_err());
    }

    #[test]
    fn test_units_object() {
        let spec = DurationSpec::Units(DurationUnits {
            minutes: 1,
            seconds: 30,
            ..Default::default()
        });
        assert_eq!(spec.to_std().unwrap().as_secs(), 90);
    }

    #[test]
    fn test_spec_deserializes_both_shapes() {
        let iso: DurationSpec = serde_yaml::from_str("PT2S").unwrap();
        assert_eq!(iso.to_std().unwrap().as_secs(), 2);
        let units: DurationSpec = serde_yaml::from_str("{ seconds: 2 }").unwrap();
        assert_eq!(units.to_std().unwrap().as_secs(), 2);
    }
}
