//! Elevation duration parsing and validation.
//!
//! Accepts both Go-style duration strings (`1h30m`, `90m`, `30s`) and
//! ISO 8601 durations (`PT1H30M`, `P1D`, `P1W`). Calendar components are
//! resolved by shifting a fixed reference date (2000-01-01 UTC) so that
//! `P1M` means "one calendar month from the reference", matching the
//! upstream behaviour operators already rely on.

use chrono::{DateTime, Days, Duration, Months, TimeZone, Utc};

/// Errors from duration parsing and validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration format: {0}. Expect ISO 8601 or duration string")]
    InvalidFormat(String),

    #[error("duration must be at least 1 minutes")]
    TooShort,
}

/// Parse and validate an elevation duration.
///
/// Any duration below one minute is rejected: an elevation that expires
/// before the revocation scheduler can reasonably fire is a foot-gun.
pub fn validate_duration(input: &str) -> Result<Duration, DurationError> {
    let parsed = parse_duration(input)?;
    if parsed < Duration::minutes(1) {
        return Err(DurationError::TooShort);
    }
    Ok(parsed)
}

/// Parse a duration without the one-minute floor.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::InvalidFormat(trimmed.to_string()));
    }

    if let Some(d) = parse_go_duration(trimmed) {
        return Ok(d);
    }
    if let Some(d) = parse_iso8601(trimmed) {
        return Ok(d);
    }

    Err(DurationError::InvalidFormat(trimmed.to_string()))
}

/// Go-style durations: a sequence of `<number><unit>` segments where unit is
/// one of `ns`, `us`, `ms`, `s`, `m`, `h`. Fractional numbers are allowed.
fn parse_go_duration(input: &str) -> Option<Duration> {
    let mut chars = input.chars().peekable();
    let mut total_ms: f64 = 0.0;
    let mut saw_segment = false;

    while chars.peek().is_some() {
        let mut number = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if number.is_empty() {
            return None;
        }
        let value: f64 = number.parse().ok()?;

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphabetic() {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let unit_ms = match unit.as_str() {
            "ns" => 0.000_001,
            "us" | "µs" => 0.001,
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return None,
        };

        total_ms += value * unit_ms;
        saw_segment = true;
    }

    if !saw_segment {
        return None;
    }
    Some(Duration::milliseconds(total_ms.round() as i64))
}

/// ISO 8601 durations (`PnYnMnDTnHnMnS`, `PnW`), case-insensitive.
///
/// Calendar parts (years, months, days, weeks) shift the fixed reference
/// date; time parts are exact.
fn parse_iso8601(input: &str) -> Option<Duration> {
    let upper = input.to_uppercase();
    let rest = upper.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut years = 0u32;
    let mut months = 0u32;
    let mut weeks = 0u64;
    let mut days = 0u64;

    let mut number = String::new();
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: u64 = number.parse().ok()?;
        number.clear();
        match c {
            'Y' => years = u32::try_from(value).ok()?,
            'M' => months = u32::try_from(value).ok()?,
            'W' => weeks = value,
            'D' => days = value,
            _ => return None,
        }
    }
    if !number.is_empty() {
        return None;
    }

    let mut time_seconds: i64 = 0;
    if let Some(time_part) = time_part {
        if time_part.is_empty() {
            return None;
        }
        let mut number = String::new();
        for c in time_part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let value: i64 = number.parse().ok()?;
            number.clear();
            match c {
                'H' => time_seconds += value * 3600,
                'M' => time_seconds += value * 60,
                'S' => time_seconds += value,
                _ => return None,
            }
        }
        if !number.is_empty() {
            return None;
        }
    } else if date_part.is_empty() {
        return None;
    }

    let reference: DateTime<Utc> = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single()?;
    let shifted = reference
        .checked_add_months(Months::new(years.checked_mul(12)?.checked_add(months)?))?
        .checked_add_days(Days::new(weeks.checked_mul(7)?.checked_add(days)?))?;

    Some(shifted - reference + Duration::seconds(time_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn go_style_durations() {
        assert_eq!(parse_duration("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("90m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::minutes(90));
    }

    #[test]
    fn iso8601_durations() {
        assert_eq!(validate_duration("PT5M").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("PT1H30M").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("P1D").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("P1W").unwrap(), Duration::days(7));
        assert_eq!(parse_duration("pt15m").unwrap(), Duration::minutes(15));
    }

    #[test]
    fn iso8601_calendar_months_shift_reference() {
        // Reference 2000-01-01: one month = 31 days (January).
        assert_eq!(parse_duration("P1M").unwrap(), Duration::days(31));
    }

    #[test]
    fn sub_minute_rejected() {
        let err = validate_duration("30s").unwrap_err();
        assert_eq!(err.to_string(), "duration must be at least 1 minutes");
    }

    #[test]
    fn empty_and_garbage_rejected() {
        let err = validate_duration("").unwrap_err();
        assert!(err.to_string().starts_with("invalid duration format:"));
        assert!(validate_duration("soon").is_err());
        assert!(validate_duration("P").is_err());
        assert!(validate_duration("PT").is_err());
        assert!(validate_duration("12").is_err());
    }

    #[test]
    fn exactly_one_minute_accepted() {
        assert_eq!(validate_duration("1m").unwrap(), Duration::minutes(1));
        assert_eq!(validate_duration("PT1M").unwrap(), Duration::minutes(1));
    }
}
