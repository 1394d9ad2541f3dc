//! Lenient parsing helpers shared by the validator, transformer and store.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Parse the leading decimal integer of `s`.
///
/// Leading whitespace and a single sign are allowed; parsing stops at the
/// first non-digit. Returns `None` when no digit is found. Values beyond
/// `i64` saturate.
///
/// `"42"` → 42, `" 7"` → 7, `"4.9"` → 4, `"42abc"` → 42, `"abc"` → None.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let len = digits.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }

    let magnitude = digits[..len].bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });

    Some(if negative { -magnitude } else { magnitude })
}

/// Parse a single reading value, keeping its fractional part.
///
/// The whole trimmed string is tried as a finite decimal first; anything
/// else falls back to [`parse_int_prefix`].
///
/// `"23.7"` → 23.7, `" 42 "` → 42.0, `"42abc"` → 42.0, `"NaN"` → None.
pub fn parse_decimal(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .or_else(|| parse_int_prefix(s).map(|v| v as f64))
}

/// Parse a timestamp in RFC 3339 or SQL `YYYY-MM-DD HH:MM:SS[.fff]` form.
/// Naive timestamps are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Canonical storage form: RFC 3339, millisecond precision, `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_int_prefix() {
        assert_eq!(parse_int_prefix("42"), Some(42));
        assert_eq!(parse_int_prefix("  7"), Some(7));
        assert_eq!(parse_int_prefix("-3"), Some(-3));
        assert_eq!(parse_int_prefix("+100"), Some(100));
        assert_eq!(parse_int_prefix("4.9"), Some(4));
        assert_eq!(parse_int_prefix("42abc"), Some(42));
        assert_eq!(parse_int_prefix("abc"), None);
        assert_eq!(parse_int_prefix(""), None);
        assert_eq!(parse_int_prefix("-"), None);
    }

    #[test]
    fn test_parse_int_prefix_saturates() {
        assert_eq!(parse_int_prefix("99999999999999999999999"), Some(i64::MAX));
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal("23.7"), Some(23.7));
        assert_eq!(parse_decimal(" 100.9 "), Some(100.9));
        assert_eq!(parse_decimal("42"), Some(42.0));
        assert_eq!(parse_decimal("42abc"), Some(42.0));
        assert_eq!(parse_decimal("4.9.1"), Some(4.0));
        assert_eq!(parse_decimal("inf"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("abc"), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap();

        assert_eq!(parse_timestamp("2024-03-01T10:15:30Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:15:30+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 10:15:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:15:30"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_format_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 30).unwrap();
        let text = format_timestamp(&ts);
        assert_eq!(text, "2024-03-01T10:15:30.000Z");
        assert_eq!(parse_timestamp(&text), Some(ts));
    }
}
