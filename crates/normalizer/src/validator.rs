//! Acceptance checks for raw readings.
//!
//! Pure predicates with no side effects. A rejected reading is dropped by
//! the caller; nothing here logs or counts.

use crate::parse::parse_int_prefix;
use crate::schema::{temperature_in_range, DataKind, RawReading};

/// Decide whether `raw` is acceptable input for `kind`.
///
/// For [`DataKind::Temperature`] a reading is accepted when it is:
/// - a number within [0, 100];
/// - a string whose integer parse lies within [0, 100];
/// - a comma-separated string where every element does;
/// - a structured object. Its values are left to the transformer.
///
/// Every other shape, and every other kind, is rejected.
pub fn accepts(raw: &RawReading, kind: &DataKind) -> bool {
    match kind {
        DataKind::Temperature => accepts_temperature(raw),
        DataKind::Other(_) => false,
    }
}

fn accepts_temperature(raw: &RawReading) -> bool {
    match raw {
        RawReading::Number(value) => temperature_in_range(*value),
        RawReading::Text(text) if text.contains(',') => text.split(',').all(integer_in_range),
        RawReading::Text(text) => integer_in_range(text),
        RawReading::Object(_) => true,
        RawReading::Other(_) => false,
    }
}

fn integer_in_range(s: &str) -> bool {
    parse_int_prefix(s).is_some_and(|v| (0..=100).contains(&v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp(raw: impl Into<RawReading>) -> bool {
        accepts(&raw.into(), &DataKind::Temperature)
    }

    #[test]
    fn test_numbers_in_range() {
        for t in 0..=100 {
            assert!(temp(t as f64), "{} should be accepted", t);
        }
        assert!(temp(55.5));
    }

    #[test]
    fn test_numbers_out_of_range() {
        assert!(!temp(-1.0));
        assert!(!temp(-0.5));
        assert!(!temp(100.5));
        assert!(!temp(150.0));
        assert!(!temp(f64::NAN));
        assert!(!temp(f64::INFINITY));
    }

    #[test]
    fn test_numeric_strings() {
        for t in 0..=100 {
            assert!(temp(t.to_string()), "{:?} should be accepted", t.to_string());
        }
        assert!(!temp("-1"));
        assert!(!temp("101"));
        assert!(!temp("abc"));
        assert!(!temp(""));
    }

    #[test]
    fn test_boundaries() {
        assert!(temp(0.0));
        assert!(temp(100.0));
        assert!(temp("0"));
        assert!(temp("100"));
    }

    #[test]
    fn test_comma_separated() {
        assert!(temp("10,20,30"));
        assert!(temp("0,100"));
        assert!(!temp("10,200,30"));
        assert!(!temp("10,abc"));
        assert!(!temp("10,,30"));
        assert!(!temp("10,"));
    }

    #[test]
    fn test_structured_object_shape_only() {
        assert!(accepts(&RawReading::from(json!({"temperature": 42})), &DataKind::Temperature));
        assert!(accepts(&RawReading::from(json!({})), &DataKind::Temperature));
        // Range is not checked for objects.
        assert!(accepts(&RawReading::from(json!({"temperature": 150})), &DataKind::Temperature));
    }

    #[test]
    fn test_other_shapes_rejected() {
        assert!(!accepts(&RawReading::from(json!([10, 20])), &DataKind::Temperature));
        assert!(!accepts(&RawReading::from(json!(true)), &DataKind::Temperature));
        assert!(!accepts(&RawReading::from(json!(null)), &DataKind::Temperature));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let kind = DataKind::Other("humidity".to_string());
        assert!(!accepts(&RawReading::Number(42.0), &kind));
        assert!(!accepts(&RawReading::from("42"), &kind));
    }
}
