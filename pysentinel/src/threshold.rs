//! Pure threshold evaluation (spec §4.4).

use crate::model::{Operator, Threshold};
use serde_json::Value;

/// Coerce a raw JSON value into an `f64`, if it represents one.
///
/// Numbers deserialize directly; numeric strings are accepted so datasources
/// that return stringly-typed metrics (e.g. Redis `INFO` fields) still work.
/// Anything else (bool, null, object, array, non-numeric string) yields
/// `None`, matching the spec's "non-numeric or unparseable value: no
/// violation" rule.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Evaluate a threshold against a raw metric value.
///
/// Returns `Some((violated, operator))` when the value is numeric, or `None`
/// when the value can't be parsed as a number (evaluation proceeds without
/// error in that case — the alert is simply not violated this cycle).
pub fn check_threshold(threshold: &Threshold, value: &Value) -> Option<(bool, Operator)> {
    match threshold {
        Threshold::Max(max) => {
            let v = as_f64(value)?;
            Some((v > *max, Operator::Le))
        }
        Threshold::Min(min) => {
            let v = as_f64(value)?;
            Some((v < *min, Operator::Ge))
        }
        Threshold::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn max_threshold_violates_above() {
        let (violated, op) = check_threshold(&Threshold::Max(90.0), &json!(95)).unwrap();
        assert!(violated);
        assert_eq!(op, Operator::Le);
    }

    #[test]
    fn max_threshold_does_not_violate_at_or_below() {
        let (violated, _) = check_threshold(&Threshold::Max(90.0), &json!(90)).unwrap();
        assert!(!violated);
        let (violated, _) = check_threshold(&Threshold::Max(90.0), &json!(50)).unwrap();
        assert!(!violated);
    }

    #[test]
    fn min_threshold_violates_below() {
        let (violated, op) = check_threshold(&Threshold::Min(10.0), &json!(5)).unwrap();
        assert!(violated);
        assert_eq!(op, Operator::Ge);
    }

    #[test]
    fn min_threshold_does_not_violate_at_or_above() {
        let (violated, _) = check_threshold(&Threshold::Min(10.0), &json!(10)).unwrap();
        assert!(!violated);
    }

    #[test]
    fn no_threshold_never_violates() {
        assert_eq!(check_threshold(&Threshold::None, &json!(1e9)), None);
    }

    #[test]
    fn non_numeric_value_never_violates() {
        assert_eq!(check_threshold(&Threshold::Max(1.0), &json!("not-a-number")), None);
        assert_eq!(check_threshold(&Threshold::Max(1.0), &json!(null)), None);
        assert_eq!(check_threshold(&Threshold::Max(1.0), &json!({"a": 1})), None);
    }

    #[test]
    fn numeric_string_is_parsed() {
        let (violated, _) = check_threshold(&Threshold::Max(90.0), &json!("95.5")).unwrap();
        assert!(violated);
    }
}
