//! Violations: concrete instances of an alert whose predicate evaluated true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Operator, Severity};

/// A concrete, immutable (except `acknowledged`) violation instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: String,
    pub alert_name: String,
    pub metric_name: String,
    pub datasource_name: String,
    pub alert_group: String,
    pub current_value: Value,
    pub threshold_value: f64,
    pub operator: Operator,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Violation {
    /// Build the `{datasource_name}_{alert_name}` key used for both the
    /// active-violation set and the cooldown map.
    pub fn key(datasource_name: &str, alert_name: &str) -> String {
        format!("{datasource_name}_{alert_name}")
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        datasource_name: impl Into<String>,
        alert_name: impl Into<String>,
        metric_name: impl Into<String>,
        alert_group: impl Into<String>,
        current_value: Value,
        threshold_value: f64,
        operator: Operator,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let datasource_name = datasource_name.into();
        let alert_name = alert_name.into();
        let message = format!(
            "{} {} threshold {} {} (current: {})",
            alert_name,
            severity,
            operator,
            threshold_value,
            current_value
        );
        Self {
            violation_id: format!("{}_{}_{}", datasource_name, alert_name, timestamp.timestamp()),
            metric_name: metric_name.into(),
            alert_group: alert_group.into(),
            current_value,
            threshold_value,
            operator,
            severity,
            message,
            timestamp,
            acknowledged: false,
            datasource_name,
            alert_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use serde_json::json;

    #[test]
    fn roundtrips_through_wire_format() {
        let v = Violation::new(
            "db1",
            "cpu_high",
            "cpu",
            "infra",
            json!(95.0),
            90.0,
            Operator::Le,
            Severity::Critical,
            Utc::now(),
        );
        let encoded = serde_json::to_string(&v).unwrap();
        let decoded: Violation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.violation_id, v.violation_id);
        assert_eq!(decoded.alert_name, v.alert_name);
        assert_eq!(decoded.datasource_name, v.datasource_name);
        assert_eq!(decoded.severity, v.severity);
        assert_eq!(decoded.operator, v.operator);
        assert_eq!(
            decoded.timestamp.timestamp(),
            v.timestamp.timestamp(),
            "round-trip is exact to second resolution"
        );
    }

    #[test]
    fn key_matches_active_set_and_cooldown_convention() {
        assert_eq!(Violation::key("db1", "cpu_high"), "db1_cpu_high");
    }
}
