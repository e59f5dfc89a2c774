//! Interval-based due-alert selection.
//!
//! Grounded on `dwctl::probes::scheduler::ProbeScheduler`'s re-scheduling
//! logic, which computes "is this due" from time-since-last-run rather than
//! a fixed wall-clock tick, so a slow previous run doesn't cause a storm of
//! immediately-due work on the next tick.

use std::collections::HashMap;

use chrono::Utc;

use crate::ledger::RunLedger;
use crate::model::AlertDefinition;

/// Select the alerts in `alerts` that are due to run now, grouped by the
/// datasource they query (so the executor can fan out concurrently per
/// datasource while still issuing one fetch per alert).
pub async fn due_alerts<'a>(
    alerts: &'a [AlertDefinition],
    ledger: &dyn RunLedger,
) -> crate::errors::Result<HashMap<String, Vec<&'a AlertDefinition>>> {
    let mut grouped: HashMap<String, Vec<&AlertDefinition>> = HashMap::new();
    let now = Utc::now();

    for alert in alerts {
        if !alert.enabled {
            continue;
        }
        if alert.interval_seconds == 0 {
            grouped.entry(alert.datasource_name.clone()).or_default().push(alert);
            continue;
        }
        let due = match ledger.last_run(&alert.name).await? {
            None => true,
            Some(last_run) => {
                let elapsed = (now - last_run).num_seconds().max(0) as u64;
                elapsed >= alert.interval_seconds
            }
        };
        if due {
            grouped.entry(alert.datasource_name.clone()).or_default().push(alert);
        }
    }

    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SqliteRunLedger;
    use crate::model::{Severity, Threshold};

    fn alert(name: &str, datasource: &str, interval: u64) -> AlertDefinition {
        AlertDefinition {
            name: name.to_string(),
            metric_key: "value".to_string(),
            query: "SELECT 1".to_string(),
            datasource_name: datasource.to_string(),
            threshold: Threshold::Max(90.0),
            severity: Severity::Warning,
            interval_seconds: interval,
            alert_channels: vec![],
            description: String::new(),
            alert_group: "default".to_string(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn never_run_alert_is_always_due() {
        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        let alerts = vec![alert("cpu_high", "db1", 60)];
        let grouped = due_alerts(&alerts, &ledger).await.unwrap();
        assert_eq!(grouped.get("db1").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn recently_run_alert_is_not_due() {
        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        let alerts = vec![alert("cpu_high", "db1", 3600)];
        ledger.update_last_run("cpu_high", Utc::now()).await.unwrap();
        let grouped = due_alerts(&alerts, &ledger).await.unwrap();
        assert!(grouped.is_empty());
    }

    #[tokio::test]
    async fn disabled_alert_is_never_due() {
        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        let mut a = alert("cpu_high", "db1", 0);
        a.enabled = false;
        let grouped = due_alerts(&[a], &ledger).await.unwrap();
        assert!(grouped.is_empty());
    }

    #[tokio::test]
    async fn zero_interval_alert_is_always_due() {
        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        let a = alert("cpu_high", "db1", 0);
        ledger.update_last_run("cpu_high", Utc::now()).await.unwrap();
        let grouped = due_alerts(&[a], &ledger).await.unwrap();
        assert_eq!(grouped.get("db1").map(Vec::len), Some(1));
    }
}
