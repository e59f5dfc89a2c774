//! Concurrent per-datasource fetch + threshold evaluation.
//!
//! Grounded on `fusillade::daemon::Daemon::run`'s claim-batch → group-by-key →
//! spawn-bounded-tasks → `JoinSet` drain loop: here the "batch" is the set of
//! due alerts for one tick and the "key" is the datasource they query, so
//! every datasource gets at most one concurrent in-flight fetch per alert
//! while independent datasources proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::datasource::DataSourceHandle;
use crate::ledger::RunLedger;
use crate::model::AlertDefinition;
use crate::threshold::check_threshold;
use crate::violation::Violation;

/// The outcome of evaluating one alert against one fetch.
pub enum CheckOutcome {
    Violated(Violation),
    Cleared { key: String },
    Skipped,
}

/// The most recent metric map fetched from a datasource, for the scanner's
/// `stream_metrics`/`get_latest_metrics` introspection.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub datasource_name: String,
    pub metrics: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// One alert's evaluation, paired with whether its fetch reached the
/// datasource successfully (independent of whether a violation resulted) so
/// the run ledger can be updated on every successful fetch, not just on
/// violations — the source only advanced its run timestamp on violation,
/// which starved cleared alerts of their interval and made them re-fire on
/// every tick; fixed here per the scheduling invariant this crate commits to.
struct Evaluated {
    alert_name: String,
    fetched: bool,
    outcome: CheckOutcome,
    snapshot: Option<MetricSnapshot>,
}

/// Run every due alert in `grouped`, fetching each datasource's query at most
/// once per alert, evaluating thresholds, and updating the run ledger and
/// per-datasource error accounting as fetches succeed or fail. Returns the
/// evaluation outcomes alongside a metric snapshot per successful fetch, for
/// the scanner's introspection.
pub async fn run_due(
    grouped: HashMap<String, Vec<&AlertDefinition>>,
    datasources: &HashMap<String, Arc<DataSourceHandle>>,
    ledger: &dyn RunLedger,
) -> crate::errors::Result<(Vec<CheckOutcome>, Vec<MetricSnapshot>)> {
    let mut join_set: JoinSet<Vec<Evaluated>> = JoinSet::new();

    for (datasource_name, alerts) in grouped {
        let Some(handle) = datasources.get(&datasource_name).cloned() else {
            tracing::warn!(datasource = %datasource_name, "alert references unknown datasource");
            continue;
        };
        if !handle.is_enabled() {
            tracing::debug!(datasource = %datasource_name, "datasource disabled, skipping due alerts");
            continue;
        }

        let alerts: Vec<AlertDefinition> = alerts.into_iter().cloned().collect();
        join_set.spawn(async move {
            let mut outcomes = Vec::with_capacity(alerts.len());
            for alert in &alerts {
                outcomes.push(evaluate_one(&handle, alert).await);
            }
            outcomes
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(evaluated) => results.extend(evaluated),
            Err(error) => tracing::error!(%error, "datasource task panicked"),
        }
    }

    let mut outcomes = Vec::with_capacity(results.len());
    let mut snapshots = Vec::new();
    for evaluated in results {
        if evaluated.fetched {
            ledger.update_last_run(&evaluated.alert_name, Utc::now()).await?;
        }
        if let Some(snapshot) = evaluated.snapshot {
            snapshots.push(snapshot);
        }
        outcomes.push(evaluated.outcome);
    }

    Ok((outcomes, snapshots))
}

async fn evaluate_one(handle: &Arc<DataSourceHandle>, alert: &AlertDefinition) -> Evaluated {
    let key = Violation::key(&alert.datasource_name, &alert.name);

    match handle.fetch_with_timeout(&alert.query).await {
        Ok(metrics) => {
            handle.error_count.store(0, std::sync::atomic::Ordering::Relaxed);
            let now = Utc::now();
            handle.record_success(now).await;
            let snapshot = Some(MetricSnapshot {
                datasource_name: alert.datasource_name.clone(),
                metrics: metrics.clone(),
                timestamp: now,
            });
            let Some(value) = metrics.get(&alert.metric_key) else {
                tracing::warn!(alert = %alert.name, metric = %alert.metric_key, "metric key absent from fetch result");
                return Evaluated {
                    alert_name: alert.name.clone(),
                    fetched: true,
                    outcome: CheckOutcome::Skipped,
                    snapshot,
                };
            };
            let outcome = match check_threshold(&alert.threshold, value) {
                Some((true, operator)) => {
                    let threshold_value = match alert.threshold {
                        crate::model::Threshold::Max(v) | crate::model::Threshold::Min(v) => v,
                        crate::model::Threshold::None => unreachable!("violated with no threshold"),
                    };
                    CheckOutcome::Violated(Violation::new(
                        alert.datasource_name.clone(),
                        alert.name.clone(),
                        alert.metric_key.clone(),
                        alert.alert_group.clone(),
                        value.clone(),
                        threshold_value,
                        operator,
                        alert.severity,
                        now,
                    ))
                }
                Some((false, _)) => CheckOutcome::Cleared { key },
                None => CheckOutcome::Skipped,
            };
            Evaluated {
                alert_name: alert.name.clone(),
                fetched: true,
                outcome,
                snapshot,
            }
        }
        Err(error) => {
            tracing::warn!(datasource = %handle.name, alert = %alert.name, %error, "fetch failed");
            if handle.record_failure() {
                tracing::error!(datasource = %handle.name, "datasource auto-disabled after repeated failures");
            }
            Evaluated {
                alert_name: alert.name.clone(),
                fetched: false,
                outcome: CheckOutcome::Skipped,
                snapshot: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SqliteRunLedger;
    use crate::model::{Severity, Threshold};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A datasource double whose `fetch` can be scripted to fail a fixed
    /// number of times, mirroring fusillade's `MockHttpClient`.
    struct ScriptedDataSource {
        fail_times: u32,
        calls: AtomicU32,
        value: f64,
    }

    #[async_trait]
    impl crate::datasource::DataSource for ScriptedDataSource {
        async fn fetch(&self, _query: &str) -> anyhow::Result<HashMap<String, Value>> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.fail_times {
                anyhow::bail!("scripted failure");
            }
            let mut map = HashMap::new();
            map.insert("value".to_string(), json!(self.value));
            Ok(map)
        }
    }

    fn alert(name: &str, datasource: &str) -> AlertDefinition {
        AlertDefinition {
            name: name.to_string(),
            metric_key: "value".to_string(),
            query: "q".to_string(),
            datasource_name: datasource.to_string(),
            threshold: Threshold::Max(90.0),
            severity: Severity::Warning,
            interval_seconds: 0,
            alert_channels: vec![],
            description: String::new(),
            alert_group: "default".to_string(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn successful_fetch_above_threshold_violates_and_updates_ledger() {
        let source = ScriptedDataSource {
            fail_times: 0,
            calls: AtomicU32::new(0),
            value: 95.0,
        };
        let handle = Arc::new(DataSourceHandle::new("db1", Box::new(source), true, 3, 5));
        let mut datasources = HashMap::new();
        datasources.insert("db1".to_string(), handle);

        let alert = alert("cpu_high", "db1");
        let mut grouped: HashMap<String, Vec<&AlertDefinition>> = HashMap::new();
        grouped.insert("db1".to_string(), vec![&alert]);

        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        let (outcomes, snapshots) = run_due(grouped, &datasources, &ledger).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], CheckOutcome::Violated(_)));
        assert_eq!(snapshots.len(), 1);
        assert!(ledger.last_run("cpu_high").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_failures_trip_auto_disable() {
        let source = ScriptedDataSource {
            fail_times: 10,
            calls: AtomicU32::new(0),
            value: 0.0,
        };
        let handle = Arc::new(DataSourceHandle::new("db1", Box::new(source), true, 3, 5));
        let mut datasources = HashMap::new();
        datasources.insert("db1".to_string(), handle.clone());

        let alert = alert("cpu_high", "db1");
        let ledger = SqliteRunLedger::in_memory().await.unwrap();

        for _ in 0..3 {
            let mut grouped: HashMap<String, Vec<&AlertDefinition>> = HashMap::new();
            grouped.insert("db1".to_string(), vec![&alert]);
            run_due(grouped, &datasources, &ledger).await.unwrap();
        }

        assert!(!handle.is_enabled(), "datasource should auto-disable after max_errors fetch failures");
    }
}
