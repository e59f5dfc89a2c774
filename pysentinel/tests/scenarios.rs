//! End-to-end scenarios from the scan engine's testable-properties list:
//! scheduler → executor → pipeline wired together manually, tick by tick,
//! against scripted datasources and recording channels.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use pysentinel::channels::AlertChannel;
use pysentinel::datasource::{DataSource, DataSourceHandle};
use pysentinel::executor::run_due;
use pysentinel::ledger::{RunLedger, SqliteRunLedger};
use pysentinel::model::{AlertDefinition, Severity, Threshold};
use pysentinel::pipeline::ViolationPipeline;
use pysentinel::scheduler::due_alerts;
use pysentinel::violation::Violation;

/// A datasource whose successive `fetch` calls return a scripted sequence of
/// results, optionally after a fixed delay (to exercise concurrency timing).
struct ScriptedSource {
    responses: Mutex<VecDeque<anyhow::Result<HashMap<String, Value>>>>,
    delay: Duration,
}

impl ScriptedSource {
    fn ok_sequence(values: Vec<f64>) -> Self {
        let responses = values
            .into_iter()
            .map(|v| {
                let mut map = HashMap::new();
                map.insert("cpu".to_string(), json!(v));
                Ok(map)
            })
            .collect();
        Self {
            responses: Mutex::new(responses),
            delay: Duration::ZERO,
        }
    }

    fn always_failing() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(value: f64, delay: Duration) -> Self {
        let mut map = HashMap::new();
        map.insert("cpu".to_string(), json!(value));
        let mut responses = VecDeque::new();
        responses.push_back(Ok(map));
        Self {
            responses: Mutex::new(responses),
            delay,
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(&self, _query: &str) -> anyhow::Result<HashMap<String, Value>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(result) => result,
            None => anyhow::bail!("datasource exhausted or always-failing"),
        }
    }
}

struct RecordingChannel {
    calls: AtomicUsize,
    sent: Mutex<Vec<Violation>>,
}

impl RecordingChannel {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AlertChannel for RecordingChannel {
    async fn send(&self, violation: &Violation) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.sent.lock().unwrap().push(violation.clone());
        true
    }

    fn name(&self) -> &str {
        "webhook1"
    }
}

fn alert(name: &str, datasource: &str, threshold: Threshold, channels: &[&str]) -> AlertDefinition {
    AlertDefinition {
        name: name.to_string(),
        metric_key: "cpu".to_string(),
        query: "q".to_string(),
        datasource_name: datasource.to_string(),
        threshold,
        severity: Severity::Critical,
        interval_seconds: 0,
        alert_channels: channels.iter().map(|s| s.to_string()).collect(),
        description: String::new(),
        alert_group: "default".to_string(),
        enabled: true,
    }
}

async fn run_tick(
    alerts: &[AlertDefinition],
    datasources: &HashMap<String, Arc<DataSourceHandle>>,
    ledger: &dyn RunLedger,
    pipeline: &ViolationPipeline,
    channel_names: &HashMap<String, Vec<String>>,
) {
    let grouped = due_alerts(alerts, ledger).await.unwrap();
    let (outcomes, _snapshots) = run_due(grouped, datasources, ledger).await.unwrap();
    pipeline.process(outcomes, channel_names).await;
}

#[tokio::test]
async fn scenario_1_single_violation_fires_once() {
    let source = ScriptedSource::ok_sequence(vec![95.0, 95.0]);
    let handle = Arc::new(DataSourceHandle::new("http1", Box::new(source), true, 5, 30));
    let mut datasources = HashMap::new();
    datasources.insert("http1".to_string(), handle);

    let a = alert("cpu_high", "http1", Threshold::Max(90.0), &["webhook1"]);
    let channel_names: HashMap<String, Vec<String>> =
        [(a.name.clone(), a.alert_channels.clone())].into_iter().collect();

    let recorder = Arc::new(RecordingChannel::new());
    let mut channels: HashMap<String, Arc<dyn AlertChannel>> = HashMap::new();
    channels.insert("webhook1".to_string(), recorder.clone());

    let ledger = SqliteRunLedger::open(":memory:").await.unwrap();
    let pipeline = ViolationPipeline::new(300, 100, channels);

    run_tick(&[a.clone()], &datasources, &ledger, &pipeline, &channel_names).await;
    run_tick(&[a], &datasources, &ledger, &pipeline, &channel_names).await;

    assert_eq!(recorder.call_count(), 1, "cooldown must suppress the second tick's repeat send");
    assert_eq!(pipeline.recent_history(100).await.len(), 1);
    assert_eq!(pipeline.active_violations().await.len(), 1);
}

#[tokio::test]
async fn scenario_2_recovery_clears_active_set() {
    let source = ScriptedSource::ok_sequence(vec![95.0, 50.0]);
    let handle = Arc::new(DataSourceHandle::new("http1", Box::new(source), true, 5, 30));
    let mut datasources = HashMap::new();
    datasources.insert("http1".to_string(), handle);

    let a = alert("cpu_high", "http1", Threshold::Max(90.0), &[]);
    let channel_names = HashMap::new();
    let ledger = SqliteRunLedger::open(":memory:").await.unwrap();
    let pipeline = ViolationPipeline::new(0, 100, HashMap::new());

    run_tick(&[a.clone()], &datasources, &ledger, &pipeline, &channel_names).await;
    assert_eq!(pipeline.active_violations().await.len(), 1, "tick 1 must register the violation");

    run_tick(&[a], &datasources, &ledger, &pipeline, &channel_names).await;
    assert!(pipeline.active_violations().await.is_empty(), "tick 2's recovery must clear the active set");
    assert_eq!(pipeline.recent_history(100).await.len(), 1, "history retains the tick-1 entry");
}

#[tokio::test]
async fn scenario_3_cooldown_suppresses_duplicate() {
    let source = ScriptedSource::ok_sequence(vec![95.0, 95.0]);
    let handle = Arc::new(DataSourceHandle::new("http1", Box::new(source), true, 5, 30));
    let mut datasources = HashMap::new();
    datasources.insert("http1".to_string(), handle);

    let a = alert("cpu_high", "http1", Threshold::Max(90.0), &["webhook1"]);
    let channel_names: HashMap<String, Vec<String>> =
        [(a.name.clone(), a.alert_channels.clone())].into_iter().collect();

    let recorder = Arc::new(RecordingChannel::new());
    let mut channels: HashMap<String, Arc<dyn AlertChannel>> = HashMap::new();
    channels.insert("webhook1".to_string(), recorder.clone());

    let ledger = SqliteRunLedger::open(":memory:").await.unwrap();
    let pipeline = ViolationPipeline::new(300, 100, channels);

    run_tick(&[a.clone()], &datasources, &ledger, &pipeline, &channel_names).await;
    run_tick(&[a], &datasources, &ledger, &pipeline, &channel_names).await;

    assert_eq!(recorder.call_count(), 1);
    assert_eq!(
        pipeline.recent_history(100).await.len(),
        1,
        "tick 2's violation is cooldown-suppressed before it ever reaches history"
    );
}

#[tokio::test]
async fn scenario_4_datasource_auto_disable() {
    let source = ScriptedSource::always_failing();
    let handle = Arc::new(DataSourceHandle::new("http1", Box::new(source), true, 3, 30));
    let mut datasources = HashMap::new();
    datasources.insert("http1".to_string(), handle.clone());

    let a = alert("cpu_high", "http1", Threshold::Max(90.0), &[]);
    let ledger = SqliteRunLedger::open(":memory:").await.unwrap();

    for tick in 0..3 {
        let grouped = due_alerts(&[a.clone()], &ledger).await.unwrap();
        assert!(!grouped.is_empty(), "alert must remain due while the datasource never succeeds, tick {tick}");
        run_due(grouped, &datasources, &ledger).await.unwrap();
    }

    assert!(!handle.is_enabled(), "three failures with max_retries=3 must auto-disable the datasource");

    let grouped = due_alerts(&[a], &ledger).await.unwrap();
    let (outcomes, _) = run_due(grouped, &datasources, &ledger).await.unwrap();
    assert!(outcomes.is_empty(), "a disabled datasource must not be fetched again");
}

#[tokio::test]
async fn scenario_5_parallel_groups_do_not_serialize() {
    let delay = Duration::from_millis(150);
    let source_a = ScriptedSource::with_delay(10.0, delay);
    let source_b = ScriptedSource::with_delay(10.0, delay);
    let handle_a = Arc::new(DataSourceHandle::new("a", Box::new(source_a), true, 5, 30));
    let handle_b = Arc::new(DataSourceHandle::new("b", Box::new(source_b), true, 5, 30));

    let mut datasources = HashMap::new();
    datasources.insert("a".to_string(), handle_a);
    datasources.insert("b".to_string(), handle_b);

    let alert_a = alert("alert_a", "a", Threshold::None, &[]);
    let alert_b = alert("alert_b", "b", Threshold::None, &[]);
    let ledger = SqliteRunLedger::open(":memory:").await.unwrap();

    let grouped = due_alerts(&[alert_a, alert_b], &ledger).await.unwrap();
    assert_eq!(grouped.len(), 2);

    let start = tokio::time::Instant::now();
    run_due(grouped, &datasources, &ledger).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed < delay * 2,
        "two datasource groups must be fetched concurrently, not serially (elapsed={elapsed:?})"
    );
}

#[tokio::test]
async fn scenario_6_acknowledge() {
    let source = ScriptedSource::ok_sequence(vec![95.0]);
    let handle = Arc::new(DataSourceHandle::new("http1", Box::new(source), true, 5, 30));
    let mut datasources = HashMap::new();
    datasources.insert("http1".to_string(), handle);

    let a = alert("cpu_high", "http1", Threshold::Max(90.0), &[]);
    let ledger = SqliteRunLedger::open(":memory:").await.unwrap();
    let pipeline = ViolationPipeline::new(300, 100, HashMap::new());
    let channel_names = HashMap::new();

    run_tick(&[a], &datasources, &ledger, &pipeline, &channel_names).await;

    let violation_id = pipeline.active_violations().await[0].violation_id.clone();
    assert!(pipeline.acknowledge(&violation_id).await);
    assert!(pipeline.active_violations().await[0].acknowledged);
    assert!(!pipeline.acknowledge("nonexistent").await);
}
