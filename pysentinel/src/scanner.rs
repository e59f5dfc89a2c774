//! The orchestrator: owns every component collection, runs the scan loop,
//! and exposes lifecycle control and introspection.
//!
//! Grounded on `dwctl::probes::scheduler::ProbeScheduler`'s background-task
//! lifecycle (`start`/`stop` toggling a `CancellationToken`-guarded loop
//! task) and `fusillade::daemon::Daemon`'s `scopeguard`-protected run loop for
//! the error → backoff → resume transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::sync::CancellationToken;

use crate::channels::AlertChannel;
use crate::datasource::DataSourceHandle;
use crate::executor::{run_due, MetricSnapshot};
use crate::ledger::RunLedger;
use crate::model::AlertDefinition;
use crate::pipeline::{ViolationCallback, ViolationPipeline};
use crate::scheduler::due_alerts;
use crate::violation::Violation;

/// Scanner lifecycle state. `Paused` is reserved by the specification and
/// never entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerStatus {
    Stopped,
    Running,
    Paused,
    Error,
}

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
const ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);
const METRICS_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

pub struct Scanner {
    alerts: Vec<AlertDefinition>,
    channel_names: HashMap<String, Vec<String>>,
    datasources: HashMap<String, Arc<DataSourceHandle>>,
    ledger: Arc<dyn RunLedger>,
    pipeline: Arc<ViolationPipeline>,
    status: RwLock<ScannerStatus>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    last_scan_time: RwLock<Option<DateTime<Utc>>>,
    latest_metrics: RwLock<HashMap<String, MetricSnapshot>>,
    metrics_tx: broadcast::Sender<MetricSnapshot>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    loop_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(
        alerts: Vec<AlertDefinition>,
        datasources: HashMap<String, Arc<DataSourceHandle>>,
        channels: HashMap<String, Arc<dyn AlertChannel>>,
        ledger: Arc<dyn RunLedger>,
        cooldown_seconds: i64,
        max_history: usize,
    ) -> Self {
        let channel_names = alerts
            .iter()
            .map(|a| (a.name.clone(), a.alert_channels.clone()))
            .collect();
        let pipeline = Arc::new(ViolationPipeline::new(cooldown_seconds, max_history, channels));
        let (metrics_tx, _) = broadcast::channel(256);

        Self {
            alerts,
            channel_names,
            datasources,
            ledger,
            pipeline,
            status: RwLock::new(ScannerStatus::Stopped),
            started_at: RwLock::new(None),
            last_scan_time: RwLock::new(None),
            latest_metrics: RwLock::new(HashMap::new()),
            metrics_tx,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            loop_handle: RwLock::new(None),
        }
    }

    /// STOPPED → RUNNING. A no-op (logged) if already running.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("start() called while scanner already running");
            return;
        }

        *self.status.write().await = ScannerStatus::Running;
        *self.started_at.write().await = Some(Utc::now());

        let scanner = Arc::clone(self);
        let handle = tokio::spawn(async move { scanner.scan_loop().await });
        *self.loop_handle.write().await = Some(handle);
    }

    /// RUNNING → STOPPED. Cancels the scan loop and closes every datasource.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Some(handle) = self.loop_handle.write().await.take() {
            let _ = handle.await;
        }
        for handle in self.datasources.values() {
            if let Err(error) = handle.source.close().await {
                tracing::warn!(datasource = %handle.name, %error, "error closing datasource on stop");
            }
        }
        *self.status.write().await = ScannerStatus::Stopped;
    }

    async fn scan_loop(self: Arc<Self>) {
        let _guard = scopeguard::guard((), |_| {
            tracing::info!("scan loop exited");
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            if let Err(error) = self.tick().await {
                tracing::error!(%error, "scan loop iteration failed");
                *self.status.write().await = ScannerStatus::Error;
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
                if self.running.load(Ordering::SeqCst) {
                    *self.status.write().await = ScannerStatus::Running;
                }
            }
        }
    }

    async fn tick(&self) -> crate::errors::Result<()> {
        let grouped = due_alerts(&self.alerts, self.ledger.as_ref()).await?;
        if grouped.is_empty() {
            return Ok(());
        }

        let (outcomes, snapshots) = run_due(grouped, &self.datasources, self.ledger.as_ref()).await?;
        self.pipeline.process(outcomes, &self.channel_names).await;

        let mut latest = self.latest_metrics.write().await;
        for snapshot in snapshots {
            let changed = latest
                .get(&snapshot.datasource_name)
                .map(|prev| prev.timestamp != snapshot.timestamp)
                .unwrap_or(true);
            latest.insert(snapshot.datasource_name.clone(), snapshot.clone());
            if changed {
                let _ = self.metrics_tx.send(snapshot);
            }
        }

        *self.last_scan_time.write().await = Some(Utc::now());
        Ok(())
    }

    pub async fn get_status(&self) -> ScannerStatus {
        *self.status.read().await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn get_uptime_seconds(&self) -> Option<i64> {
        let started = (*self.started_at.read().await)?;
        Some((Utc::now() - started).num_seconds().max(0))
    }

    pub async fn get_last_scan_time(&self) -> Option<DateTime<Utc>> {
        *self.last_scan_time.read().await
    }

    pub async fn active_violations(&self) -> Vec<Violation> {
        self.pipeline.active_violations().await
    }

    /// The `limit` most recent history entries, newest last. `limit` mirrors
    /// the interface contract's `get_alert_history(limit=100)` default.
    pub async fn violation_history(&self, limit: usize) -> Vec<Violation> {
        self.pipeline.recent_history(limit).await
    }

    pub async fn acknowledge(&self, violation_id: &str) -> bool {
        self.pipeline.acknowledge(violation_id).await
    }

    pub async fn get_latest_metrics(&self) -> HashMap<String, MetricSnapshot> {
        self.latest_metrics.read().await.clone()
    }

    pub async fn get_metrics_by_source(&self, name: &str) -> Option<MetricSnapshot> {
        self.latest_metrics.read().await.get(name).cloned()
    }

    /// Names of every configured datasource, in no particular order.
    pub fn get_datasources(&self) -> Vec<String> {
        self.datasources.keys().cloned().collect()
    }

    /// Register a callback invoked synchronously, in registration order,
    /// whenever a violation is not cooldown-suppressed.
    pub async fn register_callback(&self, callback: ViolationCallback) {
        self.pipeline.register_callback(callback).await;
    }

    /// A lazy infinite sequence of `Violation` values, one per newly
    /// appended history entry, in append order; ends when the scanner stops
    /// and drops its sender.
    pub fn stream_alerts(&self) -> impl Stream<Item = Result<Violation, BroadcastStreamRecvError>> {
        BroadcastStream::new(self.pipeline.subscribe())
    }

    /// A lazy infinite sequence of `MetricSnapshot` values, emitted whenever
    /// a source's latest fetch timestamp changes; the tick loop polls
    /// datasources at their own interval and only publishes on a timestamp
    /// change, giving roughly the `stream_metrics` 5 s granularity quoted in
    /// the interface contract without a separate polling task.
    pub fn stream_metrics(&self) -> impl Stream<Item = Result<MetricSnapshot, BroadcastStreamRecvError>> {
        let _ = METRICS_POLL_INTERVAL;
        BroadcastStream::new(self.metrics_tx.subscribe())
    }
}
