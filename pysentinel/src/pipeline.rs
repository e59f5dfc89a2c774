//! Cooldown gating, active-violation bookkeeping, and channel fan-out.
//!
//! Grounded on `dwctl::webhooks::dispatcher::WebhookDispatcher`'s
//! claim→send→record-result loop, generalized from "one webhook per event" to
//! "one or more named channels per violation", dispatched concurrently and
//! independently so one channel's failure never blocks another's delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use crate::channels::AlertChannel;
use crate::executor::CheckOutcome;
use crate::violation::Violation;

pub type ViolationCallback = Arc<dyn Fn(&Violation) + Send + Sync>;

/// Maintains the active-violation set, a bounded recent history, cooldown
/// suppression of repeat notifications, and fan-out to named alert channels.
pub struct ViolationPipeline {
    cooldown: chrono::Duration,
    max_history: usize,
    channels: HashMap<String, Arc<dyn AlertChannel>>,
    active: RwLock<HashMap<String, Violation>>,
    history: RwLock<VecDeque<Violation>>,
    last_notified: RwLock<HashMap<String, DateTime<Utc>>>,
    callbacks: RwLock<Vec<ViolationCallback>>,
    alert_tx: broadcast::Sender<Violation>,
}

impl ViolationPipeline {
    pub fn new(
        cooldown_seconds: i64,
        max_history: usize,
        channels: HashMap<String, Arc<dyn AlertChannel>>,
    ) -> Self {
        let (alert_tx, _) = broadcast::channel(256);
        Self {
            cooldown: chrono::Duration::seconds(cooldown_seconds),
            max_history,
            channels,
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            last_notified: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(Vec::new()),
            alert_tx,
        }
    }

    pub async fn register_callback(&self, callback: ViolationCallback) {
        self.callbacks.write().await.push(callback);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Violation> {
        self.alert_tx.subscribe()
    }

    pub async fn active_violations(&self) -> Vec<Violation> {
        self.active.read().await.values().cloned().collect()
    }

    /// The `limit` most recent entries, newest last.
    pub async fn recent_history(&self, limit: usize) -> Vec<Violation> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn acknowledge(&self, violation_id: &str) -> bool {
        let mut active = self.active.write().await;
        for violation in active.values_mut() {
            if violation.violation_id == violation_id {
                violation.acknowledged = true;
                return true;
            }
        }
        false
    }

    /// Apply one tick's worth of executor outcomes: update active/history
    /// state for everything, and fan out notifications only for violations
    /// not currently suppressed by cooldown.
    pub async fn process(
        &self,
        outcomes: Vec<CheckOutcome>,
        channel_names: &HashMap<String, Vec<String>>,
    ) {
        for outcome in outcomes {
            match outcome {
                CheckOutcome::Violated(violation) => self.handle_violation(violation, channel_names).await,
                CheckOutcome::Cleared { key } => self.handle_clear(&key).await,
                CheckOutcome::Skipped => {}
            }
        }
    }

    async fn handle_violation(&self, violation: Violation, channel_names: &HashMap<String, Vec<String>>) {
        let key = Violation::key(&violation.datasource_name, &violation.alert_name);

        if !self.should_notify(&key).await {
            return;
        }

        self.active.write().await.insert(key.clone(), violation.clone());
        {
            let mut history = self.history.write().await;
            history.push_back(violation.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }
        self.last_notified.write().await.insert(key.clone(), violation.timestamp);

        let _ = self.alert_tx.send(violation.clone());
        for callback in self.callbacks.read().await.iter() {
            callback(&violation);
        }

        let names = channel_names.get(&violation.alert_name).cloned().unwrap_or_default();
        self.dispatch(&violation, &names).await;
    }

    async fn handle_clear(&self, key: &str) {
        self.active.write().await.remove(key);
    }

    async fn should_notify(&self, key: &str) -> bool {
        match self.last_notified.read().await.get(key) {
            Some(last) => Utc::now() - *last >= self.cooldown,
            None => true,
        }
    }

    /// Sends to each named channel in order, one at a time. Concurrency in
    /// this pipeline lives at the executor's per-datasource group level, not
    /// within a single violation's channel fan-out.
    async fn dispatch(&self, violation: &Violation, channel_names: &[String]) {
        for name in channel_names {
            let Some(channel) = self.channels.get(name).cloned() else {
                tracing::warn!(channel = %name, alert = %violation.alert_name, "alert references unknown channel");
                continue;
            };
            if channel.send(violation).await {
                tracing::debug!(channel = %name, "violation delivered");
            } else {
                tracing::warn!(channel = %name, "violation delivery failed");
            }
        }
    }
}
