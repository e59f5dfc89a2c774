//! The `DataSource` contract and the runtime state the executor maintains
//! around each configured instance.
//!
//! Grounded on `fusillade::http::HttpClient` (a small async capability trait
//! implemented by independent structs and dispatched by name) and
//! `dwctl::probes::executor::ProbeExecutor` (backend-specific request
//! construction from a typed config).

pub mod elasticsearch;
pub mod http;
pub mod postgresql;
pub mod prometheus;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Resolve `${VAR}` occurrences in a string from the process environment.
/// A variable that isn't set leaves the literal `${VAR}` untouched, per the
/// spec's credential-indirection rule.
pub fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let (literal, after_marker) = rest.split_at(start);
        out.push_str(literal);
        let after_marker = &after_marker[2..];
        match after_marker.find('}') {
            Some(end) => {
                let var_name = &after_marker[..end];
                match std::env::var(var_name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(&format!("${{{var_name}}}")),
                }
                rest = &after_marker[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after_marker;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Uniform async fetch-and-lifecycle contract over a query string.
///
/// Implementations are polymorphic over the capability set `{fetch, connect,
/// close, health_check}`; the core only ever calls `fetch` while
/// `enabled=true`.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Issue the backend-specific query, returning a flat metric-name to
    /// value mapping. Errors are transport, auth, or query failures.
    async fn fetch(&self, query: &str) -> anyhow::Result<HashMap<String, Value>>;

    /// Idempotent connection establishment. No-op for stateless backends.
    async fn connect(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Idempotent teardown.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Never raises; returns `false` on any failure.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Per-source configuration recognized by every backend, per spec §4.1.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CommonDataSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_interval() -> u64 {
    60
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

/// Runtime state the executor and pipeline track alongside a live
/// `DataSource` instance: enablement, error accounting, and last-fetch time.
pub struct DataSourceHandle {
    pub name: String,
    pub source: Box<dyn DataSource>,
    pub enabled: std::sync::atomic::AtomicBool,
    pub error_count: std::sync::atomic::AtomicU32,
    pub max_errors: u32,
    pub connection_timeout_secs: u64,
    pub last_fetch_time: tokio::sync::RwLock<Option<DateTime<Utc>>>,
}

impl DataSourceHandle {
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn DataSource>,
        enabled: bool,
        max_errors: u32,
        connection_timeout_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            enabled: std::sync::atomic::AtomicBool::new(enabled),
            error_count: std::sync::atomic::AtomicU32::new(0),
            max_errors,
            connection_timeout_secs,
            last_fetch_time: tokio::sync::RwLock::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Record the timestamp of a successful fetch, for `Scanner`'s
    /// `get_metrics_by_source`/health introspection.
    pub async fn record_success(&self, at: DateTime<Utc>) {
        *self.last_fetch_time.write().await = Some(at);
    }

    pub async fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        *self.last_fetch_time.read().await
    }

    /// Record a fetch failure; disable the source once `max_errors` is
    /// reached. Returns whether this failure tripped the auto-disable.
    pub fn record_failure(&self) -> bool {
        let count = self
            .error_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if count >= self.max_errors {
            self.enabled
                .store(false, std::sync::atomic::Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub async fn fetch_with_timeout(&self, query: &str) -> anyhow::Result<HashMap<String, Value>> {
        let timeout = std::time::Duration::from_secs(self.connection_timeout_secs);
        match tokio::time::timeout(timeout, self.source.fetch(query)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "datasource '{}' fetch timed out after {}s",
                self.name,
                self.connection_timeout_secs
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_variable() {
        std::env::set_var("PYSENTINEL_TEST_VAR", "resolved");
        assert_eq!(expand_env_vars("prefix-${PYSENTINEL_TEST_VAR}-suffix"), "prefix-resolved-suffix");
    }

    #[test]
    fn leaves_unknown_variable_untouched() {
        std::env::remove_var("PYSENTINEL_DEFINITELY_UNSET");
        assert_eq!(
            expand_env_vars("x-${PYSENTINEL_DEFINITELY_UNSET}-y"),
            "x-${PYSENTINEL_DEFINITELY_UNSET}-y"
        );
    }

    struct EmptySource;

    #[async_trait]
    impl DataSource for EmptySource {
        async fn fetch(&self, _query: &str) -> anyhow::Result<HashMap<String, Value>> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn last_fetch_time_starts_unset_and_records_on_success() {
        let handle = DataSourceHandle::new("src1", Box::new(EmptySource), true, 5, 30);
        assert!(handle.last_fetch_time().await.is_none());

        let at = Utc::now();
        handle.record_success(at).await;
        assert_eq!(handle.last_fetch_time().await, Some(at));
    }
}
