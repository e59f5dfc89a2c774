//! Configuration schema, loading, and the secret-redaction used before
//! logging a loaded config.
//!
//! Grounded on `dwctl::config`'s `figment` layering (`Yaml` + `Env`
//! providers, `deny_unknown_fields` on the top-level struct) and the
//! original `pysentinel.config.validator.sanitize_config`, which redacts any
//! field whose name contains password/token/secret/key/api_key before the
//! config is ever logged.

use std::collections::HashMap;
use std::sync::Arc;

use figment::providers::{Env, Format, Json, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channels::{
    email::{EmailChannel, EmailConfig},
    slack::{SlackChannel, SlackConfig},
    telegram::{TelegramChannel, TelegramConfig},
    webhook::{WebhookChannel, WebhookConfig},
    AlertChannel,
};
use crate::datasource::{
    elasticsearch::{ElasticsearchConfig, ElasticsearchDataSource},
    http::{HttpConfig, HttpDataSource},
    postgresql::{PostgresConfig, PostgresDataSource},
    prometheus::{PrometheusConfig, PrometheusDataSource},
    redis::{RedisConfig, RedisDataSource},
    DataSourceHandle,
};
use crate::errors::Error;
use crate::model::{AlertDefinition, Severity, Threshold};

const ENV_PREFIX: &str = "PYSENTINEL_";
const REDIS_DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub datasources: HashMap<String, DataSourceConfig>,
    #[serde(default)]
    pub alert_channels: HashMap<String, AlertChannelConfig>,
    #[serde(default)]
    pub alert_groups: HashMap<String, AlertGroupEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_cooldown_minutes")]
    pub alert_cooldown_minutes: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            alert_cooldown_minutes: default_cooldown_minutes(),
            log_level: default_log_level(),
        }
    }
}

fn default_cooldown_minutes() -> u32 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSourceConfig {
    Postgresql(PostgresEntry),
    Http(HttpEntry),
    Redis(RedisEntry),
    Prometheus(PrometheusEntry),
    Elasticsearch(ElasticsearchEntry),
}

macro_rules! datasource_entry {
    ($name:ident, $backend:ty) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            #[serde(default)]
            pub enabled: bool,
            #[serde(default = "default_interval")]
            pub interval: u64,
            #[serde(default = "default_max_retries")]
            pub max_retries: u32,
            #[serde(flatten)]
            pub backend: $backend,
        }
    };
}

datasource_entry!(PostgresEntry, PostgresConfig);
datasource_entry!(HttpEntry, HttpConfig);
datasource_entry!(RedisEntry, RedisConfig);
datasource_entry!(PrometheusEntry, PrometheusConfig);
datasource_entry!(ElasticsearchEntry, ElasticsearchConfig);

fn default_interval() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertChannelConfig {
    Email(EmailConfig),
    Slack(SlackConfig),
    Webhook(WebhookConfig),
    Telegram(TelegramConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroupEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub alerts: Vec<RawAlertEntry>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAlertEntry {
    pub name: String,
    #[serde(rename = "metrics")]
    pub metric_key: String,
    pub query: String,
    #[serde(rename = "datasource")]
    pub datasource_name: String,
    #[serde(default)]
    pub threshold: Threshold,
    pub severity: Severity,
    #[serde(default, rename = "interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub alert_channels: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RawConfig {
    /// Load a YAML or JSON config file (dispatched by extension, matching
    /// the source's `config/loader.py`), then layer environment overrides of
    /// the form `PYSENTINEL_GLOBAL__LOG_LEVEL=debug` on top.
    pub fn load(path: &str) -> crate::errors::Result<Self> {
        let is_json = path.ends_with(".json");
        let figment = if is_json {
            Figment::new().merge(Json::file(path))
        } else {
            Figment::new().merge(Yaml::file(path))
        }
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to load config from {path}: {e}")))
    }

    pub fn alert_definitions(&self) -> Vec<AlertDefinition> {
        let mut alerts = Vec::new();
        for (group_name, group) in &self.alert_groups {
            for raw in &group.alerts {
                alerts.push(AlertDefinition {
                    name: raw.name.clone(),
                    metric_key: raw.metric_key.clone(),
                    query: raw.query.clone(),
                    datasource_name: raw.datasource_name.clone(),
                    threshold: raw.threshold,
                    severity: raw.severity,
                    interval_seconds: raw.interval_seconds,
                    alert_channels: raw.alert_channels.clone(),
                    description: raw.description.clone(),
                    alert_group: group_name.clone(),
                    enabled: group.enabled && raw.enabled,
                });
            }
        }
        alerts
    }

    pub fn build_datasources(&self) -> crate::errors::Result<HashMap<String, Arc<DataSourceHandle>>> {
        let mut map = HashMap::new();
        for (name, entry) in &self.datasources {
            let (source, enabled, interval_timeout, max_retries): (
                Box<dyn crate::datasource::DataSource>,
                bool,
                u64,
                u32,
            ) = match entry {
                DataSourceConfig::Postgresql(e) => (
                    Box::new(PostgresDataSource::new(&e.backend)),
                    e.enabled,
                    e.backend.timeout,
                    e.max_retries,
                ),
                DataSourceConfig::Http(e) => (
                    Box::new(HttpDataSource::new(&e.backend).map_err(|err| {
                        Error::Config(format!("datasource '{name}' failed to build: {err}"))
                    })?),
                    e.enabled,
                    e.backend.timeout,
                    e.max_retries,
                ),
                DataSourceConfig::Redis(e) => (
                    Box::new(RedisDataSource::new(&e.backend).map_err(|err| {
                        Error::Config(format!("datasource '{name}' failed to build: {err}"))
                    })?),
                    e.enabled,
                    REDIS_DEFAULT_TIMEOUT_SECS,
                    e.max_retries,
                ),
                DataSourceConfig::Prometheus(e) => (
                    Box::new(PrometheusDataSource::new(&e.backend).map_err(|err| {
                        Error::Config(format!("datasource '{name}' failed to build: {err}"))
                    })?),
                    e.enabled,
                    e.backend.timeout,
                    e.max_retries,
                ),
                DataSourceConfig::Elasticsearch(e) => (
                    Box::new(ElasticsearchDataSource::new(&e.backend).map_err(|err| {
                        Error::Config(format!("datasource '{name}' failed to build: {err}"))
                    })?),
                    e.enabled,
                    e.backend.timeout,
                    e.max_retries,
                ),
            };
            map.insert(
                name.clone(),
                Arc::new(DataSourceHandle::new(name, source, enabled, max_retries, interval_timeout)),
            );
        }
        Ok(map)
    }

    pub fn build_channels(&self) -> crate::errors::Result<HashMap<String, Arc<dyn AlertChannel>>> {
        let mut map: HashMap<String, Arc<dyn AlertChannel>> = HashMap::new();
        for (name, entry) in &self.alert_channels {
            let channel: Arc<dyn AlertChannel> = match entry {
                AlertChannelConfig::Email(c) => Arc::new(
                    EmailChannel::new(name, c)
                        .map_err(|err| Error::Config(format!("channel '{name}' failed to build: {err}")))?,
                ),
                AlertChannelConfig::Slack(c) => Arc::new(
                    SlackChannel::new(name, c)
                        .map_err(|err| Error::Config(format!("channel '{name}' failed to build: {err}")))?,
                ),
                AlertChannelConfig::Webhook(c) => Arc::new(
                    WebhookChannel::new(name, c)
                        .map_err(|err| Error::Config(format!("channel '{name}' failed to build: {err}")))?,
                ),
                AlertChannelConfig::Telegram(c) => Arc::new(
                    TelegramChannel::new(name, c)
                        .map_err(|err| Error::Config(format!("channel '{name}' failed to build: {err}")))?,
                ),
            };
            map.insert(name.clone(), channel);
        }
        Ok(map)
    }

    /// A JSON projection of this config with any field whose name suggests a
    /// credential (password/token/secret/key/api_key, case-insensitive)
    /// replaced by `"***"`, safe to pass to `tracing` at startup.
    pub fn redacted(&self) -> Value {
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        redact(value)
    }
}

fn redact(value: Value) -> Value {
    const SENSITIVE_MARKERS: [&str; 5] = ["password", "token", "secret", "key", "api_key"];
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let lower = k.to_lowercase();
                    if SENSITIVE_MARKERS.iter().any(|m| lower.contains(m)) {
                        (k, Value::String("***".to_string()))
                    } else {
                        (k, redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_sensitive_keys_at_any_depth() {
        let value = json!({
            "datasources": {
                "db1": {"connection_string": "postgres://user:pw@host/db", "password": "hunter2"}
            },
            "alert_channels": {
                "email1": {"api_key": "abc123", "from_address": "ops@example.com"}
            }
        });
        let redacted = redact(value);
        assert_eq!(redacted["datasources"]["db1"]["password"], json!("***"));
        assert_eq!(redacted["alert_channels"]["email1"]["api_key"], json!("***"));
        assert_eq!(redacted["alert_channels"]["email1"]["from_address"], json!("ops@example.com"));
    }

    #[test]
    fn alert_definitions_inherit_group_enablement() {
        let mut groups = HashMap::new();
        groups.insert(
            "infra".to_string(),
            AlertGroupEntry {
                enabled: false,
                alerts: vec![RawAlertEntry {
                    name: "cpu_high".to_string(),
                    metric_key: "cpu".to_string(),
                    query: "q".to_string(),
                    datasource_name: "db1".to_string(),
                    threshold: Threshold::Max(90.0),
                    severity: Severity::Warning,
                    interval_seconds: 60,
                    alert_channels: vec![],
                    description: String::new(),
                    enabled: true,
                }],
            },
        );
        let config = RawConfig {
            global: GlobalConfig::default(),
            datasources: HashMap::new(),
            alert_channels: HashMap::new(),
            alert_groups: groups,
        };
        let alerts = config.alert_definitions();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].enabled, "a disabled group must disable its alerts");
        assert_eq!(alerts[0].alert_group, "infra");
    }
}
