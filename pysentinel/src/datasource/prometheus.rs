//! Prometheus datasource: the query is a PromQL instant-query expression,
//! evaluated against `<base_url>/api/v1/query`. Each series in the result
//! vector is exposed as a metric keyed by its `__name__` label (or `value`
//! for a bare scalar result).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{expand_env_vars, DataSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

pub struct PrometheusDataSource {
    client: reqwest::Client,
    base_url: String,
}

impl PrometheusDataSource {
    pub fn new(config: &PrometheusConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl DataSource for PrometheusDataSource {
    async fn fetch(&self, query: &str) -> anyhow::Result<HashMap<String, Value>> {
        let url = format!(
            "{}/api/v1/query",
            expand_env_vars(&self.base_url).trim_end_matches('/')
        );
        let response: Value = self
            .client
            .get(&url)
            .query(&[("query", query)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.get("status").and_then(Value::as_str) != Some("success") {
            anyhow::bail!("prometheus query failed: {response}");
        }

        Ok(extract_vector(&response))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/-/healthy", self.base_url.trim_end_matches('/'));
        self.client
            .get(&url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_vector(response: &Value) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    let Some(result) = response.pointer("/data/result").and_then(Value::as_array) else {
        return map;
    };
    for (idx, series) in result.iter().enumerate() {
        let name = series
            .pointer("/metric/__name__")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("series_{idx}"));
        if let Some(value) = series.pointer("/value/1").and_then(Value::as_str) {
            if let Ok(parsed) = value.parse::<f64>() {
                if let Some(n) = serde_json::Number::from_f64(parsed) {
                    map.insert(name, Value::Number(n));
                }
            }
        }
    }
    map
}
