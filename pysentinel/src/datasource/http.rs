//! Stateless HTTP datasource: the query string is the URL to GET, and a JSON
//! object response is flattened into the metric map.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{expand_env_vars, DataSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

pub struct HttpDataSource {
    client: reqwest::Client,
    headers: HashMap<String, String>,
}

impl HttpDataSource {
    pub fn new(config: &HttpConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            headers: config.headers.clone(),
        })
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch(&self, query: &str) -> anyhow::Result<HashMap<String, Value>> {
        let url = expand_env_vars(query);
        let mut request = self.client.get(&url);
        for (key, value) in &self.headers {
            request = request.header(key, expand_env_vars(value));
        }
        let response = request.send().await?.error_for_status()?;
        let body: Value = response.json().await?;
        Ok(flatten(body))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Flatten a top-level JSON object into a metric map. Non-object responses
/// are exposed under a single `value` key so scalar-returning endpoints still
/// work with `metric_key: value`.
fn flatten(body: Value) -> HashMap<String, Value> {
    match body {
        Value::Object(map) => map.into_iter().collect(),
        other => {
            let mut map = HashMap::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
