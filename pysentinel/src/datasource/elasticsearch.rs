//! Elasticsearch datasource: the query is a JSON search body posted to
//! `<base_url>/<index>/_search`. Aggregation buckets under `aggregations` are
//! flattened into the metric map; `hits.total.value` is always exposed as
//! `hit_count` so simple match-count alerts need no aggregation at all.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{expand_env_vars, DataSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    pub base_url: String,
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    30
}

pub struct ElasticsearchDataSource {
    client: reqwest::Client,
    base_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

impl ElasticsearchDataSource {
    pub fn new(config: &ElasticsearchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            index: config.index.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl DataSource for ElasticsearchDataSource {
    async fn fetch(&self, query: &str) -> anyhow::Result<HashMap<String, Value>> {
        let body: Value = serde_json::from_str(query)
            .map_err(|e| anyhow::anyhow!("invalid elasticsearch query body: {e}"))?;

        let url = format!(
            "{}/{}/_search",
            expand_env_vars(&self.base_url).trim_end_matches('/'),
            self.index
        );
        let mut request = self.client.post(&url).json(&body);
        if let Some(user) = &self.username {
            request = request.basic_auth(
                expand_env_vars(user),
                self.password.as_deref().map(expand_env_vars),
            );
        }
        let response: Value = request.send().await?.error_for_status()?.json().await?;
        Ok(extract_metrics(&response))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/_cluster/health", self.base_url.trim_end_matches('/'));
        self.client
            .get(&url)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

fn extract_metrics(response: &Value) -> HashMap<String, Value> {
    let mut map = HashMap::new();

    if let Some(total) = response.pointer("/hits/total/value").and_then(Value::as_i64) {
        map.insert("hit_count".to_string(), Value::from(total));
    }

    if let Some(aggs) = response.get("aggregations").and_then(Value::as_object) {
        for (name, agg) in aggs {
            if let Some(value) = agg.get("value") {
                map.insert(name.clone(), value.clone());
            } else if let Some(buckets) = agg.get("buckets").and_then(Value::as_array) {
                for bucket in buckets {
                    if let Some(key) = bucket.get("key").and_then(|k| k.as_str().map(str::to_string).or_else(|| k.as_i64().map(|i| i.to_string()))) {
                        if let Some(count) = bucket.get("doc_count") {
                            map.insert(format!("{name}_{key}"), count.clone());
                        }
                    }
                }
            }
        }
    }

    map
}
