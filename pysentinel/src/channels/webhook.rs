//! Generic webhook channel: POSTs the violation as JSON to a configured URL,
//! retrying transient failures with a fixed backoff.
//!
//! Grounded on `dwctl::webhooks::dispatcher::WebhookDispatcher::tick`'s
//! send-then-record-result loop.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::AlertChannel;
use crate::violation::Violation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_retry_count() -> u32 {
    1
}
fn default_timeout() -> u64 {
    10
}

pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    retry_count: u32,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, config: &WebhookConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            name: name.into(),
            client,
            url: config.url.clone(),
            headers: config.headers.clone(),
            retry_count: config.retry_count,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn send(&self, violation: &Violation) -> bool {
        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            let mut request = self.client.post(&self.url).json(violation);
            for (key, value) in &self.headers {
                request = request.header(key, value);
            }
            match request.send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    tracing::warn!(
                        channel = %self.name,
                        status = %response.status(),
                        attempt,
                        "webhook delivery rejected"
                    );
                }
                Err(error) => {
                    tracing::warn!(channel = %self.name, %error, attempt, "webhook delivery failed");
                }
            }
        }
        false
    }

    fn name(&self) -> &str {
        &self.name
    }
}
