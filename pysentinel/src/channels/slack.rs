//! Slack channel: posts a formatted message to an Incoming Webhook URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AlertChannel;
use crate::datasource::expand_env_vars;
use crate::violation::Violation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    10
}

pub struct SlackChannel {
    name: String,
    client: reqwest::Client,
    webhook_url: String,
    channel: Option<String>,
}

impl SlackChannel {
    pub fn new(name: impl Into<String>, config: &SlackConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            name: name.into(),
            client,
            webhook_url: config.webhook_url.clone(),
            channel: config.channel.clone(),
        })
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    async fn send(&self, violation: &Violation) -> bool {
        let mut payload = json!({
            "text": format!(
                ":rotating_light: *{}* [{}]\n{}",
                violation.alert_name, violation.severity, violation.message
            ),
        });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }

        let url = expand_env_vars(&self.webhook_url);
        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(channel = %self.name, status = %response.status(), "slack delivery rejected");
                false
            }
            Err(error) => {
                tracing::warn!(channel = %self.name, %error, "slack delivery failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
