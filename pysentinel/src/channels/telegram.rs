//! Telegram channel: posts a message via the Bot API's `sendMessage` method.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AlertChannel;
use crate::datasource::expand_env_vars;
use crate::violation::Violation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    10
}

pub struct TelegramChannel {
    name: String,
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(name: impl Into<String>, config: &TelegramConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            name: name.into(),
            client,
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    async fn send(&self, violation: &Violation) -> bool {
        let token = expand_env_vars(&self.bot_token);
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let text = format!(
            "\u{1F6A8} {} [{}]\n{}",
            violation.alert_name, violation.severity, violation.message
        );
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(channel = %self.name, status = %response.status(), "telegram delivery rejected");
                false
            }
            Err(error) => {
                tracing::warn!(channel = %self.name, %error, "telegram delivery failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
