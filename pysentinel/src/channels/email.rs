//! Email channel: sends a violation notification over SMTP via `lettre`.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};

use super::AlertChannel;
use crate::datasource::expand_env_vars;
use crate::violation::Violation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct EmailChannel {
    name: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    to_addresses: Vec<String>,
}

impl EmailChannel {
    pub fn new(name: impl Into<String>, config: &EmailConfig) -> anyhow::Result<Self> {
        let username = expand_env_vars(&config.username);
        let password = expand_env_vars(&config.password);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(username, password))
            .build();
        Ok(Self {
            name: name.into(),
            transport,
            from_address: config.from_address.clone(),
            to_addresses: config.to_addresses.clone(),
        })
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    async fn send(&self, violation: &Violation) -> bool {
        let subject = format!("[{}] {}", violation.severity, violation.alert_name);
        for to in &self.to_addresses {
            let message = match Message::builder()
                .from(match self.from_address.parse() {
                    Ok(addr) => addr,
                    Err(error) => {
                        tracing::error!(channel = %self.name, %error, "invalid from address");
                        return false;
                    }
                })
                .to(match to.parse() {
                    Ok(addr) => addr,
                    Err(error) => {
                        tracing::warn!(channel = %self.name, %error, to, "skipping invalid recipient");
                        continue;
                    }
                })
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(violation.message.clone())
            {
                Ok(message) => message,
                Err(error) => {
                    tracing::error!(channel = %self.name, %error, "failed to build email");
                    return false;
                }
            };

            if let Err(error) = self.transport.send(message).await {
                tracing::warn!(channel = %self.name, %error, to, "email delivery failed");
                return false;
            }
        }
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}
