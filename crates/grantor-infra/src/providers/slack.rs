//! Slack notifier: `chat.postMessage` with Block Kit payloads.

use std::time::Duration;

use async_trait::async_trait;
use grantor_core::provider::{Notifier, ProviderClient};
use grantor_types::error::Problem;
use grantor_types::provider::NotificationRequest;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

const DEFAULT_API_URL: &str = "https://slack.com/api";

/// Provider `config` block for a slack provider.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub token: String,
    #[serde(default)]
    pub api_url: Option<String>,
}

pub struct SlackProvider {
    client: reqwest::Client,
    token: SecretString,
    api_url: String,
}

impl SlackProvider {
    pub fn new(config: SlackConfig) -> Result<Self, Problem> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Problem::configuration(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            token: SecretString::from(config.token),
            api_url: config
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        })
    }

    pub fn from_value(config: &serde_json::Value) -> Result<Self, Problem> {
        let parsed: SlackConfig = serde_json::from_value(config.clone())
            .map_err(|e| Problem::configuration(format!("invalid slack config: {e}")))?;
        Self::new(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl ProviderClient for SlackProvider {
    fn notifier(&self) -> Option<&dyn Notifier> {
        Some(self)
    }
}

#[async_trait]
impl Notifier for SlackProvider {
    async fn send_notification(&self, payload: &NotificationRequest) -> Result<(), Problem> {
        let NotificationRequest::Slack { to, text, blocks } = payload else {
            return Err(Problem::configuration(
                "slack provider only delivers slack payloads",
            ));
        };

        let mut body = json!({
            "channel": to,
            "text": text,
        });
        if !blocks.is_empty() {
            body["blocks"] = json!(blocks);
        }

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.api_url))
            .bearer_auth(self.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Problem::communication(format!("slack request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Problem::communication(format!(
                "slack returned status {}",
                response.status().as_u16()
            )));
        }

        let parsed: SlackResponse = response
            .json()
            .await
            .map_err(|e| Problem::communication(format!("invalid slack response: {e}")))?;
        if !parsed.ok {
            return Err(Problem::communication(format!(
                "slack rejected the message: {}",
                parsed.error.unwrap_or_else(|| "unknown error".into())
            )));
        }

        tracing::info!(channel = %to, "slack notification delivered");
        Ok(())
    }
}
