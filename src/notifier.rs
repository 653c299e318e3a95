//! Where bot messages go.
//!
//! The engine only knows the [`Notifier`] trait. The binary picks a sink at
//! startup: [`WebhookNotifier`] for a chat server's incoming webhook, or
//! [`ConsoleNotifier`] when no webhook is configured.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

/// Posts a text message to a channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, channel_id: &str, text: &str) -> Result<(), NotifyError>;
}

/// Name the bot posts under.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BotIdentity {
    pub username: String,
    pub display_name: String,
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            username: "feedbot".to_string(),
            display_name: "Feed Bot".to_string(),
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    channel: &'a str,
    username: &'a str,
    text: &'a str,
}

/// Posts through an incoming webhook (Mattermost/Slack-compatible JSON body).
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: SecretString,
    identity: BotIdentity,
}

impl WebhookNotifier {
    pub fn new(url: SecretString, identity: BotIdentity) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url,
            identity,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn post(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(&WebhookPayload {
            channel: channel_id,
            username: &self.identity.username,
            text,
        })?;

        let response = self
            .client
            .post(self.url.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::HttpStatus(response.status()));
        }
        Ok(())
    }
}

/// Prints messages to stdout, one block per post.
pub struct ConsoleNotifier {
    identity: BotIdentity,
}

impl ConsoleNotifier {
    pub fn new(identity: BotIdentity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn post(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        writeln!(
            stdout,
            "[{}] {}: {}",
            channel_id, self.identity.display_name, text
        )?;
        stdout.flush()?;
        Ok(())
    }
}
