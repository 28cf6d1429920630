//! Channel topic publishing.
//!
//! [`Publisher`] is the seam the session controller publishes through;
//! [`DiscordPublisher`] implements it against the Discord REST API with a
//! single `PATCH /channels/{id}` per call and no retries.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Serialize;

use crate::config::DEFAULT_DISCORD_API_BASE;
use crate::error::PublishError;

/// Publishes a status line as a channel topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel_id: &str, topic: &str) -> Result<(), PublishError>;
}

#[derive(Serialize)]
struct TopicUpdate<'a> {
    topic: &'a str,
}

/// Discord bot client that edits channel topics.
#[derive(Clone)]
pub struct DiscordPublisher {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl DiscordPublisher {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_DISCORD_API_BASE, bot_token)
    }

    /// Create a publisher against a different API root (for testing).
    pub fn with_base_url(api_base: &str, bot_token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self::with_client(client, api_base, bot_token)
    }

    /// Create a publisher around an existing HTTP client.
    pub fn with_client(client: Client, api_base: &str, bot_token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    fn channel_url(&self, channel_id: &str) -> String {
        format!("{}/channels/{}", self.api_base, channel_id)
    }
}

#[async_trait]
impl Publisher for DiscordPublisher {
    async fn publish(&self, channel_id: &str, topic: &str) -> Result<(), PublishError> {
        let url = self.channel_url(channel_id);
        debug!("PATCH {} topic={:?}", url, topic);

        let response = self
            .client
            .patch(&url)
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.bot_token))
            .json(&TopicUpdate { topic })
            .send()
            .await
            .map_err(|e| PublishError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
