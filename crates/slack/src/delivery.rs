//! Direct-message delivery over the Slack Web API.

use std::sync::Arc;

use async_trait::async_trait;
use mpa_core::domain::{NotificationHandle, UserId};
use mpa_core::notify::{BotIdentity, DeliveryError, NotificationDelivery, ParticipantView};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::blocks::{participant_message, Block};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack api request failed: {0}")]
    Transport(String),
    #[error("slack api returned http {0}")]
    Status(u16),
    #[error("slack api error `{0}`")]
    Api(String),
    #[error("failed to decode slack api response: {0}")]
    Decode(String),
}

impl From<SlackApiError> for DeliveryError {
    fn from(value: SlackApiError) -> Self {
        match value {
            SlackApiError::Api(code) => Self::Rejected(code),
            other => Self::Transport(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostMessageRequest<'a> {
    pub channel: &'a str,
    pub text: &'a str,
    pub blocks: &'a [Block],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpdateMessageRequest<'a> {
    pub channel: &'a str,
    pub ts: &'a str,
    pub text: &'a str,
    pub blocks: &'a [Block],
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

/// The two `chat.*` calls the bot needs.
#[async_trait]
pub trait SlackChatClient: Send + Sync {
    async fn post_message(
        &self,
        request: PostMessageRequest<'_>,
    ) -> Result<PostedMessage, SlackApiError>;

    async fn update_message(&self, request: UpdateMessageRequest<'_>) -> Result<(), SlackApiError>;
}

pub struct SlackWebApiClient {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

impl SlackWebApiClient {
    pub fn new(base_url: impl Into<String>, bot_token: SecretString) -> Self {
        Self::with_client(Client::new(), base_url, bot_token)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, bot_token: SecretString) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, bot_token }
    }

    async fn call<T: Serialize + Sync>(
        &self,
        method: &str,
        body: &T,
    ) -> Result<ApiResponse, SlackApiError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| SlackApiError::Transport(error.to_string()))?;

        if !response.status().is_success() {
            return Err(SlackApiError::Status(response.status().as_u16()));
        }

        let payload: ApiResponse =
            response.json().await.map_err(|error| SlackApiError::Decode(error.to_string()))?;
        if !payload.ok {
            return Err(SlackApiError::Api(
                payload.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        Ok(payload)
    }
}

#[async_trait]
impl SlackChatClient for SlackWebApiClient {
    async fn post_message(
        &self,
        request: PostMessageRequest<'_>,
    ) -> Result<PostedMessage, SlackApiError> {
        let payload = self.call("chat.postMessage", &request).await?;
        match (payload.channel, payload.ts) {
            (Some(channel), Some(ts)) => Ok(PostedMessage { channel, ts }),
            _ => Err(SlackApiError::Decode("chat.postMessage returned no channel/ts".to_string())),
        }
    }

    async fn update_message(&self, request: UpdateMessageRequest<'_>) -> Result<(), SlackApiError> {
        self.call("chat.update", &request).await.map(|_| ())
    }
}

/// [`NotificationDelivery`] that posts participant views as Block Kit direct messages. Posting to
/// a user id opens the bot's DM with that user; the returned DM channel and timestamp form the
/// handle used for later updates.
#[derive(Clone)]
pub struct SlackNotificationDelivery {
    client: Arc<dyn SlackChatClient>,
}

impl SlackNotificationDelivery {
    pub fn new(client: Arc<dyn SlackChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationDelivery for SlackNotificationDelivery {
    async fn send_direct_message(
        &self,
        bot: &BotIdentity,
        to: &UserId,
        view: &ParticipantView,
    ) -> Result<NotificationHandle, DeliveryError> {
        let message = participant_message(view);
        let request = PostMessageRequest {
            channel: &to.0,
            text: &message.fallback_text,
            blocks: &message.blocks,
            username: Some(bot.display_name.as_str()).filter(|name| !name.is_empty()),
        };

        match self.client.post_message(request).await {
            Ok(posted) => {
                debug!(
                    event_name = "mpa.slack.dm_posted",
                    user_id = %to,
                    channel = %posted.channel,
                    ts = %posted.ts,
                    "direct message posted"
                );
                Ok(NotificationHandle::new(posted.channel, posted.ts))
            }
            Err(error) => {
                warn!(
                    event_name = "mpa.slack.dm_failed",
                    user_id = %to,
                    error = %error,
                    "direct message could not be posted"
                );
                Err(error.into())
            }
        }
    }

    async fn update_message(
        &self,
        handle: &NotificationHandle,
        view: &ParticipantView,
    ) -> Result<(), DeliveryError> {
        let message = participant_message(view);
        let request = UpdateMessageRequest {
            channel: &handle.channel,
            ts: &handle.message_ref,
            text: &message.fallback_text,
            blocks: &message.blocks,
        };
        self.client.update_message(request).await.map_err(DeliveryError::from)
    }
}
