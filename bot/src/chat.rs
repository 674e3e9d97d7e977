//! Chat-service posting adapter
//!
//! The orchestrator and command surface post rendered graphs through the
//! [`ChatPoster`] trait; the REST implementation below talks to the chat
//! service's HTTP API. Command dispatch itself is bound elsewhere — this
//! module only covers uploads, direct messages and artifact-message
//! cleanup.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::BotError;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Default REST endpoint of the chat service.
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Maximum attachments per message.
pub const MAX_FILES_PER_MESSAGE: usize = 10;

/// Posting operations the bot needs from the chat service.
#[async_trait]
pub trait ChatPoster: Send + Sync {
    /// Upload files to a channel in a single message.
    async fn post_files(&self, channel_id: u64, content: &str, files: &[PathBuf]) -> Result<()>;

    /// Upload files to a user's direct messages.
    async fn post_files_to_dm(&self, user_id: u64, content: &str, files: &[PathBuf]) -> Result<()>;

    /// Delete the bot's own artifact messages within a bounded lookback of
    /// recent channel messages. Returns the number of deleted messages.
    async fn delete_recent_bot_messages(&self, channel_id: u64, lookback: usize) -> Result<usize>;
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    author: ApiUser,
    #[serde(default)]
    attachments: Vec<serde_json::Value>,
}

/// REST implementation of [`ChatPoster`].
pub struct RestChatClient {
    http: reqwest::Client,
    token: String,
    api_base: String,
    bot_user_id: OnceCell<u64>,
}

impl RestChatClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: &str, api_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create chat HTTP client")?;
        Ok(Self {
            http,
            token: token.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_user_id: OnceCell::new(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// The bot's own user id, fetched once and cached.
    async fn bot_user_id(&self) -> Result<u64> {
        let id = self
            .bot_user_id
            .get_or_try_init(|| async {
                let user: ApiUser = self
                    .get(&format!("{}/users/@me", self.api_base))
                    .await
                    .context("Failed to fetch bot identity")?;
                user.id
                    .parse::<u64>()
                    .context("Chat service returned a non-numeric user id")
            })
            .await?;
        Ok(*id)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| anyhow!(BotError::TransientService(format!("Chat request failed: {e}"))))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        response
            .json()
            .await
            .map_err(|e| {
                anyhow!(BotError::TransientService(format!(
                    "Chat response was not valid JSON: {e}"
                )))
            })
    }

    async fn send_files(&self, channel_id: u64, content: &str, files: &[PathBuf]) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);

        let mut form = reqwest::multipart::Form::new()
            .text("payload_json", json!({ "content": content }).to_string());
        for (index, path) in files.iter().enumerate() {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read attachment {}", path.display()))?;
            let filename = file_name(path);
            form = form.part(
                format!("files[{index}]"),
                reqwest::multipart::Part::bytes(bytes).file_name(filename),
            );
        }

        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow!(BotError::TransientService(format!("Chat upload failed: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        info!(
            "Uploaded {} files to channel {}",
            files.len(),
            channel_id
        );
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("graph.png")
        .to_string()
}

fn classify_status(status: reqwest::StatusCode) -> anyhow::Error {
    let message = format!("chat service returned HTTP {status}");
    match status {
        reqwest::StatusCode::UNAUTHORIZED => anyhow!(BotError::PermanentService(message)),
        reqwest::StatusCode::FORBIDDEN => anyhow!(BotError::Permission(message)),
        reqwest::StatusCode::TOO_MANY_REQUESTS => anyhow!(BotError::RateLimited(message)),
        status if status.is_server_error() => anyhow!(BotError::TransientService(message)),
        _ => anyhow!(BotError::TransientService(message)),
    }
}

#[async_trait]
impl ChatPoster for RestChatClient {
    async fn post_files(&self, channel_id: u64, content: &str, files: &[PathBuf]) -> Result<()> {
        self.send_files(channel_id, content, files).await
    }

    async fn post_files_to_dm(&self, user_id: u64, content: &str, files: &[PathBuf]) -> Result<()> {
        let url = format!("{}/users/@me/channels", self.api_base);
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&json!({ "recipient_id": user_id.to_string() }))
            .send()
            .await
            .map_err(|e| {
                anyhow!(BotError::TransientService(format!(
                    "Failed to open direct message channel: {e}"
                )))
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(anyhow!(BotError::Permission(
                "Direct messages are closed for this user".to_string()
            )));
        }
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let channel: ApiChannel = response
            .json()
            .await
            .map_err(|e| {
                anyhow!(BotError::TransientService(format!(
                    "Direct message channel response was not valid JSON: {e}"
                )))
            })?;
        let channel_id: u64 = channel
            .id
            .parse()
            .context("Chat service returned a non-numeric channel id")?;

        self.send_files(channel_id, content, files).await
    }

    async fn delete_recent_bot_messages(&self, channel_id: u64, lookback: usize) -> Result<usize> {
        let me = self.bot_user_id().await?;
        let limit = lookback.clamp(1, 100);
        let url = format!(
            "{}/channels/{}/messages?limit={}",
            self.api_base, channel_id, limit
        );
        let messages: Vec<ApiMessage> = self.get(&url).await?;

        let mut deleted = 0;
        for message in messages {
            let author_id: u64 = message.author.id.parse().unwrap_or(0);
            if author_id != me || message.attachments.is_empty() {
                continue;
            }

            let delete_url = format!(
                "{}/channels/{}/messages/{}",
                self.api_base, channel_id, message.id
            );
            let response = self
                .http
                .delete(&delete_url)
                .header("Authorization", self.auth_header())
                .send()
                .await
                .map_err(|e| {
                    anyhow!(BotError::TransientService(format!(
                        "Failed to delete message: {e}"
                    )))
                })?;

            if response.status().is_success() {
                deleted += 1;
            } else {
                warn!(
                    "Failed to delete message {}: HTTP {}",
                    message.id,
                    response.status()
                );
            }
        }

        debug!(
            "Deleted {} previous artifact messages in channel {}",
            deleted, channel_id
        );
        Ok(deleted)
    }
}
