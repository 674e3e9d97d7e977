//! Media-analytics service client
//!
//! Thin HTTP adapter over the analytics service's JSON API. The rest of
//! the bot consumes the [`AnalyticsProvider`] trait so the orchestrator
//! and commands can be exercised against fakes in tests.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared::BotError;
use tracing::debug;

/// Media type of a recorded play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Movie,
    Tv,
    Music,
    Other,
}

// The service reports several synonyms per media class; anything
// unrecognised folds into Other rather than failing the whole history
// fetch.
impl<'de> serde::Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "movie" => MediaType::Movie,
            "tv" | "episode" | "show" => MediaType::Tv,
            "music" | "track" | "artist" => MediaType::Music,
            _ => MediaType::Other,
        })
    }
}

impl MediaType {
    pub fn label(self) -> &'static str {
        match self {
            MediaType::Movie => "Movies",
            MediaType::Tv => "TV",
            MediaType::Music => "Music",
            MediaType::Other => "Other",
        }
    }
}

/// A single play returned by the history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayRecord {
    /// Completion time of the play, as reported by the service
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub media_type: MediaType,
    pub platform: String,
    /// Play duration in seconds, when the service reports it
    #[serde(default)]
    pub duration: Option<u32>,
}

/// Aggregated plays for one calendar month.
#[derive(Debug, Clone, Deserialize)]
pub struct MonthlyPlays {
    /// Month in `YYYY-MM` form
    pub month: String,
    pub movies: u64,
    pub tv: u64,
}

/// Contract the orchestrator and command surface consume.
#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    /// Server-wide play history for the trailing window.
    async fn play_history(&self, days: u32) -> Result<Vec<PlayRecord>>;

    /// Play history restricted to one user.
    async fn user_play_history(&self, user_id: u64, days: u32) -> Result<Vec<PlayRecord>>;

    /// Resolve a user identifier (email or username) to the service's
    /// numeric user id.
    async fn lookup_user(&self, identifier: &str) -> Result<Option<u64>>;

    /// Monthly play counts for the trailing window.
    async fn plays_per_month(&self, months: u32) -> Result<Vec<MonthlyPlays>>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: EnvelopeBody<T>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeBody<T> {
    result: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    rows: Vec<PlayRecord>,
}

#[derive(Debug, Deserialize)]
struct UserLookupData {
    user_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MonthlyData {
    months: Vec<MonthlyPlays>,
}

/// HTTP implementation of [`AnalyticsProvider`].
pub struct HttpAnalyticsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpAnalyticsClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create analytics HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, cmd: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/api/v2", self.base_url);
        debug!("Analytics request: cmd={}", cmd);

        let response = self
            .http
            .get(&url)
            .query(&[("apikey", self.api_key.as_str()), ("cmd", cmd)])
            .query(params)
            .send()
            .await
            .map_err(|e| {
                anyhow!(BotError::TransientService(format!(
                    "Analytics request failed: {e}"
                )))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "analytics service"));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| {
                anyhow!(BotError::TransientService(format!(
                    "Analytics response was not valid JSON: {e}"
                )))
            })?;

        if envelope.response.result != "success" {
            let message = envelope
                .response
                .message
                .unwrap_or_else(|| "unknown analytics error".to_string());
            return Err(anyhow!(BotError::PermanentService(format!(
                "Analytics service rejected {cmd}: {message}"
            ))));
        }

        envelope
            .response
            .data
            .ok_or_else(|| {
                anyhow!(BotError::PermanentService(format!(
                    "Analytics response for {cmd} carried no data"
                )))
            })
    }
}

fn classify_status(status: reqwest::StatusCode, service: &str) -> anyhow::Error {
    let message = format!("{service} returned HTTP {status}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        anyhow!(BotError::RateLimited(message))
    } else if status.is_server_error() {
        anyhow!(BotError::TransientService(message))
    } else if matches!(
        status,
        reqwest::StatusCode::UNAUTHORIZED
            | reqwest::StatusCode::FORBIDDEN
            | reqwest::StatusCode::NOT_FOUND
            | reqwest::StatusCode::BAD_REQUEST
    ) {
        anyhow!(BotError::PermanentService(message))
    } else {
        anyhow!(BotError::TransientService(message))
    }
}

#[async_trait]
impl AnalyticsProvider for HttpAnalyticsClient {
    async fn play_history(&self, days: u32) -> Result<Vec<PlayRecord>> {
        let data: HistoryData = self
            .call("get_history", &[("days", days.to_string())])
            .await?;
        Ok(data.rows)
    }

    async fn user_play_history(&self, user_id: u64, days: u32) -> Result<Vec<PlayRecord>> {
        let data: HistoryData = self
            .call(
                "get_history",
                &[("days", days.to_string()), ("user_id", user_id.to_string())],
            )
            .await?;
        Ok(data.rows)
    }

    async fn lookup_user(&self, identifier: &str) -> Result<Option<u64>> {
        let data: UserLookupData = self
            .call("get_user_id", &[("identifier", identifier.to_string())])
            .await?;
        Ok(data.user_id)
    }

    async fn plays_per_month(&self, months: u32) -> Result<Vec<MonthlyPlays>> {
        let data: MonthlyData = self
            .call("get_plays_per_month", &[("months", months.to_string())])
            .await?;
        Ok(data.months)
    }
}
