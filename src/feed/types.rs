use crate::error::AppError;
use crate::feed::connection::{ConnectionState, ReconnectPolicy};
use crate::feed::message::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub const DEFAULT_STARTUP_MODE: FeedStartupMode = FeedStartupMode::LiveFirst;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_BACKOFF: bool = false;
pub const DEFAULT_HISTORY_TIMEOUT_MS: u64 = 10_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 60_000;
pub const MIN_HISTORY_TIMEOUT_MS: u64 = 500;
pub const MAX_HISTORY_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FeedStartupMode {
    /// Open the channel while the historical fetch is in flight.
    LiveFirst,
    /// Await the historical fetch before opening the channel.
    HistoryFirst,
}

impl FeedStartupMode {
    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "live_first" => Ok(Self::LiveFirst),
            "history_first" => Ok(Self::HistoryFirst),
            other => Err(AppError::InvalidArgument(format!(
                "startupMode must be live_first or history_first, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum HistoryStatus {
    Pending,
    Loaded { count: usize },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatusSnapshot {
    pub state: ConnectionState,
    pub running: bool,
    pub endpoint: Option<String>,
    pub reconnect_attempt: u32,
    pub message_count: usize,
    pub discarded_frames: u64,
    pub history: HistoryStatus,
    pub last_message_at_ms: Option<i64>,
    pub reason: Option<String>,
}

impl FeedStatusSnapshot {
    pub fn idle(reason: Option<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            running: false,
            endpoint: None,
            reconnect_attempt: 0,
            message_count: 0,
            discarded_frames: 0,
            history: HistoryStatus::Pending,
            last_message_at_ms: None,
            reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartFeedArgs {
    pub history_url: Option<String>,
    pub channel_url: Option<String>,
    pub startup_mode: Option<FeedStartupMode>,
    pub reconnect_delay_ms: Option<u64>,
    pub reconnect_backoff: Option<bool>,
    pub max_reconnect_attempts: Option<u32>,
    pub history_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub history_url: Url,
    pub channel_url: Url,
    pub startup_mode: FeedStartupMode,
    pub reconnect: ReconnectPolicy,
    pub history_timeout_ms: u64,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, AppError> {
    env_value(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| AppError::InvalidArgument(format!("{key} has invalid value '{raw}'")))
        })
        .transpose()
}

fn parse_endpoint(field: &str, raw: Option<String>, schemes: &[&str]) -> Result<Url, AppError> {
    let raw = raw
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::InvalidArgument(format!("{field} is required")))?;

    let url = Url::parse(&raw).map_err(|error| {
        AppError::InvalidArgument(format!("{field} is not a valid URL: {error}"))
    })?;

    if !schemes.contains(&url.scheme()) {
        return Err(AppError::InvalidArgument(format!(
            "{field} must use one of {} (got '{}')",
            schemes.join(", "),
            url.scheme()
        )));
    }
    Ok(url)
}

impl StartFeedArgs {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            history_url: env_value("FEED_HISTORY_URL"),
            channel_url: env_value("FEED_CHANNEL_URL"),
            startup_mode: env_value("FEED_STARTUP_MODE")
                .map(|raw| FeedStartupMode::parse_str(&raw))
                .transpose()?,
            reconnect_delay_ms: parse_env("FEED_RECONNECT_DELAY_MS")?,
            reconnect_backoff: parse_env("FEED_RECONNECT_BACKOFF")?,
            max_reconnect_attempts: parse_env("FEED_MAX_RECONNECT_ATTEMPTS")?,
            history_timeout_ms: parse_env("FEED_HISTORY_TIMEOUT_MS")?,
        })
    }

    pub fn normalize(self) -> Result<FeedConfig, AppError> {
        let history_url = parse_endpoint("historyUrl", self.history_url, &["http", "https"])?;
        let channel_url = parse_endpoint("channelUrl", self.channel_url, &["ws", "wss"])?;

        let delay_ms = self.reconnect_delay_ms.unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        if delay_ms > MAX_RECONNECT_DELAY_MS {
            return Err(AppError::InvalidArgument(format!(
                "reconnectDelayMs must be at most {MAX_RECONNECT_DELAY_MS}"
            )));
        }

        if self.max_reconnect_attempts == Some(0) {
            return Err(AppError::InvalidArgument(
                "maxReconnectAttempts must be at least 1 when set".to_string(),
            ));
        }

        let history_timeout_ms = self.history_timeout_ms.unwrap_or(DEFAULT_HISTORY_TIMEOUT_MS);
        if !(MIN_HISTORY_TIMEOUT_MS..=MAX_HISTORY_TIMEOUT_MS).contains(&history_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "historyTimeoutMs must be between {MIN_HISTORY_TIMEOUT_MS} and {MAX_HISTORY_TIMEOUT_MS}"
            )));
        }

        Ok(FeedConfig {
            history_url,
            channel_url,
            startup_mode: self.startup_mode.unwrap_or(DEFAULT_STARTUP_MODE),
            reconnect: ReconnectPolicy {
                delay_ms,
                backoff: self.reconnect_backoff.unwrap_or(DEFAULT_RECONNECT_BACKOFF),
                max_attempts: self.max_reconnect_attempts,
            },
            history_timeout_ms,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSession {
    pub running: bool,
    pub history_url: String,
    pub channel_url: String,
    pub startup_mode: FeedStartupMode,
    pub reconnect_delay_ms: u64,
    pub reconnect_backoff: bool,
    pub max_reconnect_attempts: Option<u32>,
}

impl FeedSession {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            running: true,
            history_url: config.history_url.to_string(),
            channel_url: config.channel_url.to_string(),
            startup_mode: config.startup_mode,
            reconnect_delay_ms: config.reconnect.delay_ms,
            reconnect_backoff: config.reconnect.backoff,
            max_reconnect_attempts: config.reconnect.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStopResult {
    pub stopped: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedView {
    pub messages: Vec<Arc<Message>>,
    pub total: usize,
    pub pairs: Vec<String>,
}
