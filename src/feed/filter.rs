use crate::error::AppError;
use crate::feed::message::{Message, MessageType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const FILTER_ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageTypeFilter {
    #[default]
    All,
    Only(MessageType),
}

/// `All`, or one exact value to match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    Only(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    All,
    LastMinutes(u32),
}

impl TimeRange {
    /// Plain minutes (`"10"`) or a shorthand with a unit suffix
    /// (`"30m"`, `"1h"`, `"7d"`).
    pub fn parse_str(value: &str) -> Result<Self, AppError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(FILTER_ALL) {
            return Ok(Self::All);
        }

        let invalid = || {
            AppError::InvalidArgument(format!(
                "timeRange must be 'all' or a positive number of minutes, got '{value}'"
            ))
        };

        let (digits, minutes_per_unit) = match value.char_indices().last() {
            Some((index, 'm')) => (&value[..index], 1_u32),
            Some((index, 'h')) => (&value[..index], 60),
            Some((index, 'd')) => (&value[..index], 1_440),
            Some(_) => (value, 1),
            None => return Err(invalid()),
        };

        let amount = digits.parse::<u32>().map_err(|_| invalid())?;
        let minutes = amount.checked_mul(minutes_per_unit).ok_or_else(invalid)?;
        if minutes == 0 {
            return Err(invalid());
        }
        Ok(Self::LastMinutes(minutes))
    }

    /// Earliest instant still inside the window.
    pub fn cutoff_ms(self, now_ms: i64) -> Option<i64> {
        match self {
            Self::All => None,
            Self::LastMinutes(minutes) => {
                Some(now_ms.saturating_sub(i64::from(minutes).saturating_mul(60_000)))
            }
        }
    }
}

/// Replaced wholesale on every change; each clause defaults to `All`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterConfig {
    pub message_type: MessageTypeFilter,
    pub pair: Selection,
    pub trade_type: Selection,
    pub time_range: TimeRange,
}

impl FilterConfig {
    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilterArgs {
    pub message_type: Option<String>,
    pub pair: Option<String>,
    pub trade_type: Option<String>,
    pub time_range: Option<String>,
}

fn is_unset(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|raw| raw.trim().is_empty() || raw.trim().eq_ignore_ascii_case(FILTER_ALL))
        .unwrap_or(true)
}

impl FilterArgs {
    pub fn from_env() -> Self {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            message_type: read("FEED_FILTER_MESSAGE_TYPE"),
            pair: read("FEED_FILTER_PAIR"),
            trade_type: read("FEED_FILTER_TRADE_TYPE"),
            time_range: read("FEED_FILTER_TIME_RANGE"),
        }
    }

    pub fn normalize(self) -> Result<FilterConfig, AppError> {
        let message_type = if is_unset(&self.message_type) {
            MessageTypeFilter::All
        } else {
            let raw = self.message_type.unwrap_or_default();
            let parsed = MessageType::parse_str(&raw).ok_or_else(|| {
                AppError::InvalidArgument(format!(
                    "messageType must be one of all, signal, market, got '{}'",
                    raw.trim()
                ))
            })?;
            MessageTypeFilter::Only(parsed)
        };

        let pair = if is_unset(&self.pair) {
            Selection::All
        } else {
            Selection::Only(self.pair.unwrap_or_default().trim().to_string())
        };

        let trade_type = if is_unset(&self.trade_type) {
            Selection::All
        } else {
            Selection::Only(self.trade_type.unwrap_or_default().trim().to_string())
        };

        let time_range = match self.time_range.as_deref() {
            Some(raw) if !raw.trim().is_empty() => TimeRange::parse_str(raw)?,
            _ => TimeRange::All,
        };

        Ok(FilterConfig {
            message_type,
            pair,
            trade_type,
            time_range,
        })
    }
}

fn message_type_passes(message: &Message, filter: MessageTypeFilter) -> bool {
    match filter {
        MessageTypeFilter::All => true,
        MessageTypeFilter::Only(expected) => message.message_type == expected,
    }
}

fn pair_passes(message: &Message, selection: &Selection) -> bool {
    match selection {
        Selection::All => true,
        Selection::Only(expected) => message.pair.as_deref() == Some(expected.as_str()),
    }
}

/// Only signals carry a trade direction; market updates always pass.
fn trade_type_passes(message: &Message, selection: &Selection) -> bool {
    if !message.is_signal() {
        return true;
    }

    match selection {
        Selection::All => true,
        Selection::Only(expected) => message
            .setup_type
            .map(|setup| setup.as_str().eq_ignore_ascii_case(expected))
            .unwrap_or(false),
    }
}

/// Undated messages (missing or unparsable) are never excluded by a window.
fn time_range_passes(message: &Message, time_range: TimeRange, now_ms: i64) -> bool {
    match (time_range.cutoff_ms(now_ms), message.timestamp_ms()) {
        (None, _) | (_, None) => true,
        (Some(cutoff), Some(timestamp)) => timestamp >= cutoff,
    }
}

pub fn message_matches(message: &Message, config: &FilterConfig, now_ms: i64) -> bool {
    message_type_passes(message, config.message_type)
        && pair_passes(message, &config.pair)
        && trade_type_passes(message, &config.trade_type)
        && time_range_passes(message, config.time_range, now_ms)
}

/// Order-preserving view over `messages`; the input is left untouched.
pub fn filter_messages(
    messages: &[Arc<Message>],
    config: &FilterConfig,
    now_ms: i64,
) -> Vec<Arc<Message>> {
    if config.is_identity() {
        return messages.to_vec();
    }

    messages
        .iter()
        .filter(|message| message_matches(message, config, now_ms))
        .cloned()
        .collect()
}
