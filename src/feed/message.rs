use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Serialize, Serializer};

/// Epoch numbers above this are read as milliseconds, below as seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const OFFSET_TIMESTAMP_FORMATS: [&str; 2] =
    ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Signal,
    Market,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Market => "market",
        }
    }

    /// Case-insensitive; `None` for anything that is not a known type.
    pub fn parse_str(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("signal") {
            Some(Self::Signal)
        } else if value.eq_ignore_ascii_case("market") {
            Some(Self::Market)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SetupType {
    Long,
    Short,
}

impl SetupType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    pub fn parse_str(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("long") {
            Some(Self::Long)
        } else if value.eq_ignore_ascii_case("short") {
            Some(Self::Short)
        } else {
            None
        }
    }
}

/// The instant a message refers to, kept verbatim alongside its parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTimestamp {
    raw: String,
    unix_ms: Option<i64>,
}

impl MessageTimestamp {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let unix_ms = parse_timestamp_ms(&raw);
        Self { raw, unix_ms }
    }

    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self {
            raw: instant.to_rfc3339_opts(SecondsFormat::Millis, true),
            unix_ms: Some(instant.timestamp_millis()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `None` when the raw value could not be read as an instant.
    pub fn unix_ms(&self) -> Option<i64> {
        self.unix_ms
    }
}

impl Serialize for MessageTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

/// Canonical record produced by the normalizer. Shared as `Arc<Message>`
/// once it enters the store and never mutated afterwards.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_type: MessageType,
    pub pair: Option<String>,
    pub setup_type: Option<SetupType>,
    pub entry: Option<String>,
    pub leverage: Option<String>,
    pub tp1: Option<String>,
    pub tp2: Option<String>,
    pub tp3: Option<String>,
    pub tp4: Option<String>,
    pub stop_loss: Option<String>,
    pub timestamp: Option<MessageTimestamp>,
    pub full_message: Option<String>,
    pub sender: Option<String>,
    pub text: Option<String>,
}

impl Message {
    #[cfg(test)]
    pub(crate) fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            pair: None,
            setup_type: None,
            entry: None,
            leverage: None,
            tp1: None,
            tp2: None,
            tp3: None,
            tp4: None,
            stop_loss: None,
            timestamp: None,
            full_message: None,
            sender: None,
            text: None,
        }
    }

    pub fn is_signal(&self) -> bool {
        self.message_type == MessageType::Signal
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp.as_ref().and_then(MessageTimestamp::unix_ms)
    }

    /// Relative age as shown next to each feed entry.
    pub fn age_label(&self, now_ms: i64) -> Option<String> {
        let timestamp_ms = self.timestamp_ms()?;
        let diff_minutes = now_ms.saturating_sub(timestamp_ms).div_euclid(60_000);

        Some(if diff_minutes < 1 {
            "Just now".to_string()
        } else if diff_minutes < 60 {
            format!("{diff_minutes}m ago")
        } else {
            format!("{}h ago", diff_minutes / 60)
        })
    }
}

pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        let epoch = value.parse::<i64>().ok()?;
        return Some(if epoch > EPOCH_MILLIS_THRESHOLD {
            epoch
        } else {
            epoch.saturating_mul(1_000)
        });
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp_millis());
    }

    for format in OFFSET_TIMESTAMP_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.timestamp_millis());
        }
    }

    NAIVE_TIMESTAMP_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
    })
}
