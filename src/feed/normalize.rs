use crate::error::ParseError;
use crate::feed::message::{Message, MessageTimestamp, MessageType, SetupType};
use chrono::{DateTime, Utc};
use serde::de::IgnoredAny;
use serde::Deserialize;
use simd_json::{OwnedValue, StaticNode};

/// Where a payload entered the system. Only live frames get stamped with
/// their arrival instant when they carry no timestamp of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPath {
    History,
    Live { received_at: DateTime<Utc> },
}

/// A scalar slot in an inbound payload. Producers disagree on whether
/// numeric fields are strings or numbers; containers are treated as absent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireScalar {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Flag(bool),
    Other(IgnoredAny),
}

impl WireScalar {
    fn into_text(self) -> Option<String> {
        let rendered = match self {
            Self::Text(value) => value,
            Self::Integer(value) => value.to_string(),
            Self::Unsigned(value) => value.to_string(),
            Self::Float(value) if value.is_finite() => value.to_string(),
            Self::Float(_) => return None,
            Self::Flag(value) => value.to_string(),
            Self::Other(_) => return None,
        };

        if rendered.trim().is_empty() {
            None
        } else {
            Some(rendered)
        }
    }
}

/// Every key name observed across producers. Aliases are resolved in
/// [`MessageWire::into_message`], never downstream.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageWire {
    message_type: Option<WireScalar>,
    #[serde(rename = "type")]
    kind: Option<WireScalar>,
    pair: Option<WireScalar>,
    setup_type: Option<WireScalar>,
    #[serde(rename = "setupType")]
    setup_type_camel: Option<WireScalar>,
    entry: Option<WireScalar>,
    leverage: Option<WireScalar>,
    tp1: Option<WireScalar>,
    tp2: Option<WireScalar>,
    tp3: Option<WireScalar>,
    tp4: Option<WireScalar>,
    stop_loss: Option<WireScalar>,
    #[serde(rename = "stopLoss")]
    stop_loss_camel: Option<WireScalar>,
    timestamp: Option<WireScalar>,
    full_message: Option<WireScalar>,
    #[serde(rename = "fullMessage")]
    full_message_camel: Option<WireScalar>,
    message: Option<WireScalar>,
    sender: Option<WireScalar>,
    from: Option<WireScalar>,
    text: Option<WireScalar>,
    content: Option<WireScalar>,
}

fn text(slot: Option<WireScalar>) -> Option<String> {
    slot.and_then(WireScalar::into_text)
}

/// First non-empty candidate wins.
fn first_text<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates.into_iter().flatten().next()
}

impl MessageWire {
    fn into_message(self, path: IngestPath) -> Message {
        let message_type = first_text([text(self.message_type), text(self.kind)])
            .and_then(|value| MessageType::parse_str(&value))
            .unwrap_or(MessageType::Market);

        let setup_type = first_text([text(self.setup_type), text(self.setup_type_camel)])
            .and_then(|value| SetupType::parse_str(&value));

        let message = text(self.message);

        let timestamp = match (text(self.timestamp), path) {
            (Some(raw), _) => Some(MessageTimestamp::parse(raw)),
            (None, IngestPath::Live { received_at }) => {
                Some(MessageTimestamp::from_instant(received_at))
            }
            (None, IngestPath::History) => None,
        };

        Message {
            message_type,
            pair: text(self.pair),
            setup_type,
            entry: text(self.entry),
            leverage: text(self.leverage),
            tp1: text(self.tp1),
            tp2: text(self.tp2),
            tp3: text(self.tp3),
            tp4: text(self.tp4),
            stop_loss: first_text([text(self.stop_loss), text(self.stop_loss_camel)]),
            timestamp,
            full_message: first_text([
                text(self.full_message),
                text(self.full_message_camel),
                message.clone(),
            ]),
            sender: first_text([text(self.sender), text(self.from)]),
            text: first_text([text(self.text), text(self.content), message]),
        }
    }
}

fn value_kind(value: &OwnedValue) -> &'static str {
    match value {
        OwnedValue::Static(StaticNode::Null) => "null",
        OwnedValue::Static(StaticNode::Bool(_)) => "boolean",
        OwnedValue::Static(_) => "number",
        OwnedValue::String(_) => "string",
        OwnedValue::Array(_) => "array",
        OwnedValue::Object(_) => "object",
    }
}

/// Maps one already-decoded JSON value onto a canonical message.
pub fn normalize_value(value: OwnedValue, path: IngestPath) -> Result<Message, ParseError> {
    if !matches!(value, OwnedValue::Object(_)) {
        return Err(ParseError::NotAnObject(value_kind(&value)));
    }

    let wire: MessageWire = simd_json::serde::from_owned_value(value)?;
    Ok(wire.into_message(path))
}

/// Decodes and normalizes one raw channel frame. The buffer is used as
/// scratch space by the decoder.
pub fn normalize_frame(payload: &mut [u8], path: IngestPath) -> Result<Message, ParseError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::EmptyFrame);
    }

    let value = simd_json::to_owned_value(payload)?;
    normalize_value(value, path)
}
