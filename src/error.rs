use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("history fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("frame rejected: {0}")]
    Parse(#[from] ParseError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Historical retrieval failed or the endpoint answered with an error payload.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("endpoint answered {status}: {reason}")]
    Status { status: u16, reason: String },
    #[error("endpoint reported error: {0}")]
    ErrorPayload(String),
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
    #[error("json decode error: {0}")]
    Decode(#[from] simd_json::Error),
}

/// One inbound frame could not be turned into a message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("json decode error: {0}")]
    Json(#[from] simd_json::Error),
    #[error("payload is not a json object (found {0})")]
    NotAnObject(&'static str),
    #[error("empty frame")]
    EmptyFrame,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("frame error: {0}")]
    Frame(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("channel closed{}", closed_suffix(.0))]
    Closed(Option<String>),
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

fn closed_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(": {reason}"))
        .unwrap_or_default()
}

impl ChannelError {
    pub fn connect(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connect(Box::new(value))
    }

    pub fn frame(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Frame(Box::new(value))
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
