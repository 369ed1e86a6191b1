pub mod channel;
pub mod connection;
pub mod filter;
pub mod history;
pub mod message;
pub mod normalize;
pub mod pipeline;
pub mod store;
pub mod types;

use crate::feed::message::Message;
use crate::feed::types::FeedStatusSnapshot;
use serde::Serialize;
use std::sync::Arc;

pub const FEED_STATUS_EVENT: &str = "feed_status";
pub const FEED_MESSAGE_EVENT: &str = "feed_message";
pub const HISTORY_LOADED_EVENT: &str = "history_loaded";
pub const HISTORY_UNAVAILABLE_EVENT: &str = "history_unavailable";

/// What subscribers of a running feed observe.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum FeedEvent {
    #[serde(rename = "feed_status")]
    Status(FeedStatusSnapshot),
    #[serde(rename = "feed_message")]
    Message(Arc<Message>),
    HistoryLoaded { count: usize },
    HistoryUnavailable { reason: String },
}

impl FeedEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => FEED_STATUS_EVENT,
            Self::Message(_) => FEED_MESSAGE_EVENT,
            Self::HistoryLoaded { .. } => HISTORY_LOADED_EVENT,
            Self::HistoryUnavailable { .. } => HISTORY_UNAVAILABLE_EVENT,
        }
    }
}
