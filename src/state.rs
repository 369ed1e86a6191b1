use crate::feed::pipeline::{FeedRuntime, FEED_EVENT_CAPACITY};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct FeedStreamHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

pub struct AppState {
    pub started_at: Instant,
    pub feed: FeedRuntime,
    pub feed_stream: Mutex<Option<FeedStreamHandle>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            feed: FeedRuntime::new(FEED_EVENT_CAPACITY),
            feed_stream: Mutex::new(None),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
