use crate::feed::types::FeedStatusSnapshot;
use crate::{error::AppError, state::AppState};
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_ms: u128,
    pub feed: &'static str,
    pub running: bool,
    pub message_count: usize,
}

pub fn build_health_response(started_at: Instant, feed: &FeedStatusSnapshot) -> HealthResponse {
    HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_ms: started_at.elapsed().as_millis(),
        feed: feed.state.as_str(),
        running: feed.running,
        message_count: feed.message_count,
    }
}

pub async fn health(state: &AppState) -> Result<HealthResponse, AppError> {
    let feed = state.feed.status_store.read().clone();
    Ok(build_health_response(state.started_at, &feed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_ok_status_and_feed_state() {
        let state = AppState::new();
        let response = health(&state).await.expect("health should not fail");

        assert_eq!(response.status, "ok");
        assert_eq!(response.feed, "disconnected");
        assert!(!response.running);
        assert_eq!(response.message_count, 0);
        assert!(!response.version.is_empty());
        assert!(response.uptime_ms <= 1_000);
    }
}
