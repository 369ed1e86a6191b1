pub mod commands;
pub mod error;
pub mod feed;
pub mod logging;
pub mod state;

use commands::{
    feed_stream::{start_feed, stop_feed, subscribe_feed},
    health::health,
    messages::feed_messages,
};
use error::AppError;
use feed::connection::ConnectionState;
use feed::filter::{message_matches, FilterArgs};
use feed::pipeline::now_unix_ms;
use feed::types::StartFeedArgs;
use feed::FeedEvent;
use state::AppState;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

const SUMMARY_INTERVAL_SECS: u64 = 30;

/// Logs state transitions; returns `false` once the stream has ended.
fn log_status_change(event: &FeedEvent, last_state: &mut Option<ConnectionState>) -> bool {
    let FeedEvent::Status(snapshot) = event else {
        return true;
    };

    if *last_state != Some(snapshot.state) {
        tracing::debug!(
            event = event.name(),
            state = snapshot.state.as_str(),
            reason = ?snapshot.reason,
            "feed status"
        );
        *last_state = Some(snapshot.state);
    }
    if !snapshot.running {
        tracing::warn!(reason = ?snapshot.reason, "feed stream ended");
        return false;
    }
    true
}

/// Headless consumer: runs the feed from environment configuration and
/// logs every message that passes the configured display filter.
pub async fn run() -> Result<(), AppError> {
    let state = AppState::new();
    let stream_args = StartFeedArgs::from_env()?;
    let filter_args = FilterArgs::from_env();
    let filter = filter_args.clone().normalize()?;

    let mut events = subscribe_feed(&state);
    let session = start_feed(&state, Some(stream_args)).await?;
    tracing::info!(
        history = %session.history_url,
        channel = %session.channel_url,
        startup_mode = ?session.startup_mode,
        "signal feed running; press ctrl-c to stop"
    );

    let mut summary = tokio::time::interval(Duration::from_secs(SUMMARY_INTERVAL_SECS));
    summary.set_missed_tick_behavior(MissedTickBehavior::Skip);
    summary.tick().await;
    let mut last_state: Option<ConnectionState> = None;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("shutdown requested");
                break;
            }
            _ = summary.tick() => {
                let view = feed_messages(&state, Some(filter_args.clone())).await?;
                let report = health(&state).await?;
                tracing::info!(
                    shown = view.messages.len(),
                    total = view.total,
                    pairs = view.pairs.len(),
                    feed = report.feed,
                    uptime_ms = report.uptime_ms as u64,
                    "feed summary"
                );
            }
            event = events.recv() => match event {
                Ok(FeedEvent::Message(message)) => {
                    let now_ms = now_unix_ms();
                    if message_matches(&message, &filter, now_ms) {
                        let age = message.age_label(now_ms);
                        tracing::info!(
                            message_type = message.message_type.as_str(),
                            pair = message.pair.as_deref().unwrap_or("-"),
                            setup = message.setup_type.map(|setup| setup.as_str()).unwrap_or("-"),
                            age = age.as_deref().unwrap_or("-"),
                            text = message
                                .full_message
                                .as_deref()
                                .or(message.text.as_deref())
                                .unwrap_or(""),
                            "feed message"
                        );
                    }
                }
                Ok(event @ FeedEvent::HistoryLoaded { count }) => {
                    tracing::info!(event = event.name(), count, "history ready");
                }
                Ok(FeedEvent::HistoryUnavailable { reason }) => {
                    tracing::warn!(%reason, "history unavailable");
                }
                Ok(event @ FeedEvent::Status(_)) => {
                    if !log_status_change(&event, &mut last_state) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "feed consumer lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stopped = stop_feed(&state).await?;
    tracing::info!(stopped = stopped.stopped, "signal feed stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed::types::FeedStatusSnapshot;

    #[test]
    fn consumer_stops_on_the_final_status() {
        let mut last_state = None;
        let running = FeedEvent::Status(FeedStatusSnapshot {
            running: true,
            state: ConnectionState::Connecting,
            ..FeedStatusSnapshot::idle(None)
        });
        assert!(log_status_change(&running, &mut last_state));
        assert_eq!(last_state, Some(ConnectionState::Connecting));

        let ended = FeedEvent::Status(FeedStatusSnapshot::idle(Some(
            "gave up after 1 reconnect attempts".to_string(),
        )));
        assert!(!log_status_change(&ended, &mut last_state));
        assert_eq!(last_state, Some(ConnectionState::Disconnected));

        let loaded = FeedEvent::HistoryLoaded { count: 1 };
        assert!(log_status_change(&loaded, &mut last_state));
    }
}
