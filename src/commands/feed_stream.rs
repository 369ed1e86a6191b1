use crate::error::AppError;
use crate::feed::connection::ConnectionState;
use crate::feed::pipeline::run_feed_stream;
use crate::feed::types::{FeedSession, FeedStatusSnapshot, FeedStopResult, StartFeedArgs};
use crate::feed::FeedEvent;
use crate::state::{AppState, FeedStreamHandle};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

async fn take_and_stop(state: &AppState) -> bool {
    let existing_handle = {
        let mut stream_slot = state.feed_stream.lock().await;
        stream_slot.take()
    };

    match existing_handle {
        Some(handle) => {
            handle.cancellation_token.cancel();
            if let Err(error) = handle.join_handle.await {
                tracing::warn!(%error, "feed stream task ended abnormally");
            }
            true
        }
        None => false,
    }
}

/// Validates `args`, then replaces any running stream with a new one.
pub async fn start_feed(
    state: &AppState,
    args: Option<StartFeedArgs>,
) -> Result<FeedSession, AppError> {
    let config = args.unwrap_or_default().normalize()?;

    if take_and_stop(state).await {
        tracing::info!("replacing running feed stream");
    }

    let cancellation_token = CancellationToken::new();
    let task_token = cancellation_token.clone();
    let runtime = state.feed.clone();
    let runtime_config = config.clone();

    let join_handle = tokio::spawn(async move {
        run_feed_stream(runtime_config, runtime, task_token).await;
    });

    {
        let mut stream_slot = state.feed_stream.lock().await;
        *stream_slot = Some(FeedStreamHandle {
            cancellation_token,
            join_handle,
        });
    }

    tracing::info!(
        history = %config.history_url,
        channel = %config.channel_url,
        "feed stream started"
    );
    Ok(FeedSession::from_config(&config))
}

/// Explicit teardown: the channel is closed and no reconnect follows.
pub async fn stop_feed(state: &AppState) -> Result<FeedStopResult, AppError> {
    let stopped = take_and_stop(state).await;

    {
        let mut writable = state.feed.status_store.write();
        writable.state = ConnectionState::Disconnected;
        writable.running = false;
        writable.reconnect_attempt = 0;
        writable.reason = Some("feed stopped by command".to_string());
    }

    Ok(FeedStopResult { stopped })
}

pub async fn feed_status(state: &AppState) -> Result<FeedStatusSnapshot, AppError> {
    let snapshot = state.feed.status_store.read().clone();
    Ok(snapshot)
}

pub fn subscribe_feed(state: &AppState) -> broadcast::Receiver<FeedEvent> {
    state.feed.subscribe()
}
