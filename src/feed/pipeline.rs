use crate::error::ChannelError;
use crate::feed::channel::{run_live_channel, LiveChannelHooks};
use crate::feed::connection::{
    ConnectionState, ConnectionStateMachine, ReconnectDirective, ReconnectPolicy,
};
use crate::feed::history::{build_history_client, fetch_history};
use crate::feed::normalize::{normalize_frame, IngestPath};
use crate::feed::store::MessageStore;
use crate::feed::types::{FeedConfig, FeedStartupMode, FeedStatusSnapshot, HistoryStatus};
use crate::feed::FeedEvent;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const STATUS_HEARTBEAT_MS: u64 = 1_000;
const STATUS_ERROR_THROTTLE_MS: u64 = 500;
pub const FEED_EVENT_CAPACITY: usize = 1_024;

/// Shared handles a running stream writes into and consumers read from.
#[derive(Debug, Clone)]
pub struct FeedRuntime {
    pub store: Arc<RwLock<MessageStore>>,
    pub status_store: Arc<RwLock<FeedStatusSnapshot>>,
    pub events: broadcast::Sender<FeedEvent>,
}

impl FeedRuntime {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            store: Arc::new(RwLock::new(MessageStore::new())),
            status_store: Arc::new(RwLock::new(FeedStatusSnapshot::idle(Some(
                "feed idle".to_string(),
            )))),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// A send with no live receivers is not a failure.
    fn emit(&self, event: FeedEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Debug, Default)]
struct StatusPublishThrottle {
    last_state: Option<ConnectionState>,
    last_reason: Option<String>,
    last_emit: Option<Instant>,
}

fn allow_status_publish(
    throttle: &Mutex<StatusPublishThrottle>,
    snapshot: &FeedStatusSnapshot,
) -> bool {
    let mut writable = throttle.lock();
    let now = Instant::now();
    let should_throttle = snapshot.state == ConnectionState::Disconnected;

    if should_throttle
        && writable.last_state == Some(snapshot.state)
        && writable.last_reason == snapshot.reason
        && writable
            .last_emit
            .map(|instant| {
                now.duration_since(instant) < Duration::from_millis(STATUS_ERROR_THROTTLE_MS)
            })
            .unwrap_or(false)
    {
        return false;
    }

    writable.last_state = Some(snapshot.state);
    writable.last_reason = snapshot.reason.clone();
    writable.last_emit = Some(now);
    true
}

fn update_status(runtime: &FeedRuntime, update: impl FnOnce(&mut FeedStatusSnapshot)) {
    let mut writable = runtime.status_store.write();
    update(&mut writable);
}

/// Emits while the snapshot is still locked so subscribers observe
/// status events in write order.
fn publish_status(runtime: &FeedRuntime, update: impl FnOnce(&mut FeedStatusSnapshot)) {
    let mut writable = runtime.status_store.write();
    update(&mut writable);
    runtime.emit(FeedEvent::Status(writable.clone()));
}

/// The snapshot is always updated; the event is skipped when it repeats a
/// disconnect reported moments ago.
fn publish_status_throttled(
    runtime: &FeedRuntime,
    throttle: &Mutex<StatusPublishThrottle>,
    update: impl FnOnce(&mut FeedStatusSnapshot),
) {
    let mut writable = runtime.status_store.write();
    update(&mut writable);
    if allow_status_publish(throttle, &writable) {
        runtime.emit(FeedEvent::Status(writable.clone()));
    }
}

/// Single writer of the live segment and of the connection state.
struct FeedController {
    runtime: FeedRuntime,
    machine: ConnectionStateMachine,
    throttle: Mutex<StatusPublishThrottle>,
    endpoint: String,
}

impl FeedController {
    fn new(runtime: FeedRuntime, policy: ReconnectPolicy, endpoint: String) -> Self {
        Self {
            runtime,
            machine: ConnectionStateMachine::new(policy),
            throttle: Mutex::new(StatusPublishThrottle::default()),
            endpoint,
        }
    }

    fn publish(&self, update: impl FnOnce(&mut FeedStatusSnapshot)) {
        publish_status(&self.runtime, update);
    }

    fn teardown(&mut self, reason: String) {
        self.machine.teardown();
        self.publish(|snapshot| {
            snapshot.state = ConnectionState::Disconnected;
            snapshot.running = false;
            snapshot.reconnect_attempt = 0;
            snapshot.reason = Some(reason);
        });
    }
}

impl LiveChannelHooks for FeedController {
    fn on_connecting(&mut self) {
        let state = self.machine.begin_attempt();
        let attempt = self.machine.failed_attempts();
        tracing::info!(endpoint = %self.endpoint, attempt, "opening live channel");

        let reason = if attempt == 0 {
            "opening live channel".to_string()
        } else {
            format!("reconnect attempt {attempt}")
        };
        self.publish(|snapshot| {
            snapshot.state = state;
            snapshot.reconnect_attempt = attempt;
            snapshot.reason = Some(reason);
        });
    }

    fn on_open(&mut self) {
        if !self.machine.mark_open() {
            tracing::debug!("ignoring open without a pending attempt");
            return;
        }
        tracing::info!(endpoint = %self.endpoint, "live channel connected");

        let state = self.machine.state();
        self.publish(|snapshot| {
            snapshot.state = state;
            snapshot.reconnect_attempt = 0;
            snapshot.reason = Some("live channel connected".to_string());
        });
    }

    fn on_message(&mut self, mut payload: Vec<u8>) {
        let received_at = Utc::now();
        let message = match normalize_frame(&mut payload, IngestPath::Live { received_at }) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%error, bytes = payload.len(), "discarding malformed frame");
                self.runtime.status_store.write().discarded_frames += 1;
                return;
            }
        };

        let (shared, total) = {
            let mut store = self.runtime.store.write();
            let shared = store.prepend_live(message);
            let total = store.len();
            update_status(&self.runtime, |snapshot| {
                snapshot.message_count = total;
                snapshot.last_message_at_ms = Some(received_at.timestamp_millis());
            });
            (shared, total)
        };
        tracing::debug!(
            message_type = shared.message_type.as_str(),
            pair = shared.pair.as_deref().unwrap_or(""),
            total,
            "ingested live message"
        );
        self.runtime.emit(FeedEvent::Message(shared));
    }

    fn on_close(&mut self, error: ChannelError) -> ReconnectDirective {
        let directive = self.machine.mark_closed();
        let attempt = self.machine.failed_attempts();

        match directive {
            ReconnectDirective::RetryAfter(delay) => tracing::warn!(
                endpoint = %self.endpoint,
                %error,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "live channel dropped; reconnect scheduled"
            ),
            ReconnectDirective::GiveUp { attempts } => tracing::warn!(
                endpoint = %self.endpoint,
                %error,
                attempts,
                "live channel dropped; retry limit reached"
            ),
        }

        let state = self.machine.state();
        publish_status_throttled(&self.runtime, &self.throttle, |snapshot| {
            snapshot.state = state;
            snapshot.reconnect_attempt = attempt;
            snapshot.reason = Some(error.to_string());
        });
        directive
    }
}

/// One-shot historical load. A result that resolves after cancellation is
/// dropped without touching the store.
async fn load_history(
    config: &FeedConfig,
    runtime: &FeedRuntime,
    cancel_token: &CancellationToken,
) {
    if cancel_token.is_cancelled() {
        return;
    }

    let fetched = match build_history_client(config.history_timeout_ms) {
        Ok(client) => {
            tokio::select! {
                _ = cancel_token.cancelled() => return,
                result = fetch_history(&client, &config.history_url) => result,
            }
        }
        Err(error) => Err(error),
    };

    if cancel_token.is_cancelled() {
        return;
    }

    match fetched {
        Ok(batch) => {
            let signals = batch.signals.len();
            let markets = batch.markets.len();
            let skipped = batch.skipped_rows;
            let count = {
                let mut store = runtime.store.write();
                let count = store.bulk_load(batch.into_merged());
                let total = store.len();
                publish_status(runtime, |snapshot| {
                    snapshot.history = HistoryStatus::Loaded { count };
                    snapshot.message_count = total;
                });
                count
            };
            tracing::info!(count, signals, markets, skipped, "historical messages loaded");
            runtime.emit(FeedEvent::HistoryLoaded { count });
        }
        Err(error) => {
            let reason = error.to_string();
            tracing::warn!(
                endpoint = %config.history_url,
                %error,
                "historical messages unavailable; continuing with live data"
            );

            publish_status(runtime, |snapshot| {
                snapshot.history = HistoryStatus::Unavailable {
                    reason: reason.clone(),
                };
            });
            runtime.emit(FeedEvent::HistoryUnavailable { reason });
        }
    }
}

/// Drives one feed session until the token is cancelled: historical load
/// per the startup mode, the live channel with reconnects, and a status
/// heartbeat. Ends with the state `Disconnected` and `running = false`.
pub async fn run_feed_stream(
    config: FeedConfig,
    runtime: FeedRuntime,
    cancel_token: CancellationToken,
) {
    let endpoint = config.channel_url.to_string();

    *runtime.store.write() = MessageStore::new();
    publish_status(&runtime, |snapshot| {
        *snapshot = FeedStatusSnapshot {
            running: true,
            endpoint: Some(endpoint.clone()),
            ..FeedStatusSnapshot::idle(Some("feed starting".to_string()))
        };
    });

    let history_handle = match config.startup_mode {
        FeedStartupMode::HistoryFirst => {
            publish_status(&runtime, |snapshot| {
                snapshot.state = ConnectionState::Connecting;
                snapshot.reason = Some("loading historical messages".to_string());
            });
            load_history(&config, &runtime, &cancel_token).await;
            None
        }
        FeedStartupMode::LiveFirst => {
            let history_config = config.clone();
            let history_runtime = runtime.clone();
            let history_cancel = cancel_token.clone();

            Some(tokio::spawn(async move {
                load_history(&history_config, &history_runtime, &history_cancel).await;
            }))
        }
    };

    let heartbeat_cancel = cancel_token.clone();
    let heartbeat_runtime = runtime.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(STATUS_HEARTBEAT_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = heartbeat_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let readable = heartbeat_runtime.status_store.read();
                    heartbeat_runtime.emit(FeedEvent::Status(readable.clone()));
                }
            }
        }
    });

    let mut controller = FeedController::new(runtime.clone(), config.reconnect, endpoint);

    let outcome = run_live_channel(&config.channel_url, &mut controller, &cancel_token).await;
    let final_reason = match outcome {
        Ok(()) => "feed stopped".to_string(),
        Err(error) => {
            tracing::error!(%error, "live channel abandoned");
            error.to_string()
        }
    };

    cancel_token.cancel();
    let _ = heartbeat_handle.await;
    if let Some(handle) = history_handle {
        let _ = handle.await;
    }

    controller.teardown(final_reason);
    tracing::info!("feed stream stopped");
}

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}
