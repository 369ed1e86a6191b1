use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BACKOFF_MIN_BASE_MS: u64 = 200;
const BACKOFF_MAX_EXPONENT: u32 = 6;
const BACKOFF_MAX_DELAY_MS: u64 = 30_000;
const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// How the channel is re-opened after a drop. The default retries forever
/// at a fixed delay; back-off and a retry cap are opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay_ms: u64,
    pub backoff: bool,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
            backoff: false,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        if !self.backoff {
            return Duration::from_millis(self.delay_ms);
        }

        let base_ms = self.delay_ms.max(BACKOFF_MIN_BASE_MS);
        let exponent = attempt.saturating_sub(1).min(BACKOFF_MAX_EXPONENT);
        let scaled_ms = base_ms
            .saturating_mul(1_u64 << exponent)
            .min(BACKOFF_MAX_DELAY_MS);
        Duration::from_millis(scaled_ms + jitter_ms())
    }
}

fn jitter_ms() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::from(duration.subsec_millis()) % BACKOFF_JITTER_MS,
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDirective {
    RetryAfter(Duration),
    GiveUp { attempts: u32 },
}

/// `Disconnected -> Connecting -> Connected -> Disconnected -> ...`
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    failed_attempts: u32,
    policy: ReconnectPolicy,
}

impl ConnectionStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive drops since the last successful open.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn begin_attempt(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    /// Returns `false` when the open arrives without a pending attempt.
    pub fn mark_open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.failed_attempts = 0;
        true
    }

    /// Handles close or error. A repeated close while already
    /// disconnected does not count as another failed attempt.
    pub fn mark_closed(&mut self) -> ReconnectDirective {
        if self.state != ConnectionState::Disconnected {
            self.state = ConnectionState::Disconnected;
            self.failed_attempts = self.failed_attempts.saturating_add(1);
        }

        match self.policy.max_attempts {
            Some(limit) if self.failed_attempts > limit => ReconnectDirective::GiveUp {
                attempts: self.failed_attempts.saturating_sub(1),
            },
            _ => ReconnectDirective::RetryAfter(self.policy.delay_for(self.failed_attempts)),
        }
    }

    /// Explicit teardown: no further attempts are scheduled.
    pub fn teardown(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.failed_attempts = 0;
    }
}
