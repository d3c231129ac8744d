//! Connection state and the reconnect backoff policy.

use std::fmt;
use std::time::Duration;

/// Connection state for the realtime socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    /// Retry budget exhausted. Only an explicit `connect()` leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Consecutive retries allowed before settling in `Failed`
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
    /// Optional ceiling on the delay. `None` leaves the doubling uncapped.
    pub max_delay: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the retry that follows `attempt` earlier retries.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Retry bookkeeping for one manager.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub(crate) fn has_budget(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Delay to wait before the next retry.
    pub(crate) fn next_delay(&self) -> Duration {
        self.config.delay_for_attempt(self.attempt)
    }

    /// Called when the backoff timer fires.
    pub(crate) fn begin_retry(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
