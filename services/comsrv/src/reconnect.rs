//! Link reopen backoff
//!
//! Exponential backoff with jitter between attempts to reopen a failed link.
//! A failed open schedules the earliest time of the next attempt; the poller
//! waits out the remainder before reopening for the next operation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Reconnection error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    /// Maximum retry attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,
}

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// Waiting out the backoff after a failed open
    Reconnecting,
    /// Attempt limit reached, resting until the capped backoff elapses
    Failed,
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Failed opens in a row before the link rests for `max_delay_ms`
    /// (0 means no limit)
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Add ±25% jitter to delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Reject settings that would make the backoff shrink or misbehave
    pub fn validate(&self) -> Result<(), String> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be a finite value >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(format!(
                "initial_delay_ms {} exceeds max_delay_ms {}",
                self.initial_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Reconnection statistics tracking
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Reopen bookkeeping for one link
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    /// Consecutive failed opens
    failures: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    state: ConnectionState,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            last_failure: None,
            next_attempt: None,
            state: ConnectionState::Disconnected,
            stats: ReconnectStats::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Check the attempt limit before opening
    ///
    /// Once `max_attempts` opens in a row have failed, attempts are refused
    /// until `max_delay` has passed since the last failure. The count then
    /// starts over.
    pub fn begin_attempt(&mut self) -> Result<(), ReconnectError> {
        if self.policy.max_attempts > 0 && self.failures >= self.policy.max_attempts {
            let max_delay = self.policy.max_delay();
            if matches!(self.last_failure, Some(at) if at.elapsed() < max_delay) {
                self.state = ConnectionState::Failed;
                return Err(ReconnectError::MaxAttemptsExceeded);
            }
            debug!("Attempt limit rested, starting over after {} failures", self.failures);
            self.failures = 0;
            self.next_attempt = None;
            self.state = ConnectionState::Disconnected;
        }
        self.stats.total_attempts += 1;
        Ok(())
    }

    /// Time left before the next open may be attempted
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.next_attempt
            .and_then(|at| at.checked_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }

    /// Mark the connection as successful
    pub fn mark_connected(&mut self) {
        if self.failures > 0 {
            info!("Reopened after {} failed attempts", self.failures);
            self.stats.successful_reconnects += 1;
        }
        self.state = ConnectionState::Connected;
        self.failures = 0;
        self.last_failure = None;
        self.next_attempt = None;
        self.stats.last_connected = Some(Instant::now());
    }

    /// Mark the connection as closed after a link failure
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        debug!("Connection marked as disconnected");
    }

    /// Record a failed open and schedule the next attempt
    pub fn mark_failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.stats.failed_reconnects += 1;
        let delay = self.calculate_next_delay();
        let now = Instant::now();
        self.last_failure = Some(now);
        self.next_attempt = Some(now + delay);
        self.state = ConnectionState::Reconnecting;
        warn!("Open attempt {} failed, next in {:?}", self.failures, delay);
        delay
    }

    /// Calculate the delay after the current failure count
    pub fn calculate_next_delay(&self) -> Duration {
        let attempt = self.failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_ms = self.policy.max_delay_ms as f64;

        // delay = initial_delay * (multiplier ^ attempt), clamped in f64 so a
        // long outage cannot overflow Duration
        let ms = self.policy.initial_delay_ms as f64
            * self.policy.backoff_multiplier.max(1.0).powi(attempt);
        let ms = if ms.is_finite() { ms.min(max_ms) } else { max_ms };
        let mut delay = Duration::from_millis(ms as u64);

        // ±25% jitter
        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut helper = ReconnectHelper::new(policy(0));
        assert_eq!(helper.mark_failed(), Duration::from_millis(100));
        assert_eq!(helper.mark_failed(), Duration::from_millis(200));
        assert_eq!(helper.mark_failed(), Duration::from_millis(400));
        for _ in 0..5 {
            helper.mark_failed();
        }
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(1000));
        assert_eq!(helper.connection_state(), ConnectionState::Reconnecting);
        assert!(helper.remaining_backoff().is_some());
    }

    #[test]
    fn test_jitter_bounds() {
        let mut p = policy(0);
        p.jitter = true;
        let mut helper = ReconnectHelper::new(p);
        for _ in 0..20 {
            let delay = helper.mark_failed();
            assert!(delay <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_success_resets() {
        let mut helper = ReconnectHelper::new(policy(0));
        helper.begin_attempt().unwrap();
        helper.mark_failed();
        helper.begin_attempt().unwrap();
        helper.mark_connected();
        assert_eq!(helper.failures(), 0);
        assert!(helper.remaining_backoff().is_none());
        assert_eq!(helper.stats().successful_reconnects, 1);
        assert_eq!(helper.stats().total_attempts, 2);
    }

    #[test]
    fn test_attempt_budget() {
        let mut helper = ReconnectHelper::new(policy(2));
        helper.begin_attempt().unwrap();
        helper.mark_failed();
        helper.begin_attempt().unwrap();
        helper.mark_failed();
        assert_eq!(
            helper.begin_attempt(),
            Err(ReconnectError::MaxAttemptsExceeded)
        );
        assert_eq!(helper.connection_state(), ConnectionState::Failed);
    }

    #[test]
    fn test_attempt_limit_rests_then_starts_over() {
        let mut p = policy(1);
        p.max_delay_ms = 20;
        let mut helper = ReconnectHelper::new(p);
        helper.begin_attempt().unwrap();
        helper.mark_failed();
        assert!(helper.begin_attempt().is_err());

        std::thread::sleep(Duration::from_millis(30));
        helper.begin_attempt().unwrap();
        assert_eq!(helper.failures(), 0);
        assert_eq!(helper.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_long_outage_stays_capped() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy::default());
        for _ in 0..500 {
            let delay = helper.mark_failed();
            assert!(delay <= Duration::from_millis(75_000));
        }
        assert_eq!(helper.failures(), 500);

        let mut p = policy(0);
        p.backoff_multiplier = f64::MAX;
        let mut helper = ReconnectHelper::new(p);
        for _ in 0..10 {
            helper.mark_failed();
        }
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_policy_defaults_from_yaml() {
        let policy: ReconnectPolicy = serde_yaml::from_str("initial_delay_ms: 250\n").unwrap();
        assert_eq!(policy.initial_delay(), Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 0);
        assert!(policy.jitter);
    }
}
