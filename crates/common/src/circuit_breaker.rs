//! Circuit breaker guarding the database backend.
//!
//! Every execution call is gated through one shared breaker instance per
//! backend. The breaker tracks a rolling failure ratio and short-circuits
//! calls during sustained backend failure, so a dead database fails fast
//! instead of piling up workers.
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    /// Backend identity, used in log messages.
    #[serde(default = "default_name")]
    pub name: String,
    /// The breaker trips when `consecutive_failures / requests` exceeds
    /// this ratio within the current window.
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    /// Counter window while Closed; requests/failures reset on this
    /// interval.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// How long the breaker stays Open before probing recovery.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Concurrent trial calls admitted while HalfOpen; beyond the cap,
    /// calls are rejected exactly as in Open.
    #[serde(default = "default_max_trial_calls")]
    pub max_trial_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            failure_ratio: default_failure_ratio(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            max_trial_calls: default_max_trial_calls(),
        }
    }
}

fn default_name() -> String {
    "database".to_string()
}
fn default_failure_ratio() -> f64 {
    0.5
}
fn default_window_secs() -> u64 {
    10
}
fn default_cooldown_secs() -> u64 {
    15
}
fn default_max_trial_calls() -> u32 {
    10
}

impl CircuitBreakerConfig {
    fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    requests: u64,
    consecutive_failures: u64,
    window_started: Instant,
    opened_at: Instant,
    trials_in_flight: u32,
}

/// One synchronized breaker shared by all requests against a backend.
///
/// Callers never inspect or mutate counters directly; the only operations
/// are [`admit`](Self::admit), [`record_success`](Self::record_success)
/// and [`record_failure`](Self::record_failure). Every admitted call must
/// record exactly once.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                requests: 0,
                consecutive_failures: 0,
                window_started: now,
                opened_at: now,
                trials_in_flight: 0,
            }),
        }
    }

    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.roll(&mut inner);
        inner.state
    }

    /// Check admission for one call. `Err(BreakerOpen)` is the fast-fail
    /// path and must not touch the backend.
    pub async fn admit(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        self.roll(&mut inner);

        match inner.state {
            CircuitState::Closed => {
                inner.requests += 1;
                Ok(())
            }
            CircuitState::Open => Err(GatewayError::BreakerOpen),
            CircuitState::HalfOpen => {
                if inner.trials_in_flight >= self.config.max_trial_calls {
                    return Err(GatewayError::BreakerOpen);
                }
                inner.trials_in_flight += 1;
                inner.requests += 1;
                Ok(())
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                tracing::info!("circuit breaker {} closed after trial success", self.config.name);
                self.reset_closed(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                // Ratio is undefined while requests == 0.
                if inner.requests > 0
                    && inner.consecutive_failures as f64 / inner.requests as f64
                        > self.config.failure_ratio
                {
                    tracing::warn!(
                        requests = inner.requests,
                        consecutive_failures = inner.consecutive_failures,
                        "circuit breaker {} tripped open",
                        self.config.name
                    );
                    self.trip_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("circuit breaker {} reopened after trial failure", self.config.name);
                self.trip_open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Time-driven transitions: counter window reset while Closed,
    /// Open -> HalfOpen once the cool-down has elapsed.
    fn roll(&self, inner: &mut BreakerInner) {
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                if now.duration_since(inner.window_started) >= self.config.window() {
                    inner.requests = 0;
                    inner.consecutive_failures = 0;
                    inner.window_started = now;
                }
            }
            CircuitState::Open => {
                if now.duration_since(inner.opened_at) >= self.config.cooldown() {
                    tracing::info!("circuit breaker {} probing recovery", self.config.name);
                    inner.state = CircuitState::HalfOpen;
                    inner.requests = 0;
                    inner.consecutive_failures = 0;
                    inner.trials_in_flight = 0;
                }
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn trip_open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Instant::now();
        inner.trials_in_flight = 0;
    }

    fn reset_closed(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.requests = 0;
        inner.consecutive_failures = 0;
        inner.trials_in_flight = 0;
        inner.window_started = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig::default())
    }

    async fn admitted_failure(cb: &CircuitBreaker) {
        cb.admit().await.expect("call should be admitted");
        cb.record_failure().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trips_once_failure_ratio_exceeded() {
        let cb = breaker();

        for _ in 0..3 {
            cb.admit().await.expect("closed breaker admits");
            cb.record_success().await;
        }

        // 4 requests, 1 consecutive failure: 0.25, stays closed.
        admitted_failure(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        // 5 req / 2 cf = 0.4, then 6/3 = 0.5 (not strictly greater).
        admitted_failure(&cb).await;
        admitted_failure(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Closed);

        // 7 req / 4 cf > 0.5 trips the breaker.
        admitted_failure(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(matches!(cb.admit().await, Err(GatewayError::BreakerOpen)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_trips_without_prior_successes() {
        let cb = breaker();
        admitted_failure(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_leads_to_half_open_then_closed() {
        let cb = breaker();
        admitted_failure(&cb).await;
        assert!(cb.admit().await.is_err());

        advance(Duration::from_secs(16)).await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.admit().await.expect("half-open admits a trial");
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens() {
        let cb = breaker();
        admitted_failure(&cb).await;

        advance(Duration::from_secs(16)).await;
        cb.admit().await.expect("trial admitted");
        cb.record_failure().await;

        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.admit().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_caps_concurrent_trials() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            max_trial_calls: 2,
            ..CircuitBreakerConfig::default()
        });
        admitted_failure(&cb).await;

        advance(Duration::from_secs(16)).await;
        cb.admit().await.expect("trial 1");
        cb.admit().await.expect("trial 2");
        assert!(
            matches!(cb.admit().await, Err(GatewayError::BreakerOpen)),
            "calls beyond the trial cap are rejected as open"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_window_resets_counters() {
        let cb = breaker();
        for _ in 0..3 {
            cb.admit().await.expect("admitted");
            cb.record_success().await;
        }

        // After the window resets, history is gone: a single failure is
        // 1/1 and trips immediately.
        advance(Duration::from_secs(11)).await;
        admitted_failure(&cb).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
