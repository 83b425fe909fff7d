//! Circuit breaker protecting the LLM and TTS upstreams.
//!
//! CLOSED passes traffic through and counts failures inside a rolling
//! window; crossing the threshold OPENs the circuit, which short-circuits to
//! the caller's fallback until the cool-down expires. HALF_OPEN admits a
//! single probe; its outcome decides between CLOSED and another OPEN period.

use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables for one upstream's breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures within `failure_window` that open the circuit.
    pub failure_threshold: u32,
    /// Window in which failures must accumulate to count as consecutive.
    pub failure_window: Duration,
    /// How long the circuit stays open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    first_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    probe_outstanding: bool,
    total_calls: u64,
    total_failures: u64,
}

/// Snapshot for the operator endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub seconds_until_probe: Option<u64>,
}

/// Per-upstream circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                first_failure_at: None,
                opened_at: None,
                probe_outstanding: false,
                total_calls: 0,
                total_failures: 0,
            }),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    /// Ask permission to call the upstream. `false` means fall back now.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.total_calls += 1;
                true
            }
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);
                if expired {
                    info!(
                        target: "voxant::breaker",
                        name = self.name.as_str(),
                        "cooldown expired, allowing probe"
                    );
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_outstanding = true;
                    inner.total_calls += 1;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                // One probe at a time
                if inner.probe_outstanding {
                    false
                } else {
                    inner.probe_outstanding = true;
                    inner.total_calls += 1;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                info!(
                    target: "voxant::breaker",
                    name = self.name.as_str(),
                    "probe succeeded, closing circuit"
                );
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.first_failure_at = None;
                inner.opened_at = None;
                inner.probe_outstanding = false;
            }
            BreakerState::Closed => {
                inner.failure_count = 0;
                inner.first_failure_at = None;
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.total_failures += 1;

        match inner.state {
            BreakerState::HalfOpen => {
                warn!(
                    target: "voxant::breaker",
                    name = self.name.as_str(),
                    "probe failed, reopening circuit"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_outstanding = false;
            }
            BreakerState::Closed => {
                let now = Instant::now();
                let window_expired = inner
                    .first_failure_at
                    .map(|t| now.duration_since(t) > self.config.failure_window)
                    .unwrap_or(true);
                if window_expired {
                    inner.failure_count = 1;
                    inner.first_failure_at = Some(now);
                } else {
                    inner.failure_count += 1;
                }

                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        target: "voxant::breaker",
                        name = self.name.as_str(),
                        failures = inner.failure_count,
                        "failure threshold reached, opening circuit"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        let seconds_until_probe = match inner.state {
            BreakerState::Open => inner.opened_at.map(|t| {
                self.config
                    .cooldown
                    .saturating_sub(t.elapsed())
                    .as_secs()
            }),
            _ => None,
        };
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            seconds_until_probe,
        }
    }
}
