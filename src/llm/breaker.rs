//! Circuit breaker guarding each LLM provider.
//!
//! Closed until 5 consecutive failures land within 60 s; then open for 30 s;
//! then half-open, admitting a single probe. Probe success closes the
//! breaker, probe failure reopens it.

use std::sync::Mutex;

use tokio::time::{Duration, Instant};

/// Breaker configuration; constants live here, not in code paths.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed {
        failures: u32,
        window_start: Option<Instant>,
    },
    Open {
        until: Instant,
    },
    HalfOpen {
        probe_in_flight: bool,
    },
}

/// Circuit breaker state machine (closed / open / half-open).
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::Closed {
                failures: 0,
                window_start: None,
            }),
        }
    }

    /// Ask to send a request through this breaker.
    ///
    /// Returns false while the breaker is open or a half-open probe is
    /// already in flight.
    pub fn try_acquire(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match *state {
            State::Closed { .. } => true,
            State::Open { until } => {
                if Instant::now() >= until {
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { probe_in_flight } => {
                if probe_in_flight {
                    false
                } else {
                    *state = State::HalfOpen {
                        probe_in_flight: true,
                    };
                    true
                }
            }
        }
    }

    /// Release a half-open probe slot without recording an outcome.
    ///
    /// Used when the caller claimed the probe but never reached the
    /// provider (rate-limit wait exceeded the deadline).
    pub fn cancel_probe(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let State::HalfOpen { probe_in_flight } = *state {
            if probe_in_flight {
                *state = State::HalfOpen {
                    probe_in_flight: false,
                };
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = State::Closed {
            failures: 0,
            window_start: None,
        };
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match *state {
            State::Closed {
                failures,
                window_start,
            } => {
                let now = Instant::now();
                // Failures outside the window restart the count.
                let (failures, window_start) = match window_start {
                    Some(start) if now.duration_since(start) <= self.config.failure_window => {
                        (failures + 1, start)
                    }
                    _ => (1, now),
                };

                if failures >= self.config.failure_threshold {
                    *state = State::Open {
                        until: now + self.config.open_duration,
                    };
                } else {
                    *state = State::Closed {
                        failures,
                        window_start: Some(window_start),
                    };
                }
            }
            State::HalfOpen { .. } => {
                *state = State::Open {
                    until: Instant::now() + self.config.open_duration,
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Human-readable state for health reporting.
    pub fn state_name(&self) -> &'static str {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *state {
            State::Closed { .. } => "closed",
            State::Open { until } => {
                if Instant::now() >= until {
                    "half-open"
                } else {
                    "open"
                }
            }
            State::HalfOpen { .. } => "half-open",
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
