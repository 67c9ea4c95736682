use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use tokio::time::Instant;

use crate::ResilienceError;

/// An externally visible view of a breaker's state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed {
        /// Failures seen since the last success
        consecutive_failures: u32,
    },
    /// Calls fail immediately without being attempted
    Open,
    /// The cool-down elapsed and a single trial call may go through
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Stops issuing calls after consecutive failures until a cool-down elapses
///
/// Clones share state, so the handle kept by a
/// [`PolicyChain`](crate::PolicyChain) observes the breaker installed in the
/// client. A call counts as failed when it returns an error, a 5xx or 429
/// response, or is dropped before completing (for example, by an outer
/// timeout).
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    state: Arc<Mutex<State>>,
}

impl CircuitBreaker {
    /// Constructs a closed breaker
    ///
    /// A `threshold` of zero is treated as one.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            state: Arc::new(Mutex::new(State::Closed { failures: 0 })),
        }
    }

    /// The current state
    pub fn state(&self) -> CircuitState {
        match *self.lock() {
            State::Closed { failures } => CircuitState::Closed {
                consecutive_failures: failures,
            },
            State::Open { until } if Instant::now() < until => CircuitState::Open,
            State::Open { .. } | State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn try_acquire(&self) -> std::result::Result<Permit<'_>, ResilienceError> {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => {}
            State::Open { until } if Instant::now() >= until => {
                tracing::debug!("circuit breaker half-open, admitting trial call");
                *state = State::HalfOpen {
                    trial_in_flight: true,
                };
            }
            State::HalfOpen {
                trial_in_flight: false,
            } => {
                *state = State::HalfOpen {
                    trial_in_flight: true,
                };
            }
            State::Open { .. } | State::HalfOpen { .. } => {
                tracing::trace!("circuit breaker rejected call");
                return Err(ResilienceError::CircuitOpen);
            }
        }

        Ok(Permit {
            breaker: self,
            settled: false,
        })
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if !matches!(*state, State::Closed { failures: 0 }) {
            tracing::debug!("circuit breaker closed");
        }
        *state = State::Closed { failures: 0 };
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        let next = match *state {
            State::Closed { failures } if failures + 1 < self.threshold => State::Closed {
                failures: failures + 1,
            },
            State::Closed { .. } | State::HalfOpen { .. } => {
                tracing::warn!(
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "circuit breaker opened"
                );
                State::Open {
                    until: Instant::now() + self.cooldown,
                }
            }
            open @ State::Open { .. } => open,
        };
        *state = next;
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, failed: bool) {
        self.settled = true;
        if failed {
            self.breaker.record_failure();
        } else {
            self.breaker.record_success();
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("call abandoned before completion, counting as failure");
            self.breaker.record_failure();
        }
    }
}

fn counts_as_failure(result: &Result<Response>) -> bool {
    match result {
        Ok(resp) => {
            resp.status().is_server_error()
                || resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
        }
        Err(_) => true,
    }
}

#[async_trait::async_trait]
impl Middleware for CircuitBreaker {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let permit = self.try_acquire()?;
        let result = next.run(req, extensions).await;
        permit.settle(counts_as_failure(&result));
        result
    }
}
