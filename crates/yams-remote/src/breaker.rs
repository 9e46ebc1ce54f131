//! Failure-ratio and consecutive-failure circuit breaker.
//!
//! `Closed` lets every call through and counts outcomes. The breaker trips to
//! `Open` when the failure ratio reaches `max_failure_ratio` (once at least
//! `min_requests` calls were counted) or when consecutive failures exceed
//! `max_consecutive_failures`. After `open_timeout` it moves to `HalfOpen` and
//! admits a single probe: success closes it, failure reopens it. Counts reset
//! on every state change and every `counter_reset_interval` while closed.
//!
//! Each transport owns its own breaker so parallel tests never share state.

use crate::RemoteError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub name: String,
    pub max_consecutive_failures: u32,
    pub max_failure_ratio: f64,
    pub min_requests: u32,
    pub open_timeout: Duration,
    /// Zero disables periodic resets while closed.
    pub counter_reset_interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            name: "yams".to_owned(),
            max_consecutive_failures: 5,
            max_failure_ratio: 0.6,
            min_requests: 1,
            open_timeout: Duration::from_secs(30),
            counter_reset_interval: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), RemoteError> {
        if !(0.0..=1.0).contains(&self.max_failure_ratio) {
            return Err(RemoteError::Config(format!(
                "circuit breaker '{}': failure ratio {} is outside [0, 1]",
                self.name, self.max_failure_ratio
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BreakerError {
    #[error("circuit breaker is open")]
    Open,
    #[error("circuit breaker is half-open and its probe is in flight")]
    TooMany,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let breaker = Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
        };
        {
            let mut inner = breaker.lock();
            breaker.new_generation(&mut inner, Instant::now());
        }
        breaker
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    /// Ask to make a call. The returned permit must be settled with
    /// [`Permit::success`] or [`Permit::failure`]; dropping it counts as failure.
    pub fn acquire(&self) -> Result<Permit<'_>, BreakerError> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        match inner.state {
            BreakerState::Open => Err(BreakerError::Open),
            BreakerState::HalfOpen if inner.counts.requests >= 1 => Err(BreakerError::TooMany),
            BreakerState::Closed | BreakerState::HalfOpen => {
                inner.counts.requests += 1;
                Ok(Permit {
                    breaker: self,
                    generation: inner.generation,
                    settled: false,
                })
            }
        }
    }

    /// Run `f` under the breaker. `Err(BreakerError)` means `f` never ran.
    pub fn execute<T, E>(
        &self,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<Result<T, E>, BreakerError> {
        let permit = self.acquire()?;
        let result = f();
        if result.is_ok() {
            permit.success();
        } else {
            permit.failure();
        }
        Ok(result)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, generation: u64, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if generation != inner.generation {
            debug!(
                breaker = %self.config.name,
                "ignoring outcome from a previous generation"
            );
            return;
        }

        if success {
            inner.counts.on_success();
            if inner.state == BreakerState::HalfOpen {
                self.set_state(&mut inner, BreakerState::Closed, now);
            }
        } else {
            inner.counts.on_failure();
            match inner.state {
                BreakerState::Closed if self.ready_to_trip(&inner.counts) => {
                    self.set_state(&mut inner, BreakerState::Open, now);
                }
                BreakerState::HalfOpen => {
                    self.set_state(&mut inner, BreakerState::Open, now);
                }
                _ => {}
            }
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        let ratio_tripped = counts.requests >= self.config.min_requests.max(1)
            && f64::from(counts.total_failures) / f64::from(counts.requests)
                >= self.config.max_failure_ratio;
        ratio_tripped || counts.consecutive_failures > self.config.max_consecutive_failures
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn set_state(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        if inner.state == state {
            return;
        }
        info!(
            breaker = %self.config.name,
            "circuit breaker {} -> {state}",
            inner.state
        );
        inner.state = state;
        self.new_generation(inner, now);
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed if self.config.counter_reset_interval.is_zero() => None,
            BreakerState::Closed => Some(now + self.config.counter_reset_interval),
            BreakerState::Open => Some(now + self.config.open_timeout),
            BreakerState::HalfOpen => None,
        };
    }
}

/// Admission ticket for one call through a [`CircuitBreaker`].
#[must_use = "a permit must be settled with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, false);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, false);
        }
    }
}
