use std::{
    sync::atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire, Release},
    },
    time::Duration,
};

use quanta::{Clock, Instant};
use tracing::warn;

const NO_DEADLINE: u64 = 0;

/// A failure-counting circuit breaker.
///
/// The breaker counts failed writes. Once the count reaches the configured threshold, the circuit opens: the next check
/// arms a deadline `backoff_period` in the future, and every check until that deadline passes reports that the caller
/// should back off. The first check after the deadline closes the circuit again, resetting both the failure count and
/// the deadline.
///
/// Successful writes do not reset the failure count: only the expiry of a backoff window does.
///
/// All state is held in atomics, so a single breaker can be shared between concurrent writers.
#[derive(Debug)]
pub struct CircuitBreaker {
    failures_before_backoff: u64,
    backoff_period: Duration,
    failures: AtomicU64,
    // Nanoseconds since `origin`, or `NO_DEADLINE`.
    deadline: AtomicU64,
    clock: Clock,
    origin: Instant,
}

impl CircuitBreaker {
    /// Creates a new `CircuitBreaker`.
    ///
    /// A `failures_before_backoff` of zero disables the breaker entirely.
    pub fn new(failures_before_backoff: u64, backoff_period: Duration) -> Self {
        Self::with_clock(failures_before_backoff, backoff_period, Clock::new())
    }

    /// Creates a new `CircuitBreaker` driven by the given clock.
    pub fn with_clock(failures_before_backoff: u64, backoff_period: Duration, clock: Clock) -> Self {
        let origin = clock.now();
        Self {
            failures_before_backoff,
            backoff_period,
            failures: AtomicU64::new(0),
            deadline: AtomicU64::new(NO_DEADLINE),
            clock,
            origin,
        }
    }

    fn elapsed_nanos(&self) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Checks whether the caller should back off instead of attempting a write.
    ///
    /// This is where the circuit transitions: reaching the failure threshold arms the backoff deadline, and passing the
    /// deadline resets the breaker.
    pub fn should_backoff(&self) -> bool {
        if self.failures_before_backoff == 0 {
            return false;
        }

        let failures = self.failures.load(Acquire);
        if failures < self.failures_before_backoff {
            return false;
        }

        let now = self.elapsed_nanos();
        let period = u64::try_from(self.backoff_period.as_nanos()).unwrap_or(u64::MAX);
        let candidate = now.saturating_add(period).max(1);

        let deadline = match self.deadline.compare_exchange(NO_DEADLINE, candidate, AcqRel, Acquire) {
            Ok(_) => {
                warn!(
                    failures,
                    backoff_period = ?self.backoff_period,
                    "Too many failures in writing to Graphite, circuit opened."
                );
                candidate
            }
            Err(existing) => existing,
        };

        if now <= deadline {
            return true;
        }

        // Only the caller that clears the deadline resets the failure count.
        if self.deadline.compare_exchange(deadline, NO_DEADLINE, AcqRel, Acquire).is_ok() {
            self.failures.store(0, Release);
        }

        false
    }

    /// Records a failed write, returning the updated failure count.
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, AcqRel) + 1
    }

    /// Returns the current failure count.
    pub fn failures(&self) -> u64 {
        self.failures.load(Acquire)
    }

    /// Returns `true` if a backoff deadline is armed and has not yet passed.
    ///
    /// Unlike [`should_backoff`][CircuitBreaker::should_backoff], this never changes the state of the breaker.
    pub fn is_open(&self) -> bool {
        match self.deadline.load(Acquire) {
            NO_DEADLINE => false,
            deadline => self.elapsed_nanos() <= deadline,
        }
    }

    /// Returns the configured failure threshold.
    pub fn failures_before_backoff(&self) -> u64 {
        self.failures_before_backoff
    }

    /// Returns the configured backoff period.
    pub fn backoff_period(&self) -> Duration {
        self.backoff_period
    }
}
