//! Consecutive-failure circuit breaker for advert processing
//!
//! Sporadic failures (a slow page, a missing element) are tolerated, while a
//! run of failures without enough successes in between trips the breaker.
//! Each success only pays back one failure, so alternating success/failure
//! keeps the consecutive count stable instead of resetting it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerVerdict {
    Closed,
    /// The failure that crossed the threshold; reported once per breaker
    Tripped,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    total_failures: u64,
    total_successes: u64,
    tripped: bool,
}

impl CircuitBreaker {
    pub fn new(max_consecutive_failures: u32) -> Self {
        Self {
            max_consecutive_failures: max_consecutive_failures.max(1),
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            tripped: false,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_sub(1);
        self.total_successes += 1;
    }

    pub fn record_failure(&mut self) -> BreakerVerdict {
        self.consecutive_failures += 1;
        self.total_failures += 1;

        if !self.tripped && self.consecutive_failures >= self.max_consecutive_failures {
            self.tripped = true;
            return BreakerVerdict::Tripped;
        }
        BreakerVerdict::Closed
    }

    pub const fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub const fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub const fn total_successes(&self) -> u64 {
        self.total_successes
    }

    pub const fn threshold(&self) -> u32 {
        self.max_consecutive_failures
    }
}
