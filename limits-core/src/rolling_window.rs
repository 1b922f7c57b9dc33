use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::Reason;
use super::Strategy;
use crate::clock::Clock;
use crate::clock::default_clock;
use crate::error::LimitError;

/// Limits occurrences of an action within any sliding window of one time unit.
///
/// Every reservation is remembered until it expires one time unit later, which
/// gives exact control over the rate without the boundary bursts of a
/// fixed window. Memory grows with the number of outstanding reservations.
#[derive(Debug)]
pub struct RollingWindowThrottler {
    occurrences: u64,
    time_unit: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    remaining: u64,
    // Ordered by expiry, oldest first.
    reservations: VecDeque<Reservation>,
    next_check: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    expires: Instant,
    tokens: u64,
}

impl WindowState {
    fn new(occurrences: u64) -> Self {
        Self {
            remaining: occurrences,
            reservations: VecDeque::new(),
            next_check: None,
        }
    }

    /// Credits back every reservation that expired at or before `now`.
    fn sweep(&mut self, now: Instant) {
        if self.next_check.is_some_and(|check| check > now) {
            return;
        }

        while let Some(front) = self.reservations.front() {
            if front.expires > now {
                break;
            }
            self.remaining += front.tokens;
            self.reservations.pop_front();
        }

        self.next_check = self.reservations.front().map(|r| r.expires);
    }

    #[cfg(test)]
    fn queued(&self) -> u64 {
        self.reservations.iter().map(|r| r.tokens).sum()
    }
}

impl RollingWindowThrottler {
    /// Creates a throttler allowing `occurrences` per `time_unit`.
    ///
    /// # Errors
    ///
    /// Fails with [`LimitError::InvalidArgument`] if either argument is zero.
    pub fn new(occurrences: u64, time_unit: Duration) -> Result<Self, LimitError> {
        if occurrences == 0 {
            return Err(LimitError::invalid(
                "occurrences",
                "number of occurrences must be a positive integer",
            ));
        }
        if time_unit.is_zero() {
            return Err(LimitError::invalid(
                "time_unit",
                "time unit must be positive",
            ));
        }

        Ok(Self {
            occurrences,
            time_unit,
            clock: default_clock(),
            state: Mutex::new(WindowState::new(occurrences)),
        })
    }

    /// Reads time from `clock` instead of the default `quanta` clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }
}

impl Strategy for RollingWindowThrottler {
    fn try_acquire(&self, tokens: u64) -> Result<ControlFlow<Reason>, LimitError> {
        if tokens == 0 {
            return Err(LimitError::invalid("tokens", "must be a positive integer"));
        }
        if tokens > self.occurrences {
            return Ok(ControlFlow::Break(Reason::Overloaded {
                retry_after: self.time_unit,
            }));
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        state.sweep(now);

        if state.remaining >= tokens {
            state.remaining -= tokens;
            let expires = now + self.time_unit;
            state.reservations.push_back(Reservation { expires, tokens });
            state.next_check.get_or_insert(expires);
            return Ok(ControlFlow::Continue(()));
        }

        // Find the reservation whose expiry frees enough tokens.
        let mut freed = state.remaining;
        let mut retry_after = self.time_unit;
        for reservation in &state.reservations {
            freed += reservation.tokens;
            if freed >= tokens {
                retry_after = reservation.expires.saturating_duration_since(now);
                break;
            }
        }

        Ok(ControlFlow::Break(Reason::Overloaded { retry_after }))
    }

    fn max_acquire(&self) -> u64 {
        self.occurrences
    }

    fn available(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.sweep(now);
        state.remaining
    }

    fn reset(&self) {
        *self.state.lock() = WindowState::new(self.occurrences);
    }
}
