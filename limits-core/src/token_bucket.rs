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

/// How a [`TokenBucket`] regains tokens within its refill interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// Refill to capacity once per interval.
    Fixed,
    /// Start each interval with `step_tokens` and gain `step_tokens` for every
    /// elapsed `step_interval`. No interval releases more than capacity in total.
    StepUp {
        step_tokens: u64,
        step_interval: Duration,
    },
    /// Start each interval at capacity, but never hold more tokens than the
    /// remaining steps before the next refill could hand out.
    StepDown {
        step_tokens: u64,
        step_interval: Duration,
    },
}

/// A token bucket guarded by a mutex.
///
/// The bucket fills up lazily: tokens are recalculated when they are asked for,
/// so there is no background timer. Whatever the refill, at most `capacity`
/// tokens are granted per refill interval.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_interval: Duration,
    refill: Refill,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

#[derive(Debug, Default)]
struct BucketState {
    tokens: u64,
    // None until the first request, which fills the bucket.
    next_refill: Option<Instant>,
    last_step: Option<Instant>,
    // Tokens put into the bucket since the last refill.
    released: u64,
}

impl TokenBucket {
    /// Creates a bucket that refills completely every `refill_interval`.
    pub fn fixed(capacity: u64, refill_interval: Duration) -> Result<Self, LimitError> {
        Self::new(capacity, refill_interval, Refill::Fixed)
    }

    /// Creates a bucket that starts each interval with `step_tokens` and grows
    /// by `step_tokens` every `step_interval`.
    pub fn step_up(
        capacity: u64,
        refill_interval: Duration,
        step_tokens: u64,
        step_interval: Duration,
    ) -> Result<Self, LimitError> {
        Self::new(
            capacity,
            refill_interval,
            Refill::StepUp {
                step_tokens,
                step_interval,
            },
        )
    }

    /// Creates a bucket that starts each interval full and shrinks by
    /// `step_tokens` every `step_interval`.
    pub fn step_down(
        capacity: u64,
        refill_interval: Duration,
        step_tokens: u64,
        step_interval: Duration,
    ) -> Result<Self, LimitError> {
        Self::new(
            capacity,
            refill_interval,
            Refill::StepDown {
                step_tokens,
                step_interval,
            },
        )
    }

    /// Creates a new `TokenBucket`.
    ///
    /// # Errors
    ///
    /// Fails with [`LimitError::InvalidArgument`] if `capacity` or `refill_interval`
    /// is zero, or if a stepped refill has zero step tokens or a zero step interval.
    pub fn new(capacity: u64, refill_interval: Duration, refill: Refill) -> Result<Self, LimitError> {
        if capacity == 0 {
            return Err(LimitError::invalid(
                "capacity",
                "bucket token capacity must be positive",
            ));
        }
        if refill_interval.is_zero() {
            return Err(LimitError::invalid(
                "refill_interval",
                "refill interval must be positive",
            ));
        }
        if let Refill::StepUp {
            step_tokens,
            step_interval,
        }
        | Refill::StepDown {
            step_tokens,
            step_interval,
        } = refill
        {
            if step_tokens == 0 {
                return Err(LimitError::invalid(
                    "step_tokens",
                    "step tokens must be positive",
                ));
            }
            if step_interval.is_zero() {
                return Err(LimitError::invalid(
                    "step_interval",
                    "step interval must be positive",
                ));
            }
        }

        Ok(Self {
            capacity,
            refill_interval,
            refill,
            clock: default_clock(),
            state: Mutex::new(BucketState::default()),
        })
    }

    /// Reads time from `clock` instead of the default `quanta` clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    /// The tokens currently in the bucket, after applying any refill that is due.
    pub fn current_token_count(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.update(&mut state, now);
        state.tokens
    }

    fn update(&self, state: &mut BucketState, now: Instant) {
        let due = state.next_refill.is_none_or(|next| now >= next);
        if due {
            state.tokens = match self.refill {
                Refill::StepUp { step_tokens, .. } => step_tokens.min(self.capacity),
                Refill::Fixed | Refill::StepDown { .. } => self.capacity,
            };
            state.released = state.tokens;
            state.next_refill = Some(now + self.refill_interval);
            state.last_step = Some(now);
            return;
        }

        match self.refill {
            Refill::Fixed => {}
            Refill::StepUp {
                step_tokens,
                step_interval,
            } => {
                let last = state.last_step.unwrap_or(now);
                let step_ns = step_interval.as_nanos();
                let steps = now.saturating_duration_since(last).as_nanos() / step_ns;
                if steps > 0 {
                    let gained = u64::try_from(steps)
                        .unwrap_or(u64::MAX)
                        .saturating_mul(step_tokens)
                        .min(self.capacity.saturating_sub(state.released));
                    state.released += gained;
                    state.tokens = state.tokens.saturating_add(gained).min(self.capacity);
                    // Only move forward by whole steps, the remainder counts towards the next one.
                    state.last_step = Some(last + Duration::from_nanos((steps * step_ns) as u64));
                }
            }
            Refill::StepDown {
                step_tokens,
                step_interval,
            } => {
                let Some(next) = state.next_refill else {
                    return;
                };
                let steps_left = next
                    .saturating_duration_since(now)
                    .as_nanos()
                    .div_ceil(step_interval.as_nanos());
                let ceiling = u64::try_from(steps_left)
                    .unwrap_or(u64::MAX)
                    .saturating_mul(step_tokens);
                if ceiling < state.tokens {
                    state.tokens = ceiling;
                }
            }
        }
    }

    fn wait(&self, state: &BucketState, now: Instant) -> Duration {
        let until_refill = state
            .next_refill
            .map_or(Duration::ZERO, |next| next.saturating_duration_since(now));
        match self.refill {
            // Nothing more is released before the refill.
            Refill::StepUp { .. } if state.released >= self.capacity => until_refill,
            Refill::StepUp { step_interval, .. } => state
                .last_step
                .map_or(until_refill, |last| {
                    (last + step_interval).saturating_duration_since(now)
                })
                .min(until_refill),
            Refill::Fixed | Refill::StepDown { .. } => until_refill,
        }
    }
}

impl Strategy for TokenBucket {
    fn try_acquire(&self, tokens: u64) -> Result<ControlFlow<Reason>, LimitError> {
        if tokens == 0 {
            return Err(LimitError::invalid("tokens", "must be a positive integer"));
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.update(&mut state, now);

        if state.tokens >= tokens {
            state.tokens -= tokens;
            Ok(ControlFlow::Continue(()))
        } else {
            Ok(ControlFlow::Break(Reason::Overloaded {
                retry_after: self.wait(&state, now),
            }))
        }
    }

    fn max_acquire(&self) -> u64 {
        match self.refill {
            Refill::Fixed => self.capacity,
            Refill::StepUp { step_tokens, .. } | Refill::StepDown { step_tokens, .. } => {
                step_tokens.min(self.capacity)
            }
        }
    }

    fn available(&self) -> u64 {
        self.current_token_count()
    }

    fn reset(&self) {
        *self.state.lock() = BucketState::default();
    }
}
