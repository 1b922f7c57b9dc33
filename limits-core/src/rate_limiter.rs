use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::Reason;
use crate::Strategy;
use crate::clock::Clock;
use crate::clock::default_clock;
use crate::error::LimitError;
use crate::limit::Limit;
use crate::rolling_window::RollingWindowThrottler;
use crate::token_bucket::TokenBucket;

/// Limits are expressed in bytes per second, so every strategy uses a one second window.
const WINDOW: Duration = Duration::from_secs(1);

/// The strategy a [`RateLimiter`] builds for its current limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// A [`TokenBucket`] refilled once per second.
    #[default]
    FixedWindow,
    /// A step-up [`TokenBucket`] that releases the budget in `steps` parts over the second.
    StepUp { steps: NonZeroU32 },
    /// A step-down [`TokenBucket`] whose budget shrinks in `steps` parts over the second.
    StepDown { steps: NonZeroU32 },
    /// A [`RollingWindowThrottler`] over a sliding one second window.
    RollingWindow,
}

impl Algorithm {
    fn build(self, bytes_per_second: u64, clock: Arc<dyn Clock>) -> Result<Arc<dyn Strategy>, LimitError> {
        let strategy: Arc<dyn Strategy> = match self {
            Self::FixedWindow => {
                Arc::new(TokenBucket::fixed(bytes_per_second, WINDOW)?.with_clock(clock))
            }
            Self::StepUp { steps } => {
                let (step_tokens, step_interval) = split(bytes_per_second, steps);
                Arc::new(
                    TokenBucket::step_up(bytes_per_second, WINDOW, step_tokens, step_interval)?
                        .with_clock(clock),
                )
            }
            Self::StepDown { steps } => {
                let (step_tokens, step_interval) = split(bytes_per_second, steps);
                Arc::new(
                    TokenBucket::step_down(bytes_per_second, WINDOW, step_tokens, step_interval)?
                        .with_clock(clock),
                )
            }
            Self::RollingWindow => Arc::new(
                RollingWindowThrottler::new(bytes_per_second, WINDOW)?.with_clock(clock),
            ),
        };
        Ok(strategy)
    }
}

/// Step size and step interval for a stepped bucket over [`WINDOW`].
///
/// There are never more steps than bytes, and the interval rounds up, so the
/// steps released within one window never add up to more than the rate.
fn split(bytes_per_second: u64, steps: NonZeroU32) -> (u64, Duration) {
    let steps = u64::from(steps.get()).min(bytes_per_second).max(1);
    let step_nanos = WINDOW.as_nanos().div_ceil(u128::from(steps));
    (
        bytes_per_second / steps,
        Duration::from_nanos(u64::try_from(step_nanos).unwrap_or(u64::MAX)),
    )
}

/// Whether a limiter is shared by all requests or owned by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    PerRequest,
}

/// Paces byte transfers against a bytes-per-second budget.
///
/// A limit of zero or less means unlimited. The limit is re-evaluated on every
/// reservation; when it changes a fresh strategy is built for the new value.
///
/// Global limiters are shared through an `Arc`. Requests bracket their use with
/// [`RateLimiter::register`], and the strategy is reset once the last
/// [`Participant`] is dropped.
#[derive(Debug)]
pub struct RateLimiter {
    scope: Scope,
    bytes_per_second: Limit<i64>,
    algorithm: Algorithm,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Current>>,
    participants: AtomicUsize,
}

#[derive(Debug)]
struct Current {
    bytes_per_second: u64,
    strategy: Arc<dyn Strategy>,
}

impl RateLimiter {
    /// A limiter meant to be shared by every request.
    ///
    /// `bytes_per_second` is resolved without a request context on each reservation.
    pub fn global(bytes_per_second: Limit<i64>) -> Self {
        Self::new(Scope::Global, bytes_per_second)
    }

    /// A limiter owned by a single request, with the limit already resolved.
    pub fn per_request(bytes_per_second: i64) -> Self {
        Self::new(Scope::PerRequest, Limit::fixed(bytes_per_second))
    }

    fn new(scope: Scope, bytes_per_second: Limit<i64>) -> Self {
        Self {
            scope,
            bytes_per_second,
            algorithm: Algorithm::default(),
            clock: default_clock(),
            current: Mutex::new(None),
            participants: AtomicUsize::new(0),
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Number of live [`Participant`]s.
    pub fn participants(&self) -> usize {
        self.participants.load(Ordering::Acquire)
    }

    /// Attaches a request to this limiter until the returned guard is dropped.
    pub fn register(self: &Arc<Self>) -> Participant {
        let count = self.participants.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(scope = ?self.scope, participants = count, "participant registered");
        Participant {
            limiter: Arc::clone(self),
        }
    }

    /// The largest number of bytes a single reservation can be granted, or
    /// `None` while the limiter is unlimited.
    pub fn chunk_size(&self) -> Option<usize> {
        self.strategy()
            .map(|strategy| usize::try_from(strategy.max_acquire()).unwrap_or(usize::MAX))
    }

    /// Tries to reserve up to `bytes` bytes.
    ///
    /// `Continue(granted)` carries how many bytes may be transferred now, which is
    /// at most [`RateLimiter::chunk_size`]. `Break` carries how long to wait before
    /// asking again.
    pub fn reserve(&self, bytes: usize) -> ControlFlow<Reason, usize> {
        if bytes == 0 {
            return ControlFlow::Continue(0);
        }
        let Some(strategy) = self.strategy() else {
            return ControlFlow::Continue(bytes);
        };

        let want = (bytes as u64).min(strategy.max_acquire());
        // `want` never exceeds `bytes`, so it fits a usize.
        let granted = want as usize;
        match strategy.try_acquire(want) {
            Ok(ControlFlow::Continue(())) => ControlFlow::Continue(granted),
            // A wait of zero means the tokens are due now; do not stall on clock skew.
            Ok(ControlFlow::Break(reason)) if reason.retry_after().is_zero() => {
                ControlFlow::Continue(granted)
            }
            Ok(ControlFlow::Break(reason)) => {
                trace!(
                    scope = ?self.scope,
                    bytes = want,
                    retry_after = ?reason.retry_after(),
                    "throttling"
                );
                ControlFlow::Break(reason)
            }
            Err(error) => {
                warn!(%error, "strategy refused the reservation; not throttling");
                ControlFlow::Continue(granted)
            }
        }
    }

    /// Waits until `bytes` bytes have been reserved.
    ///
    /// Large requests are reserved chunk by chunk. Dropping the future abandons the
    /// wait; bytes reserved so far stay spent.
    pub async fn throttle(&self, bytes: usize) {
        let mut remaining = bytes;
        while remaining > 0 {
            match self.reserve(remaining) {
                ControlFlow::Continue(granted) => remaining -= granted,
                ControlFlow::Break(reason) => tokio::time::sleep(reason.retry_after()).await,
            }
        }
    }

    /// Blocking version of [`RateLimiter::throttle`] for synchronous I/O.
    pub fn throttle_blocking(&self, bytes: usize) {
        let mut remaining = bytes;
        while remaining > 0 {
            match self.reserve(remaining) {
                ControlFlow::Continue(granted) => remaining -= granted,
                ControlFlow::Break(reason) => std::thread::sleep(reason.retry_after()),
            }
        }
    }

    /// Drops the current strategy; the next reservation starts from a full budget.
    pub fn reset(&self) {
        if self.current.lock().take().is_some() {
            debug!(scope = ?self.scope, "rate limiter reset");
        }
    }

    fn strategy(&self) -> Option<Arc<dyn Strategy>> {
        let limit = self.bytes_per_second.resolve(None);
        let mut current = self.current.lock();

        let bytes_per_second = match u64::try_from(limit) {
            Ok(value) if value > 0 => value,
            _ => {
                *current = None;
                return None;
            }
        };

        if let Some(existing) = current
            .as_ref()
            .filter(|existing| existing.bytes_per_second == bytes_per_second)
        {
            return Some(Arc::clone(&existing.strategy));
        }

        match self
            .algorithm
            .build(bytes_per_second, Arc::clone(&self.clock))
        {
            Ok(strategy) => {
                debug!(
                    scope = ?self.scope,
                    algorithm = ?self.algorithm,
                    bytes_per_second,
                    "rate limit configured"
                );
                *current = Some(Current {
                    bytes_per_second,
                    strategy: Arc::clone(&strategy),
                });
                Some(strategy)
            }
            Err(error) => {
                warn!(%error, bytes_per_second, "cannot build rate limit strategy; not throttling");
                *current = None;
                None
            }
        }
    }
}

/// Keeps a request attached to a shared [`RateLimiter`].
#[derive(Debug)]
pub struct Participant {
    limiter: Arc<RateLimiter>,
}

impl Participant {
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        if self.limiter.participants.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.limiter.reset();
        }
    }
}
