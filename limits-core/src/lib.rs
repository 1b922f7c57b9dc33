//! # limits-core
//!
//! `limits-core` is the engine behind request limits: it decides how long an
//! operation has to wait before it may move more bytes, and how many requests
//! may be in flight at once.
//!
//! ## Building Blocks
//!
//! * **Strategies**: [`TokenBucket`] (fixed, step-up and step-down refills) and
//!   [`RollingWindowThrottler`] implement [`Strategy`]. Each guards its state
//!   with its own lock, so independent limiters never contend.
//! * **Rate limiting**: [`RateLimiter`] turns byte counts into token requests
//!   against a strategy sized by a [`Limit`] in bytes per second. It is either
//!   shared by every request (global scope) or built fresh per request.
//! * **Streams**: [`ThrottledStream`] paces reads and writes through a
//!   [`RateLimiter`]; [`TimeoutStream`] fails I/O once its [`Watchdog`] sees no
//!   activity for a deadline.
//! * **Telemetry and admission**: [`MovingAverageCalculator`] samples
//!   throughput; [`ConcurrencyLimiter`] bounds in-flight requests.
//!
//! ## Example
//!
//! ```rust
//! use std::ops::ControlFlow;
//! use std::time::Duration;
//!
//! use limits_core::Strategy;
//! use limits_core::TokenBucket;
//!
//! let bucket = TokenBucket::fixed(10, Duration::from_secs(1)).unwrap();
//!
//! if bucket.try_acquire(4).unwrap().is_continue() {
//!     // 4 tokens reserved
//! }
//! assert!(matches!(bucket.try_acquire(20), Ok(ControlFlow::Break(_))));
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod clock;
mod concurrency;
mod context;
mod error;
mod limit;
mod moving_average;
mod rate_limiter;
mod rolling_window;
mod throttled_stream;
mod timeout_stream;
mod token_bucket;
mod watchdog;

pub use clock::Clock;
pub use clock::QuantaClock;
pub use clock::TokioClock;
pub use concurrency::CapacityExceeded;
pub use concurrency::ConcurrencyLimiter;
pub use concurrency::ConcurrencyPermit;
pub use context::ConnectionInfo;
pub use context::Principal;
pub use context::RequestContext;
pub use error::LimitError;
pub use error::StreamTimedOut;
pub use error::is_timeout;
pub use limit::Limit;
pub use moving_average::DEFAULT_SAMPLING_INTERVAL;
pub use moving_average::MovingAverageCalculator;
pub use moving_average::RequestGuard;
pub use moving_average::Throughput;
pub use rate_limiter::Algorithm;
pub use rate_limiter::Participant;
pub use rate_limiter::RateLimiter;
pub use rate_limiter::Scope;
pub use rolling_window::RollingWindowThrottler;
pub use throttled_stream::ThrottledStream;
pub use timeout_stream::TimeoutStream;
pub use token_bucket::Refill;
pub use token_bucket::TokenBucket;
pub use watchdog::Watchdog;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

impl Reason {
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::Overloaded { retry_after } => *retry_after,
        }
    }
}

/// The core trait for all throttling algorithms.
///
/// Strategies must be `Send` and `Sync` to allow sharing across thread boundaries
/// via `Arc`.
pub trait Strategy: Debug + Send + Sync {
    /// Attempts to reserve `tokens` tokens.
    ///
    /// `Continue` means the tokens were deducted. `Break` means the caller should
    /// throttle; nothing was deducted and the reason carries the suggested wait.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError::InvalidArgument`] if `tokens` is zero.
    fn try_acquire(&self, tokens: u64) -> Result<ControlFlow<Reason>, LimitError>;

    /// The largest number of tokens a single [`Strategy::try_acquire`] call can
    /// ever be granted.
    fn max_acquire(&self) -> u64;

    /// Tokens that could be reserved right now.
    fn available(&self) -> u64;

    /// Returns the strategy to its initial, unused state.
    fn reset(&self);
}
