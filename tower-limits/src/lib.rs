//! # Tower Limits
//!
//! `tower-limits` applies the limits from [`limits_core`] to HTTP services built
//! on the [Tower](https://github.com/tower-rs/tower) ecosystem.
//!
//! ## Layers
//!
//! 1. **Bandwidth**: [`MaxBandwidthLayer`] paces request and response bodies,
//!    either against one budget shared by every request or a budget per request.
//! 2. **Concurrency**: [`MaxConcurrentRequestsLayer`] rejects requests with
//!    [`LimitsError::ServiceUnavailable`] while too many are in flight.
//! 3. **Timeouts**: [`ConnectionTimeoutLayer`] fails bodies that see no activity
//!    before a deadline.
//! 4. **Delay**: [`MinResponseDelayLayer`] holds requests for a minimum time.
//!
//! Every limit is a [`limits_core::Limit`], either fixed or resolved from the
//! request. [`ServiceBuilderExt`] adds the layers to a `tower::ServiceBuilder`.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`LimitsError`], allowing automatic conversion
//!   to HTTP status codes (408, 503, 500).

mod bandwidth;
mod body;
mod concurrency;
mod delay;
mod error;
mod timeout;
mod utils;

#[cfg(test)]
mod tests;

pub use bandwidth::MaxBandwidth;
pub use bandwidth::MaxBandwidthLayer;
pub use body::PermitBody;
pub use body::ThrottledBody;
pub use body::TimeoutBody;
pub use concurrency::MaxConcurrentRequests;
pub use concurrency::MaxConcurrentRequestsLayer;
pub use delay::MinResponseDelay;
pub use delay::MinResponseDelayLayer;
pub use error::LimitsError;
pub use timeout::ConnectionTimeout;
pub use timeout::ConnectionTimeoutLayer;
pub use utils::ServiceBuilderExt;
