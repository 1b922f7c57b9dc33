use std::fmt::Debug;
use std::sync::Arc;

use tokio::time::Instant;

/// A source of the current time.
///
/// Strategies read time through this trait so tests can substitute a manual
/// clock. All clocks report [`tokio::time::Instant`], which lets waits computed
/// from them feed straight into [`tokio::time::sleep`].
pub trait Clock: Debug + Send + Sync {
    fn now(&self) -> Instant;
}

/// High resolution clock backed by `quanta`.
///
/// Readings are taken from the TSC where available and projected onto a
/// `tokio::time::Instant` anchor captured at construction.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    anchor: quanta::Instant,
    base: Instant,
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::from_clock(quanta::Clock::new())
    }

    /// A clock that only moves when the returned [`quanta::Mock`] is incremented.
    pub fn mock() -> (Self, Arc<quanta::Mock>) {
        let (clock, mock) = quanta::Clock::mock();
        (Self::from_clock(clock), mock)
    }

    fn from_clock(clock: quanta::Clock) -> Self {
        let anchor = clock.now();
        Self {
            clock,
            anchor,
            base: Instant::now(),
        }
    }
}

impl Default for QuantaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for QuantaClock {
    #[inline]
    fn now(&self) -> Instant {
        self.base + self.clock.now().saturating_duration_since(self.anchor)
    }
}

/// Clock reading `tokio::time::Instant::now()`.
///
/// Follows tokio's paused time, so `tokio::time::advance` and auto-advance in
/// `#[tokio::test(start_paused = true)]` tests move it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(QuantaClock::new())
}
