use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tracing::trace;

/// Rejection returned when the in-flight ceiling would be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{in_flight} requests in flight exceeds the ceiling of {ceiling}")]
pub struct CapacityExceeded {
    pub in_flight: usize,
    pub ceiling: i64,
}

/// Counts requests in flight and admits new ones while under a ceiling.
///
/// The ceiling is passed on every call so it can be resolved per request. A
/// ceiling of zero or less admits everything, but admitted requests are still
/// counted.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyLimiter {
    in_flight: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, ceiling: i64) -> Result<ConcurrencyPermit, CapacityExceeded> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        let permit = ConcurrencyPermit {
            in_flight: Arc::clone(&self.in_flight),
        };

        if ceiling > 0 && in_flight as u64 > ceiling as u64 {
            // Dropping the permit gives the slot back.
            drop(permit);
            trace!(in_flight, ceiling, "concurrency ceiling reached");
            return Err(CapacityExceeded { in_flight, ceiling });
        }
        Ok(permit)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// A slot held by an admitted request. Dropping it frees the slot.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
