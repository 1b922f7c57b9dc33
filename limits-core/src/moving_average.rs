use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::trace;

/// Default time between two throughput samples.
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(1000);

/// A throughput sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes_per_second: f64,
    /// `f64::MAX` while no request is registered.
    pub bytes_per_second_per_request: f64,
}

impl Default for Throughput {
    fn default() -> Self {
        Self {
            bytes_per_second: 0.0,
            bytes_per_second_per_request: f64::MAX,
        }
    }
}

#[derive(Debug)]
struct Shared {
    bytes_written: AtomicU64,
    requests: AtomicU64,
    sender: watch::Sender<Throughput>,
}

impl Shared {
    fn sample(&self, elapsed: Duration) {
        let bytes = self.bytes_written.swap(0, Ordering::AcqRel);
        let seconds = elapsed.as_secs_f64();
        let bytes_per_second = if seconds > 0.0 {
            bytes as f64 / seconds
        } else {
            0.0
        };
        let requests = self.requests.load(Ordering::Acquire);
        let bytes_per_second_per_request = if requests == 0 {
            f64::MAX
        } else {
            bytes_per_second / requests as f64
        };

        trace!(bytes, ?elapsed, bytes_per_second, requests, "throughput sampled");
        self.sender.send_replace(Throughput {
            bytes_per_second,
            bytes_per_second_per_request,
        });
    }
}

/// Samples the bytes written per second, overall and per concurrent request.
///
/// A background task wakes up every sampling interval and divides the bytes
/// recorded since the previous sample by the time that actually passed, which is
/// usually a little longer than the interval. Each sample is published on a
/// [`watch`] channel, see [`MovingAverageCalculator::subscribe`].
///
/// Must be created inside a Tokio runtime. Dropping it stops the sampling task.
#[derive(Debug)]
pub struct MovingAverageCalculator {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MovingAverageCalculator {
    pub fn new(sampling_interval: Duration) -> Self {
        let (sender, _) = watch::channel(Throughput::default());
        let shared = Arc::new(Shared {
            bytes_written: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            sender,
        });

        let start = Instant::now();
        let sampler = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start + sampling_interval, sampling_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut stopwatch = start;
            loop {
                ticker.tick().await;
                let now = Instant::now();
                sampler.sample(now.saturating_duration_since(stopwatch));
                stopwatch = now;
            }
        });

        Self { shared, task }
    }

    /// Adds bytes to the counter drained by the next sample.
    pub fn bytes_written(&self, count: u64) {
        self.shared.bytes_written.fetch_add(count, Ordering::AcqRel);
    }

    /// Counts a request as concurrent until the guard is dropped.
    pub fn add_request(&self) -> RequestGuard {
        self.shared.requests.fetch_add(1, Ordering::AcqRel);
        RequestGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn concurrent_requests(&self) -> u64 {
        self.shared.requests.load(Ordering::Acquire)
    }

    /// The latest sample.
    pub fn throughput(&self) -> Throughput {
        *self.shared.sender.borrow()
    }

    /// Receives every new sample.
    pub fn subscribe(&self) -> watch::Receiver<Throughput> {
        self.shared.sender.subscribe()
    }
}

impl Default for MovingAverageCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLING_INTERVAL)
    }
}

impl Drop for MovingAverageCalculator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Registration of a concurrent request with a [`MovingAverageCalculator`].
#[derive(Debug)]
pub struct RequestGuard {
    shared: Arc<Shared>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.shared.requests.fetch_sub(1, Ordering::AcqRel);
    }
}
