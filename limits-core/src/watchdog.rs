use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::sleep;
use tracing::info;

/// Fires once a deadline passes without [`Watchdog::reset`] being called.
///
/// The timer lives inside the watchdog, so a task polling
/// [`Watchdog::poll_expired`] is woken when it fires even if nothing else
/// happens. Once fired the watchdog stays closed.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct Watchdog {
    deadline: Duration,
    sleep: Pin<Box<Sleep>>,
    closed: bool,
}

impl Watchdog {
    pub fn new(deadline: Duration) -> Self {
        Self {
            deadline,
            sleep: Box::pin(sleep(deadline)),
            closed: false,
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Pushes expiry one deadline into the future. No effect once closed.
    pub fn reset(&mut self) {
        if !self.closed {
            self.sleep.as_mut().reset(Instant::now() + self.deadline);
        }
    }

    /// `Ready` once the deadline has passed, registering `cx` for wake-up otherwise.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.closed {
            return Poll::Ready(());
        }
        match self.sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                info!(deadline = ?self.deadline, "no stream activity before the deadline; closing");
                self.closed = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the watchdog without waiting for the deadline.
    pub fn close(&mut self) {
        self.closed = true;
    }
}
