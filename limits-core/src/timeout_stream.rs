use std::io;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tracing::debug;

use crate::error::StreamTimedOut;
use crate::watchdog::Watchdog;

pin_project! {
    /// Fails reads and writes once the stream has been idle for a deadline.
    ///
    /// Every successful read or write resets the [`Watchdog`]. When it fires, the
    /// pending and all later operations fail with a [`StreamTimedOut`] error of
    /// kind [`io::ErrorKind::TimedOut`]. Shutdown is always passed through.
    ///
    /// Expiry is noticed on the next poll, not in the background. The first
    /// failed write or flush also starts a shutdown of the inner stream; a
    /// read-only stream is released when the `TimeoutStream` is dropped.
    #[derive(Debug)]
    pub struct TimeoutStream<S> {
        #[pin]
        inner: S,
        watchdog: Watchdog,
        shut_down: bool,
    }
}

impl<S> TimeoutStream<S> {
    /// Must be called inside a Tokio runtime.
    pub fn new(inner: S, deadline: Duration) -> Self {
        Self {
            inner,
            watchdog: Watchdog::new(deadline),
            shut_down: false,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.watchdog.is_closed()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn timed_out(watchdog: &Watchdog) -> io::Error {
    StreamTimedOut {
        deadline: watchdog.deadline(),
    }
    .into()
}

// Best effort: a shutdown that is still pending is not polled again.
fn shut_down_expired<S: AsyncWrite>(
    inner: Pin<&mut S>,
    shut_down: &mut bool,
    cx: &mut Context<'_>,
) {
    if !*shut_down {
        *shut_down = true;
        if let Poll::Ready(Err(err)) = inner.poll_shutdown(cx) {
            debug!(%err, "shutdown of timed out stream failed");
        }
    }
}

impl<S: AsyncRead> AsyncRead for TimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.watchdog.poll_expired(cx).is_ready() {
            return Poll::Ready(Err(timed_out(this.watchdog)));
        }

        ready!(this.inner.poll_read(cx, buf))?;
        this.watchdog.reset();
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite> AsyncWrite for TimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        if this.watchdog.poll_expired(cx).is_ready() {
            shut_down_expired(this.inner.as_mut(), this.shut_down, cx);
            return Poll::Ready(Err(timed_out(this.watchdog)));
        }

        let written = ready!(this.inner.poll_write(cx, buf))?;
        this.watchdog.reset();
        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        if this.watchdog.poll_expired(cx).is_ready() {
            shut_down_expired(this.inner.as_mut(), this.shut_down, cx);
            return Poll::Ready(Err(timed_out(this.watchdog)));
        }
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
