use std::future::Future;
use std::io;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use pin_project_lite::pin_project;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::ReadBuf;
use tokio::time::Sleep;
use tokio::time::sleep;

use crate::rate_limiter::RateLimiter;

pin_project! {
    /// Wraps a stream so every read and write is paced by a [`RateLimiter`].
    ///
    /// Each operation moves at most one chunk, the limiter's budget for a single
    /// reservation. Buffers larger than that turn into short reads and writes, and
    /// the wait before the next chunk happens inside the following poll. Callers
    /// using `write_all` or `read_exact` see the usual semantics.
    ///
    /// A read reserves a whole chunk before reading, so the read that finds end
    /// of stream still spends budget and may have to wait for it.
    ///
    /// Both `tokio::io` and blocking `std::io` streams are supported.
    #[derive(Debug)]
    pub struct ThrottledStream<S> {
        #[pin]
        inner: S,
        limiter: Arc<RateLimiter>,
        read_state: Pacing,
        write_state: Pacing,
    }
}

/// Reservation state of one direction of an async stream.
#[derive(Debug, Default)]
struct Pacing {
    sleep: Option<Pin<Box<Sleep>>>,
    // Bytes reserved but not yet transferred.
    granted: usize,
}

impl Pacing {
    /// Resolves to the number of bytes that may be transferred now, at most `want`.
    fn poll_grant(&mut self, cx: &mut Context<'_>, limiter: &RateLimiter, want: usize) -> Poll<usize> {
        loop {
            if let Some(sleep) = self.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                self.sleep = None;
            }

            if self.granted > 0 {
                return Poll::Ready(self.granted.min(want));
            }

            match limiter.reserve(want) {
                ControlFlow::Continue(granted) => {
                    self.granted = granted;
                    return Poll::Ready(granted);
                }
                ControlFlow::Break(reason) => {
                    self.sleep = Some(Box::pin(sleep(reason.retry_after())));
                }
            }
        }
    }

    fn consume(&mut self, used: usize) {
        self.granted = self.granted.saturating_sub(used);
    }
}

impl<S> ThrottledStream<S> {
    pub fn new(inner: S, limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            read_state: Pacing::default(),
            write_state: Pacing::default(),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Blocks until up to `len` bytes are reserved and returns how many were.
    fn blocking_chunk(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let chunk = self.limiter.chunk_size().map_or(len, |c| c.min(len));
        self.limiter.throttle_blocking(chunk);
        chunk
    }
}

impl<S: AsyncRead> AsyncRead for ThrottledStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if buf.remaining() == 0 {
            return this.inner.poll_read(cx, buf);
        }

        let grant = ready!(this.read_state.poll_grant(cx, this.limiter, buf.remaining()));

        let read = {
            let mut limited = ReadBuf::new(buf.initialize_unfilled_to(grant));
            ready!(this.inner.poll_read(cx, &mut limited))?;
            limited.filled().len()
        };
        buf.advance(read);
        // A short read still spends the whole grant, as the bytes were requested.
        this.read_state.consume(grant);

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite> AsyncWrite for ThrottledStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if buf.is_empty() {
            return this.inner.poll_write(cx, buf);
        }

        let grant = ready!(this.write_state.poll_grant(cx, this.limiter, buf.len()));
        let written = ready!(this.inner.poll_write(cx, &buf[..grant]))?;
        this.write_state.consume(written);

        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

impl<S: io::Read> io::Read for ThrottledStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.blocking_chunk(buf.len());
        io::Read::read(&mut self.inner, &mut buf[..chunk])
    }
}

impl<S: io::Write> io::Write for ThrottledStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let chunk = self.blocking_chunk(buf.len());
        io::Write::write(&mut self.inner, &buf[..chunk])
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.inner)
    }
}
