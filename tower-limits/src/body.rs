use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Duration;

use bytes::Buf;
use bytes::Bytes;
use http_body::Body;
use http_body::Frame;
use http_body::SizeHint;
use limits_core::ConcurrencyPermit;
use limits_core::MovingAverageCalculator;
use limits_core::Participant;
use limits_core::RateLimiter;
use limits_core::RequestGuard;
use limits_core::StreamTimedOut;
use limits_core::Watchdog;
use pin_project_lite::pin_project;
use tokio::time::Sleep;
use tokio::time::sleep;
use tower::BoxError;

pin_project! {
    /// A body whose data frames are released at the pace of a [`RateLimiter`].
    ///
    /// Data frames larger than the limiter's chunk size are split. Trailers pass
    /// through untouched.
    #[derive(Debug)]
    pub struct ThrottledBody<B> {
        #[pin]
        inner: B,
        limiter: Arc<RateLimiter>,
        buffered: Bytes,
        sleep: Option<Pin<Box<Sleep>>>,
        throughput: Option<Arc<MovingAverageCalculator>>,
        // Held for the lifetime of the body.
        _participant: Option<Participant>,
        _request: Option<RequestGuard>,
    }
}

impl<B> ThrottledBody<B> {
    pub fn new(inner: B, limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            buffered: Bytes::new(),
            sleep: None,
            throughput: None,
            _participant: None,
            _request: None,
        }
    }

    /// Keeps the request registered with a shared limiter until the body is dropped.
    pub fn with_participant(mut self, participant: Participant) -> Self {
        self._participant = Some(participant);
        self
    }

    /// Records the bytes released by this body, counting it as a concurrent request.
    pub fn with_throughput(mut self, throughput: Arc<MovingAverageCalculator>) -> Self {
        self._request = Some(throughput.add_request());
        self.throughput = Some(throughput);
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl<B> Body for ThrottledBody<B>
where
    B: Body,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();
        loop {
            if let Some(timer) = this.sleep.as_mut() {
                ready!(timer.as_mut().poll(cx));
                *this.sleep = None;
            }

            if !this.buffered.is_empty() {
                match this.limiter.reserve(this.buffered.len()) {
                    ControlFlow::Continue(granted) => {
                        let chunk = this.buffered.split_to(granted);
                        if let Some(throughput) = this.throughput.as_ref() {
                            throughput.bytes_written(chunk.len() as u64);
                        }
                        return Poll::Ready(Some(Ok(Frame::data(chunk))));
                    }
                    ControlFlow::Break(reason) => {
                        *this.sleep = Some(Box::pin(sleep(reason.retry_after())));
                        continue;
                    }
                }
            }

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(mut data) => *this.buffered = data.copy_to_bytes(data.remaining()),
                    Err(frame) => {
                        return Poll::Ready(Some(Ok(
                            frame.map_data(|mut data| data.copy_to_bytes(data.remaining()))
                        )));
                    }
                },
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => return Poll::Ready(None),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.buffered.is_empty() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffered.len() as u64;
        let inner = self.inner.size_hint();
        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower().saturating_add(buffered));
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper.saturating_add(buffered));
        }
        hint
    }
}

pin_project! {
    /// A body that fails once no frame arrives within its deadline.
    ///
    /// The error is a boxed [`StreamTimedOut`]; [`crate::LimitsError`] converts it
    /// to [`crate::LimitsError::Timeout`].
    #[derive(Debug)]
    pub struct TimeoutBody<B> {
        #[pin]
        inner: B,
        watchdog: Option<Watchdog>,
    }
}

impl<B> TimeoutBody<B> {
    /// A zero deadline disables the timeout. Must be called inside a Tokio runtime.
    pub fn new(inner: B, deadline: Duration) -> Self {
        let watchdog = (!deadline.is_zero()).then(|| Watchdog::new(deadline));
        Self { inner, watchdog }
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = B::Data;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if let Some(watchdog) = this.watchdog.as_mut() {
            if watchdog.poll_expired(cx).is_ready() {
                let deadline = watchdog.deadline();
                return Poll::Ready(Some(Err(Box::new(StreamTimedOut { deadline }))));
            }
        }

        let frame = ready!(this.inner.poll_frame(cx));
        if let (Some(Ok(_)), Some(watchdog)) = (&frame, this.watchdog.as_mut()) {
            watchdog.reset();
        }
        Poll::Ready(frame.map(|result| result.map_err(Into::into)))
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pin_project! {
    /// A body that keeps its request counted as in flight until it is dropped.
    #[derive(Debug)]
    pub struct PermitBody<B> {
        #[pin]
        inner: B,
        _permit: ConcurrencyPermit,
    }
}

impl<B> PermitBody<B> {
    pub fn new(inner: B, permit: ConcurrencyPermit) -> Self {
        Self {
            inner,
            _permit: permit,
        }
    }
}

impl<B: Body> Body for PermitBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.project().inner.poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
