use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Duration;

use http::Request;
use http::Response;
use limits_core::Limit;
use limits_core::RequestContext;
use pin_project_lite::pin_project;
use tower::Layer;
use tower::Service;

use crate::body::TimeoutBody;

/// Closes request and response bodies that go quiet for longer than a deadline.
///
/// The deadline is resolved per request. A zero deadline disables the timeout.
#[derive(Debug, Clone)]
pub struct ConnectionTimeoutLayer {
    deadline: Limit<Duration>,
}

impl ConnectionTimeoutLayer {
    pub fn new(deadline: Limit<Duration>) -> Self {
        Self { deadline }
    }
}

impl<S> Layer<S> for ConnectionTimeoutLayer {
    type Service = ConnectionTimeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConnectionTimeout {
            inner,
            deadline: self.deadline.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionTimeout<S> {
    inner: S,
    deadline: Limit<Duration>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ConnectionTimeout<S>
where
    S: Service<Request<TimeoutBody<ReqBody>>, Response = Response<ResBody>>,
{
    type Response = Response<TimeoutBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let deadline = self
            .deadline
            .resolve(Some(&RequestContext::from_request(&req)));
        let req = req.map(|body| TimeoutBody::new(body, deadline));

        ResponseFuture {
            inner: self.inner.call(req),
            deadline,
        }
    }
}

pin_project! {
    /// Wraps the response body once the inner service has answered.
    #[derive(Debug)]
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        deadline: Duration,
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<TimeoutBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let response = ready!(this.inner.poll(cx))?;
        let deadline = *this.deadline;
        Poll::Ready(Ok(response.map(|body| TimeoutBody::new(body, deadline))))
    }
}
