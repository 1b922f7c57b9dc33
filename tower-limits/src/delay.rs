use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::future::BoxFuture;
use http::Request;
use limits_core::Limit;
use limits_core::RequestContext;
use tower::Layer;
use tower::Service;
use tracing::trace;

/// Holds every request for at least a minimum delay before it is served.
///
/// The delay is resolved per request; a zero delay calls the inner service
/// right away.
#[derive(Debug, Clone)]
pub struct MinResponseDelayLayer {
    delay: Limit<Duration>,
}

impl MinResponseDelayLayer {
    pub fn new(delay: Limit<Duration>) -> Self {
        Self { delay }
    }
}

impl<S> Layer<S> for MinResponseDelayLayer {
    type Service = MinResponseDelay<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MinResponseDelay {
            inner,
            delay: self.delay.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinResponseDelay<S> {
    inner: S,
    delay: Limit<Duration>,
}

impl<S, B> Service<Request<B>> for MinResponseDelay<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let delay = self.delay.resolve(Some(&RequestContext::from_request(&req)));

        // The clone may not be ready; keep the service that was polled ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if !delay.is_zero() {
                trace!(?delay, "delaying request");
                tokio::time::sleep(delay).await;
            }
            inner.call(req).await
        })
    }
}
