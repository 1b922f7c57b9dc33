use std::task::Context;
use std::task::Poll;

use futures::future;
use futures::future::BoxFuture;
use http::Request;
use http::Response;
use limits_core::ConcurrencyLimiter;
use limits_core::Limit;
use limits_core::RequestContext;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tracing::debug;

use crate::body::PermitBody;
use crate::error::LimitsError;

/// Rejects requests while too many are already in flight.
///
/// The ceiling is resolved for every request; zero or less disables the check.
/// A request counts as in flight until its response body is dropped, so a slow
/// download keeps its slot while it streams. A request whose inner service fails
/// gives the slot back with the error.
#[derive(Debug, Clone)]
pub struct MaxConcurrentRequestsLayer {
    ceiling: Limit<i64>,
    limiter: ConcurrencyLimiter,
}

impl MaxConcurrentRequestsLayer {
    pub fn new(ceiling: Limit<i64>) -> Self {
        Self {
            ceiling,
            limiter: ConcurrencyLimiter::new(),
        }
    }

    /// Requests currently in flight across every service built by this layer.
    pub fn in_flight(&self) -> usize {
        self.limiter.in_flight()
    }
}

impl<S> Layer<S> for MaxConcurrentRequestsLayer {
    type Service = MaxConcurrentRequests<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let meter = global::meter("tower_limits");
        MaxConcurrentRequests {
            inner,
            ceiling: self.ceiling.clone(),
            limiter: self.limiter.clone(),
            rejected: meter.u64_counter("limits.concurrency.rejected").build(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaxConcurrentRequests<S> {
    inner: S,
    ceiling: Limit<i64>,
    limiter: ConcurrencyLimiter,
    rejected: Counter<u64>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MaxConcurrentRequests<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<PermitBody<ResBody>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let context = RequestContext::from_request(&req);
        let ceiling = self.ceiling.resolve(Some(&context));

        let permit = match self.limiter.try_acquire(ceiling) {
            Ok(permit) => permit,
            Err(exceeded) => {
                debug!(
                    in_flight = exceeded.in_flight,
                    ceiling = exceeded.ceiling,
                    uri = %context.uri(),
                    "rejecting request"
                );
                self.rejected
                    .add(1, &[KeyValue::new("ceiling", exceeded.ceiling)]);
                let rejection: Result<Self::Response, BoxError> =
                    Err(LimitsError::ServiceUnavailable.into());
                return Box::pin(future::ready(rejection));
            }
        };

        let response_future = self.inner.call(req);
        Box::pin(async move {
            let response: Response<ResBody> = response_future.await.map_err(Into::into)?;
            Ok::<_, BoxError>(response.map(|body| PermitBody::new(body, permit)))
        })
    }
}
