use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use http::Request;
use http::Response;
use limits_core::Algorithm;
use limits_core::Clock;
use limits_core::Limit;
use limits_core::MovingAverageCalculator;
use limits_core::Participant;
use limits_core::QuantaClock;
use limits_core::RateLimiter;
use limits_core::RequestContext;
use pin_project_lite::pin_project;
use tower::Layer;
use tower::Service;
use tracing::trace;

use crate::body::ThrottledBody;

#[derive(Debug, Clone)]
enum Mode {
    /// Every request shares these limiters.
    Global {
        bytes_per_second: Limit<i64>,
        requests: Arc<RateLimiter>,
        responses: Arc<RateLimiter>,
    },
    /// Each request gets its own limiters, sized for that request.
    PerRequest(Limit<i64>),
}

/// Caps the bytes per second flowing through request and response bodies.
///
/// Request and response bodies are limited separately, each to the full limit.
#[derive(Debug, Clone)]
pub struct MaxBandwidthLayer {
    mode: Mode,
    algorithm: Algorithm,
    clock: Arc<dyn Clock>,
    throughput: Option<Arc<MovingAverageCalculator>>,
}

impl MaxBandwidthLayer {
    /// One budget for all requests together.
    ///
    /// The limit is resolved without a request context whenever bytes are reserved.
    pub fn global(bytes_per_second: Limit<i64>) -> Self {
        let algorithm = Algorithm::default();
        let clock: Arc<dyn Clock> = Arc::new(QuantaClock::new());
        Self {
            mode: global_mode(bytes_per_second, algorithm, &clock),
            algorithm,
            clock,
            throughput: None,
        }
    }

    /// A separate budget for every request, resolved against that request.
    pub fn per_request(bytes_per_second: Limit<i64>) -> Self {
        Self {
            mode: Mode::PerRequest(bytes_per_second),
            algorithm: Algorithm::default(),
            clock: Arc::new(QuantaClock::new()),
            throughput: None,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self.rebuild_global();
        self
    }

    /// Time source for the limiters, [`QuantaClock`] by default.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.rebuild_global();
        self
    }

    /// Records response body throughput in `throughput`.
    pub fn with_throughput(mut self, throughput: Arc<MovingAverageCalculator>) -> Self {
        self.throughput = Some(throughput);
        self
    }
}

impl MaxBandwidthLayer {
    fn rebuild_global(&mut self) {
        if let Mode::Global {
            bytes_per_second, ..
        } = &self.mode
        {
            self.mode = global_mode(bytes_per_second.clone(), self.algorithm, &self.clock);
        }
    }
}

fn global_mode(bytes_per_second: Limit<i64>, algorithm: Algorithm, clock: &Arc<dyn Clock>) -> Mode {
    let limiter = || {
        Arc::new(
            RateLimiter::global(bytes_per_second.clone())
                .with_algorithm(algorithm)
                .with_clock(Arc::clone(clock)),
        )
    };
    Mode::Global {
        requests: limiter(),
        responses: limiter(),
        bytes_per_second,
    }
}

impl<S> Layer<S> for MaxBandwidthLayer {
    type Service = MaxBandwidth<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MaxBandwidth {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaxBandwidth<S> {
    inner: S,
    layer: MaxBandwidthLayer,
}

struct Limiters {
    request: Arc<RateLimiter>,
    request_participant: Option<Participant>,
    response: Arc<RateLimiter>,
    response_participant: Option<Participant>,
}

impl<S> MaxBandwidth<S> {
    fn limiters<B>(&self, req: &Request<B>) -> Limiters {
        match &self.layer.mode {
            Mode::Global {
                requests,
                responses,
                ..
            } => Limiters {
                request_participant: Some(requests.register()),
                request: Arc::clone(requests),
                response_participant: Some(responses.register()),
                response: Arc::clone(responses),
            },
            Mode::PerRequest(limit) => {
                let context = RequestContext::from_request(req);
                let bytes_per_second = limit.resolve(Some(&context));
                trace!(bytes_per_second, uri = %context.uri(), "per-request bandwidth");
                let limiter = || {
                    Arc::new(
                        RateLimiter::per_request(bytes_per_second)
                            .with_algorithm(self.layer.algorithm)
                            .with_clock(Arc::clone(&self.layer.clock)),
                    )
                };
                Limiters {
                    request: limiter(),
                    request_participant: None,
                    response: limiter(),
                    response_participant: None,
                }
            }
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MaxBandwidth<S>
where
    S: Service<Request<ThrottledBody<ReqBody>>, Response = Response<ResBody>>,
{
    type Response = Response<ThrottledBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let Limiters {
            request,
            request_participant,
            response,
            response_participant,
        } = self.limiters(&req);

        let req = req.map(|inner| {
            let body = ThrottledBody::new(inner, request);
            match request_participant {
                Some(participant) => body.with_participant(participant),
                None => body,
            }
        });

        ResponseFuture {
            inner: self.inner.call(req),
            response: Some(ResponseLimits {
                limiter: response,
                participant: response_participant,
                throughput: self.layer.throughput.clone(),
            }),
        }
    }
}

#[derive(Debug)]
struct ResponseLimits {
    limiter: Arc<RateLimiter>,
    participant: Option<Participant>,
    throughput: Option<Arc<MovingAverageCalculator>>,
}

impl ResponseLimits {
    fn wrap<B>(self, body: B) -> ThrottledBody<B> {
        let mut body = ThrottledBody::new(body, self.limiter);
        if let Some(participant) = self.participant {
            body = body.with_participant(participant);
        }
        if let Some(throughput) = self.throughput {
            body = body.with_throughput(throughput);
        }
        body
    }
}

pin_project! {
    /// Wraps the response body once the inner service has answered.
    #[derive(Debug)]
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        response: Option<ResponseLimits>,
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<ThrottledBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let response = ready!(this.inner.poll(cx))?;
        let limits = this
            .response
            .take()
            .expect("ResponseFuture polled after completion");
        Poll::Ready(Ok(response.map(|body| limits.wrap(body))))
    }
}
