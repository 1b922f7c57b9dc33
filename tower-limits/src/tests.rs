use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use http::Response;
use http_body::Frame;
use http_body_util::BodyExt;
use http_body_util::Full;
use http_body_util::StreamBody;
use limits_core::Limit;
use limits_core::MovingAverageCalculator;
use limits_core::RateLimiter;
use limits_core::RequestContext;
use limits_core::TokioClock;
use more_asserts::assert_ge;
use more_asserts::assert_lt;
use tokio::time::Instant;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tower::service_fn;

use super::*;

fn payload(len: usize) -> Bytes {
    Bytes::from(vec![7; len])
}

fn request(body: Bytes) -> Request<Full<Bytes>> {
    Request::post("/upload").body(Full::new(body)).unwrap()
}

/// Answers every request with `len` bytes.
fn responder(
    len: usize,
) -> impl Service<
    Request<ThrottledBody<Full<Bytes>>>,
    Response = Response<Full<Bytes>>,
    Error = Infallible,
> + Clone {
    service_fn(move |_req: Request<ThrottledBody<Full<Bytes>>>| async move {
        Ok::<_, Infallible>(Response::new(Full::new(payload(len))))
    })
}

mod bandwidth {
    use super::*;

    fn paused(layer: MaxBandwidthLayer) -> MaxBandwidthLayer {
        layer.with_clock(Arc::new(TokioClock))
    }

    #[tokio::test(start_paused = true)]
    async fn it_paces_response_bodies() {
        let mut svc = paused(MaxBandwidthLayer::per_request(Limit::fixed(1_000))).layer(responder(2_500));
        let start = Instant::now();

        let response = svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(body.len(), 2_500);
        assert_ge!(start.elapsed(), Duration::from_secs(2));
        assert_lt!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn it_paces_request_bodies() {
        let echo = service_fn(|req: Request<ThrottledBody<Full<Bytes>>>| async move {
            let received = req.into_body().collect().await.unwrap().to_bytes();
            Ok::<_, Infallible>(Response::new(Full::new(received)))
        });
        let mut svc = paused(MaxBandwidthLayer::per_request(Limit::fixed(1_000))).layer(echo);
        let start = Instant::now();

        let response = svc.ready().await.unwrap().call(request(payload(2_000))).await.unwrap();
        // The request body took a second to arrive.
        assert_ge!(start.elapsed(), Duration::from_secs(1));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, payload(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn per_request_budgets_are_independent() {
        let layer = paused(MaxBandwidthLayer::per_request(Limit::fixed(1_000)));
        let svc = layer.layer(responder(2_500));
        let start = Instant::now();

        let fetch = |mut svc: MaxBandwidth<_>| async move {
            let response = svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
            response.into_body().collect().await.unwrap().to_bytes().len()
        };
        let (a, b) = tokio::join!(fetch(svc.clone()), fetch(svc));

        assert_eq!(a + b, 5_000);
        assert_lt!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "polled after completion")]
    async fn response_futures_must_not_be_polled_twice() {
        let mut svc = paused(MaxBandwidthLayer::per_request(Limit::fixed(1_000))).layer(responder(10));
        let mut response = std::pin::pin!(svc.ready().await.unwrap().call(request(Bytes::new())));

        assert!(response.as_mut().await.is_ok());
        let _ = futures::poll!(response.as_mut());
    }

    #[tokio::test(start_paused = true)]
    async fn global_budgets_are_shared() {
        let layer = paused(MaxBandwidthLayer::global(Limit::fixed(1_000)));
        let svc = layer.layer(responder(2_500));
        let start = Instant::now();

        let fetch = |mut svc: MaxBandwidth<_>| async move {
            let response = svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
            response.into_body().collect().await.unwrap().to_bytes().len()
        };
        let (a, b) = tokio::join!(fetch(svc.clone()), fetch(svc));

        assert_eq!(a + b, 5_000);
        // 5000 bytes, the first 1000 of which are available right away.
        assert_ge!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_limits_read_the_request() {
        let limit = Limit::dynamic(|context: Option<&RequestContext>| {
            match context.and_then(|c| c.uri().query()) {
                Some("tier=gold") => 0,
                _ => 1_000,
            }
        });
        let mut svc = paused(MaxBandwidthLayer::per_request(limit)).layer(responder(10_000));
        let start = Instant::now();

        let gold = Request::get("/download?tier=gold")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = svc.ready().await.unwrap().call(gold).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(body.len(), 10_000);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn response_throughput_is_recorded() {
        let throughput = Arc::new(MovingAverageCalculator::default());
        let mut samples = throughput.subscribe();
        let layer = paused(MaxBandwidthLayer::global(Limit::fixed(0)))
            .with_throughput(Arc::clone(&throughput));
        let mut svc = layer.layer(responder(3_000));

        let response = svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
        let body = response.into_body();
        assert_eq!(throughput.concurrent_requests(), 1);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.len(), 3_000);
        assert_eq!(throughput.concurrent_requests(), 0);

        samples.changed().await.unwrap();
        assert_eq!(samples.borrow_and_update().bytes_per_second, 3_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn bodies_release_their_participation() {
        let limiter = Arc::new(
            RateLimiter::global(Limit::fixed(1_000)).with_clock(Arc::new(TokioClock)),
        );
        let body = ThrottledBody::new(Full::new(payload(10)), Arc::clone(&limiter))
            .with_participant(limiter.register());
        assert_eq!(limiter.participants(), 1);

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected.len(), 10);
        assert_eq!(limiter.participants(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn large_frames_are_split_into_chunks() {
        let limiter = Arc::new(RateLimiter::per_request(100).with_clock(Arc::new(TokioClock)));
        let mut body = ThrottledBody::new(Full::new(payload(250)), limiter);

        let mut sizes = Vec::new();
        while let Some(frame) = body.frame().await {
            sizes.push(frame.unwrap().into_data().unwrap().len());
        }
        assert_eq!(sizes, vec![100, 100, 50]);
    }
}

mod concurrency {
    use super::*;

    fn slow_service() -> impl Service<
        Request<Full<Bytes>>,
        Response = Response<Full<Bytes>>,
        Error = Infallible,
        Future = impl Send + 'static,
    > + Clone {
        service_fn(|_req: Request<Full<Bytes>>| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn it_rejects_requests_beyond_the_ceiling() {
        let layer = MaxConcurrentRequestsLayer::new(Limit::fixed(1));
        let mut svc = layer.layer(slow_service());

        let first = svc.ready().await.unwrap().call(request(Bytes::new()));
        assert_eq!(layer.in_flight(), 1);

        let err = svc
            .ready()
            .await
            .unwrap()
            .call(request(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(LimitsError::from(err), LimitsError::ServiceUnavailable);
        assert_eq!(layer.in_flight(), 1);

        first.await.unwrap();
        assert_eq!(layer.in_flight(), 0);

        assert!(svc.ready().await.unwrap().call(request(Bytes::new())).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_ceilings_admit_everything() {
        let layer = MaxConcurrentRequestsLayer::new(Limit::fixed(0));
        let svc = layer.layer(slow_service());

        let calls = (0..10).map(|_| svc.clone().oneshot(request(Bytes::new())));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        // Every response body still holds its slot.
        assert_eq!(layer.in_flight(), 10);
        drop(results);
        assert_eq!(layer.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_bodies_hold_their_slot() {
        let layer = MaxConcurrentRequestsLayer::new(Limit::fixed(1));
        let mut svc = ServiceBuilder::new()
            .layer(layer.clone())
            .layer(MaxBandwidthLayer::per_request(Limit::fixed(1_000)).with_clock(Arc::new(TokioClock)))
            .service_fn(|_req: Request<ThrottledBody<Full<Bytes>>>| async {
                Ok::<_, Infallible>(Response::new(Full::new(payload(5_000))))
            });

        let first = svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
        assert_eq!(layer.in_flight(), 1);

        let err = svc
            .ready()
            .await
            .unwrap()
            .call(request(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(LimitsError::from(err), LimitsError::ServiceUnavailable);

        let start = Instant::now();
        let body = first.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), 5_000);
        assert_ge!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(layer.in_flight(), 0);

        assert!(svc.ready().await.unwrap().call(request(Bytes::new())).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_requests_free_their_slot() {
        let layer = MaxConcurrentRequestsLayer::new(Limit::fixed(1));
        let mut svc = layer.layer(slow_service());

        let abandoned = svc.ready().await.unwrap().call(request(Bytes::new()));
        drop(abandoned);
        assert_eq!(layer.in_flight(), 0);

        assert!(svc.ready().await.unwrap().call(request(Bytes::new())).await.is_ok());
    }
}

mod timeout {
    use super::*;

    type Stalled = StreamBody<futures::stream::Pending<Result<Frame<Bytes>, Infallible>>>;

    fn stalled_service() -> impl Service<
        Request<TimeoutBody<Full<Bytes>>>,
        Response = Response<Stalled>,
        Error = Infallible,
    > + Clone {
        service_fn(|_req: Request<TimeoutBody<Full<Bytes>>>| async {
            Ok::<_, Infallible>(Response::new(StreamBody::new(futures::stream::pending())))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn idle_response_bodies_time_out() {
        let mut svc = ConnectionTimeoutLayer::new(Limit::fixed(Duration::from_secs(2)))
            .layer(stalled_service());
        let start = Instant::now();

        let response = svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
        let err = response
            .into_body()
            .collect()
            .await
            .err()
            .expect("stalled body should time out");

        assert_eq!(LimitsError::from(err), LimitsError::Timeout);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn active_bodies_complete() {
        let echo = service_fn(|req: Request<TimeoutBody<Full<Bytes>>>| async move {
            let received = req.into_body().collect().await?.to_bytes();
            Ok::<_, BoxError>(Response::new(Full::new(received)))
        });
        let mut svc = ConnectionTimeoutLayer::new(Limit::fixed(Duration::from_secs(1))).layer(echo);

        let response = svc.ready().await.unwrap().call(request(payload(64))).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, payload(64));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deadlines_disable_the_timeout() {
        let mut body = TimeoutBody::new(
            StreamBody::new(futures::stream::pending::<Result<Frame<Bytes>, Infallible>>()),
            Duration::ZERO,
        );

        let waited = tokio::time::timeout(Duration::from_secs(60), body.frame()).await;
        assert!(waited.is_err());
    }
}

mod delay {
    use super::*;

    fn ok_service() -> impl Service<
        Request<Full<Bytes>>,
        Response = Response<Full<Bytes>>,
        Error = Infallible,
        Future = impl Send + 'static,
    > + Clone
    + Send
    + 'static {
        service_fn(|_req: Request<Full<Bytes>>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn it_holds_requests_for_the_delay() {
        let mut svc = MinResponseDelayLayer::new(Limit::fixed(Duration::from_millis(500)))
            .layer(ok_service());
        let start = Instant::now();

        svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delays_do_not_sleep() {
        let mut svc = MinResponseDelayLayer::new(Limit::fixed(Duration::ZERO)).layer(ok_service());
        let start = Instant::now();

        svc.ready().await.unwrap().call(request(Bytes::new())).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

#[tokio::test(start_paused = true)]
async fn test_service_builder_ext_stack() {
    let svc = ServiceBuilder::new()
        .max_concurrent_requests(Limit::fixed(8))
        .min_response_delay(Limit::fixed(Duration::from_millis(100)))
        .connection_timeout(Limit::fixed(Duration::from_secs(5)))
        .per_request_bandwidth_limit(Limit::fixed(0))
        .service_fn(|req: Request<ThrottledBody<TimeoutBody<Full<Bytes>>>>| async move {
            let received = req.into_body().collect().await?.to_bytes();
            Ok::<_, BoxError>(Response::new(Full::new(received)))
        });
    let start = Instant::now();

    let response = svc.oneshot(request(payload(32))).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(body, payload(32));
    assert_ge!(start.elapsed(), Duration::from_millis(100));
}

#[test]
fn errors_map_from_boxed_errors() {
    let timed_out: BoxError = Box::new(limits_core::StreamTimedOut {
        deadline: Duration::from_secs(1),
    });
    assert_eq!(LimitsError::from(timed_out), LimitsError::Timeout);

    let shed: BoxError = Box::new(LimitsError::ServiceUnavailable);
    assert_eq!(LimitsError::from(shed), LimitsError::ServiceUnavailable);

    let other: BoxError = "boom".into();
    assert_eq!(LimitsError::from(other), LimitsError::Inner("boom".to_string()));
}
