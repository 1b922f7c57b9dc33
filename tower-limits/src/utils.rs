use std::time::Duration;

use limits_core::Limit;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::ConnectionTimeoutLayer;
use crate::MaxBandwidthLayer;
use crate::MaxConcurrentRequestsLayer;
use crate::MinResponseDelayLayer;

/// Service Builder Extension with one method per limits layer.
pub trait ServiceBuilderExt<L> {
    /// Share one bandwidth budget between all requests.
    fn global_bandwidth_limit(
        self,
        bytes_per_second: Limit<i64>,
    ) -> ServiceBuilder<Stack<MaxBandwidthLayer, L>>;

    /// Give every request its own bandwidth budget.
    fn per_request_bandwidth_limit(
        self,
        bytes_per_second: Limit<i64>,
    ) -> ServiceBuilder<Stack<MaxBandwidthLayer, L>>;

    /// Reject requests beyond a number in flight.
    fn max_concurrent_requests(
        self,
        ceiling: Limit<i64>,
    ) -> ServiceBuilder<Stack<MaxConcurrentRequestsLayer, L>>;

    /// Fail bodies that stay idle past a deadline.
    fn connection_timeout(
        self,
        deadline: Limit<Duration>,
    ) -> ServiceBuilder<Stack<ConnectionTimeoutLayer, L>>;

    /// Delay every request before it is served.
    fn min_response_delay(
        self,
        delay: Limit<Duration>,
    ) -> ServiceBuilder<Stack<MinResponseDelayLayer, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn global_bandwidth_limit(
        self,
        bytes_per_second: Limit<i64>,
    ) -> ServiceBuilder<Stack<MaxBandwidthLayer, L>> {
        self.layer(MaxBandwidthLayer::global(bytes_per_second))
    }

    fn per_request_bandwidth_limit(
        self,
        bytes_per_second: Limit<i64>,
    ) -> ServiceBuilder<Stack<MaxBandwidthLayer, L>> {
        self.layer(MaxBandwidthLayer::per_request(bytes_per_second))
    }

    fn max_concurrent_requests(
        self,
        ceiling: Limit<i64>,
    ) -> ServiceBuilder<Stack<MaxConcurrentRequestsLayer, L>> {
        self.layer(MaxConcurrentRequestsLayer::new(ceiling))
    }

    fn connection_timeout(
        self,
        deadline: Limit<Duration>,
    ) -> ServiceBuilder<Stack<ConnectionTimeoutLayer, L>> {
        self.layer(ConnectionTimeoutLayer::new(deadline))
    }

    fn min_response_delay(
        self,
        delay: Limit<Duration>,
    ) -> ServiceBuilder<Stack<MinResponseDelayLayer, L>> {
        self.layer(MinResponseDelayLayer::new(delay))
    }
}
