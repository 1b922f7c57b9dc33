use limits_core::StreamTimedOut;
use tower::BoxError;

/// Errors produced by the limits middleware.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitsError {
    /// Too many requests are in flight; the request was rejected without being served.
    ///
    /// When the `axum` feature is enabled, this converts to `503 Service Unavailable`.
    #[error("Service is at its concurrency limit; request rejected")]
    ServiceUnavailable,

    /// A request or response body saw no activity before its deadline.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Connection timed out waiting for body activity")]
    Timeout,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl From<BoxError> for LimitsError {
    fn from(err: BoxError) -> Self {
        match err.downcast::<LimitsError>() {
            Ok(err) => *err,
            Err(err) if err.is::<StreamTimedOut>() => Self::Timeout,
            Err(err) => Self::Inner(err.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for LimitsError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match self {
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Inner(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
