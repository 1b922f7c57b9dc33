use std::io;
use std::time::Duration;

/// Errors raised for invalid limiter configuration or invalid requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// An argument was outside of its valid range.
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument {
        name: &'static str,
        reason: &'static str,
    },
}

impl LimitError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str) -> Self {
        Self::InvalidArgument { name, reason }
    }
}

/// The error carried by I/O failures of a stream closed by its inactivity watchdog.
///
/// It is wrapped in an [`io::Error`] of kind [`io::ErrorKind::TimedOut`]; use
/// [`is_timeout`] to tell it apart from other I/O failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no stream activity within {deadline:?}; stream closed")]
pub struct StreamTimedOut {
    pub deadline: Duration,
}

impl From<StreamTimedOut> for io::Error {
    fn from(err: StreamTimedOut) -> Self {
        io::Error::new(io::ErrorKind::TimedOut, err)
    }
}

/// Returns `true` if `err` was produced by a [`crate::TimeoutStream`] whose watchdog fired.
pub fn is_timeout(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<StreamTimedOut>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_errors_are_distinguishable() {
        let err: io::Error = StreamTimedOut {
            deadline: Duration::from_secs(1),
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(is_timeout(&err));

        let other = io::Error::new(io::ErrorKind::TimedOut, "socket timeout");
        assert!(!is_timeout(&other));
    }
}
