use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;

type LimitFn<T> = dyn Fn(Option<&RequestContext>) -> T + Send + Sync;

/// A limit that is either fixed or computed when it is needed.
///
/// Dynamic limits receive the [`RequestContext`] when one is available, so a
/// limit can depend on the caller, the path or a header. Limits resolved
/// outside of a request (a global bandwidth cap, for example) get `None`.
pub struct Limit<T> {
    source: Source<T>,
}

enum Source<T> {
    Fixed(T),
    Dynamic(Arc<LimitFn<T>>),
}

impl<T: Clone> Limit<T> {
    pub fn fixed(value: T) -> Self {
        Self {
            source: Source::Fixed(value),
        }
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(Option<&RequestContext>) -> T + Send + Sync + 'static,
    {
        Self {
            source: Source::Dynamic(Arc::new(f)),
        }
    }

    /// Evaluates the limit, optionally for a specific request.
    pub fn resolve(&self, context: Option<&RequestContext>) -> T {
        match &self.source {
            Source::Fixed(value) => value.clone(),
            Source::Dynamic(f) => f(context),
        }
    }
}

impl<T: Clone> Clone for Limit<T> {
    fn clone(&self) -> Self {
        let source = match &self.source {
            Source::Fixed(value) => Source::Fixed(value.clone()),
            Source::Dynamic(f) => Source::Dynamic(Arc::clone(f)),
        };
        Self { source }
    }
}

impl<T: fmt::Debug> fmt::Debug for Limit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Fixed(value) => f.debug_tuple("Limit::Fixed").field(value).finish(),
            Source::Dynamic(_) => f.write_str("Limit::Dynamic"),
        }
    }
}
