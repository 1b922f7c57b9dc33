use std::net::SocketAddr;

use http::HeaderMap;
use http::Method;
use http::Request;
use http::Uri;
use http::header::HOST;

/// Socket addresses of the connection a request arrived on.
///
/// Hosts insert this into the request extensions so limits can depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

/// The authenticated caller, inserted into the request extensions by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

/// Read-only view of a request, handed to dynamic [`crate::Limit`]s.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    connection: ConnectionInfo,
    user: Option<Principal>,
}

impl RequestContext {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let extensions = request.extensions();
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
            connection: extensions
                .get::<ConnectionInfo>()
                .copied()
                .unwrap_or_default(),
            user: extensions.get::<Principal>().cloned(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The `Host` header, falling back to the URI authority. May include the port.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri.authority().map(|authority| authority.as_str()))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection.remote_addr
    }

    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }
}
