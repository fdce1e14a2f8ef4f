//! Incoming HTTP request type.
//!
//! A [`Request`] is the per-request carrier handed down the middleware chain.
//! Besides the usual method/URI/headers/body it holds an extension map, which
//! is where request-scoped slots such as the instrumentation's field buffer
//! and the router's matched route live.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Uri, Version};

use crate::method::{Method, UnknownMethod};

/// An incoming HTTP request.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) extensions: Extensions,
    // Path used for routing. Mounted apps see it with their prefix removed;
    // `path()` always reports what the client asked for.
    pub(crate) route_path: String,
    // Mount prefixes passed on the way to the current router, outermost first.
    pub(crate) mount_prefix: String,
}

impl Request {
    /// Converts an [`http::Request`] into a waggle request.
    ///
    /// Fails only when the method is not one [`Method`] knows.
    pub fn from_http<B: Into<Bytes>>(
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self, UnknownMethod> {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body.into(), remote_addr)
    }

    pub(crate) fn from_parts(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Self, UnknownMethod> {
        let method = Method::try_from(&parts.method)?;
        let route_path = parts.uri.path().to_owned();
        Ok(Self {
            method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
            params: HashMap::new(),
            extensions: parts.extensions,
            route_path,
            mount_prefix: String::new(),
        })
    }

    pub fn method(&self) -> Method { self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }
    pub fn version(&self) -> Version { self.version }

    /// The literal path the client requested, e.g. `/hello/Honeycomb`.
    pub fn path(&self) -> &str { self.uri.path() }

    /// The raw query string, without the leading `?`. `None` when absent or empty.
    pub fn query(&self) -> Option<&str> {
        self.uri.query().filter(|q| !q.is_empty())
    }

    /// Case-insensitive header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// URL scheme: taken from an absolute request URI, then from the
    /// `x-forwarded-proto` header set by the reverse proxy, else `http`.
    pub fn scheme(&self) -> &str {
        self.uri
            .scheme_str()
            .or_else(|| self.header("x-forwarded-proto"))
            .unwrap_or("http")
    }

    /// The `Host` header, falling back to the authority of an absolute URI.
    pub fn host(&self) -> Option<&str> {
        self.header("host")
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// Protocol version as it appears on the wire, e.g. `HTTP/1.1`.
    pub fn http_version(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_2  => "HTTP/2.0",
            Version::HTTP_3  => "HTTP/3.0",
            _                => "HTTP/1.1",
        }
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        let req = http::Request::get(uri)
            .header("user-agent", "curl/8.0")
            .body(Bytes::new())
            .unwrap();
        Request::from_http(req, Some("127.1.2.3:4000".parse().unwrap())).unwrap()
    }

    #[test]
    fn reads_absolute_uri_metadata() {
        let req = request("https://search.example.org/?q=bees&password=secret");
        assert_eq!(req.scheme(), "https");
        assert_eq!(req.host(), Some("search.example.org"));
        assert_eq!(req.path(), "/");
        assert_eq!(req.query(), Some("q=bees&password=secret"));
        assert_eq!(req.user_agent(), Some("curl/8.0"));
        assert_eq!(req.http_version(), "HTTP/1.1");
    }

    #[test]
    fn origin_form_defaults_to_http_without_host() {
        let req = request("/hello?");
        assert_eq!(req.scheme(), "http");
        assert_eq!(req.host(), None);
        assert_eq!(req.query(), None);
    }

    #[test]
    fn forwarded_proto_is_honoured() {
        let req = http::Request::get("/")
            .header("x-forwarded-proto", "https")
            .header("host", "api.example.org")
            .body(Bytes::new())
            .unwrap();
        let req = Request::from_http(req, None).unwrap();
        assert_eq!(req.scheme(), "https");
        assert_eq!(req.host(), Some("api.example.org"));
    }
}
