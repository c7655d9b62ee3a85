//! Intercepted HTTP requests.
//!
//! Requests arrive either from the wire (parsed with the [`httparse`] crate) or
//! are built directly, e.g. for the install-time asset list. Every request
//! carries an absolute URL so that it maps onto a stable cache identity.

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use super::{Headers, Method};
use crate::cache::RequestIdentity;

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request target {target:?} names another authority")]
    SchemeRelativeTarget { target: String },

    #[error("invalid request target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// An HTTP request addressed to an absolute URL.
///
/// `Request` is not `Clone`: the body may only be consumed once,
/// so code that needs a second copy (the network fetch) asks for one with
/// [`Request::duplicate`].
///
/// # Examples
///
/// ```
/// use cachefront::http::{Method, Request};
/// use url::Url;
///
/// let origin = Url::parse("http://localhost:3000").unwrap();
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw, &origin).unwrap();
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.url().as_str(), "http://localhost:3000/hello?name=world");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds an HTTP/1.1 request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` of `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Absolute-form targets (`GET http://host/path HTTP/1.1`, as sent to a
    /// proxy) are used as-is; origin-form targets (`GET /path HTTP/1.1`) are
    /// resolved against `origin`.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. The body is taken from everything after that offset; callers
    /// that pipeline requests re-slice using `Content-Length`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    /// - [`RequestError::SchemeRelativeTarget`]: the target starts with `//`.
    /// - [`RequestError::InvalidTarget`]: the target cannot be turned into a URL.
    pub fn parse(buf: &[u8], origin: &Url) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => match m.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        // `//host/path` would otherwise join onto a different origin.
        if target.starts_with("//") {
            return Err(RequestError::SchemeRelativeTarget {
                target: target.to_owned(),
            });
        }
        let parsed = if target.starts_with('/') {
            origin.join(target)
        } else {
            Url::parse(target)
        };
        let url = parsed.map_err(|source| RequestError::InvalidTarget {
            target: target.to_owned(),
            source,
        })?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                url,
                version,
                headers: header_map,
                body,
            },
            body_offset,
        ))
    }

    /// Returns an independent copy of this request for a second consumer.
    pub fn duplicate(&self) -> Self {
        Self {
            method: self.method.clone(),
            url: self.url.clone(),
            version: self.version,
            headers: self.headers.clone(),
            body: Bytes::copy_from_slice(&self.body),
        }
    }

    /// Returns the cache identity of this request.
    pub fn identity(&self) -> RequestIdentity {
        RequestIdentity::new(self.method.clone(), &self.url)
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.url.query()
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns a mutable reference to the request headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if this is a top-level document navigation.
    ///
    /// `Sec-Fetch-Mode: navigate` is authoritative when present; otherwise a
    /// `GET` that accepts `text/html` is treated as a navigation.
    pub fn is_navigation(&self) -> bool {
        if self.method != Method::Get {
            return false;
        }
        match self.headers.get("sec-fetch-mode") {
            Some(mode) => mode.eq_ignore_ascii_case("navigate"),
            None => self
                .headers
                .get("accept")
                .is_some_and(|accept| accept.contains("text/html")),
        }
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Drops trailing bytes that belong to a pipelined follow-up request.
    pub(crate) fn truncate_body(&mut self, len: usize) {
        if self.body.len() > len {
            self.body.truncate(len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("http://app.local:3000").unwrap()
    }

    #[test]
    fn parse_origin_form_resolves_against_origin() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw, &origin()).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.url().as_str(), "http://app.local:3000/");
        assert_eq!(req.version(), 1);
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn parse_absolute_form_keeps_target_host() {
        let raw = b"GET https://images.example.com/photo.jpg?w=1740 HTTP/1.1\r\n\r\n";
        let (req, _) = Request::parse(raw, &origin()).unwrap();
        assert_eq!(req.url().host_str(), Some("images.example.com"));
        assert_eq!(req.query_string(), Some("w=1740"));
    }

    #[test]
    fn parse_rejects_relative_garbage() {
        let raw = b"GET not-a-url HTTP/1.1\r\n\r\n";
        assert!(matches!(
            Request::parse(raw, &origin()),
            Err(RequestError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn parse_rejects_scheme_relative_target() {
        let raw = b"GET //other.host/x HTTP/1.1\r\n\r\n";
        assert!(matches!(
            Request::parse(raw, &origin()),
            Err(RequestError::SchemeRelativeTarget { ref target }) if target == "//other.host/x"
        ));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(
            Request::parse(raw, &origin()),
            Err(RequestError::Incomplete)
        ));
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw, &origin()).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn duplicate_is_independent() {
        let original = Request::new(Method::Post, origin().join("/submit").unwrap())
            .header("Content-Type", "text/plain")
            .body_bytes(&b"payload"[..]);
        let mut copy = original.duplicate();
        copy.headers_mut().set("Content-Type", "application/json");
        assert_eq!(copy.body().as_ref(), b"payload");
        assert_eq!(original.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn navigation_detection() {
        let url = origin().join("/live").unwrap();
        assert!(Request::get(url.clone()).header("Sec-Fetch-Mode", "navigate").is_navigation());
        assert!(!Request::get(url.clone()).header("Sec-Fetch-Mode", "no-cors").is_navigation());
        assert!(Request::get(url.clone()).header("Accept", "text/html,*/*").is_navigation());
        assert!(!Request::new(Method::Post, url).header("Accept", "text/html").is_navigation());
    }
}
