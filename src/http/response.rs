//! HTTP/1.1 responses and their single-reader bodies.
//!
//! Provides a fluent builder API for constructing responses, the explicit
//! [`Response::tee`] used when one response must be both returned and stored,
//! and serialization to a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// Body text of the response synthesised when nothing else can answer.
pub const NETWORK_ERROR_BODY: &str = "Network error happened";

/// A response body that can be read exactly once.
///
/// `Body` is not `Clone`. The only way to get a second reader is
/// [`Body::duplicate`], which shares the immutable, reference-counted buffer.
#[derive(Debug, Default)]
pub struct Body {
    bytes: Bytes,
}

impl Body {
    /// Wraps `bytes` as a body.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Returns a second, independent reader over the same bytes.
    pub fn duplicate(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
        }
    }

    /// Number of bytes in the body.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the body is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrows the body bytes without consuming them.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the body.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// An HTTP/1.1 response.
///
/// # Examples
///
/// ```
/// use cachefront::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let (returned, stored) = response.tee();
/// assert_eq!(returned.body_ref().as_bytes(), stored.body_ref().as_bytes());
///
/// let bytes = returned.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::default(),
            keep_alive: true,
        }
    }

    /// Assembles a response from parts, e.g. when relaying from the network
    /// or rehydrating a cached entry.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
            keep_alive: true,
        }
    }

    /// The last-resort answer: `408` with a plain-text explanation.
    pub fn network_error() -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT)
            .header("Content-Type", "text/plain")
            .body(NETWORK_ERROR_BODY)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::new(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::new(body);
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Borrows the body without consuming it.
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Splits the response into a read copy and a store copy.
    ///
    /// Both copies are created before either is consumed; the first is meant
    /// for the caller, the second for the cache.
    pub fn tee(self) -> (Response, Response) {
        let copy = Self {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.duplicate(),
            keep_alive: self.keep_alive,
        };
        (self, copy)
    }

    /// Consumes the response into its status, headers and body.
    pub fn into_parts(self) -> (StatusCode, Headers, Body) {
        (self.status, self.headers, self.body)
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Connection-scoped headers carried over from upstream are dropped and
    /// rewritten. Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written).
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_bytes(self) -> BytesMut {
        self.serialize(true)
    }

    /// Serializes the status line and headers of the answer to a `HEAD` request.
    ///
    /// No payload is written. `Content-Length` reflects the body when one is
    /// held and is omitted otherwise, since an empty stored body says nothing
    /// about the resource's real length.
    pub fn into_head_bytes(self) -> BytesMut {
        self.serialize(false)
    }

    fn serialize(self, with_body: bool) -> BytesMut {
        let mut headers = self.headers.end_to_end();
        let body = self.body.into_bytes();
        let content_length = body.len();

        if !body.is_empty() && !headers.contains("content-type") {
            headers.insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        headers.insert("Connection", connection);

        let estimated_size = 128 + headers.len() * 64 + if with_body { content_length } else { 0 };
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        if with_body || content_length > 0 {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);

        if with_body && !body.is_empty() {
            buf.put(body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn network_error_is_plain_text_408() {
        let r = Response::network_error();
        assert_eq!(r.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(r.headers().get("content-type"), Some("text/plain"));
        assert_eq!(r.body_ref().as_bytes(), NETWORK_ERROR_BODY.as_bytes());
    }

    #[test]
    fn upstream_framing_headers_are_rewritten() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "video/mp4");
        headers.insert("Transfer-Encoding", "chunked");
        headers.insert("Content-Length", "999");
        let r = Response::from_parts(StatusCode::OK, headers, Body::new(&b"abc"[..]));
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Transfer-Encoding"));
        assert!(!s.contains("Content-Length: 999"));
        assert!(s.contains("Content-Length: 3\r\n"));
    }

    #[test]
    fn tee_yields_two_independent_readers() {
        let r = Response::new(StatusCode::OK)
            .header("ETag", "\"v1\"")
            .body("cached");
        let (a, b) = r.tee();
        let (_, _, body_a) = a.into_parts();
        assert_eq!(body_a.into_bytes().as_ref(), b"cached");
        assert_eq!(b.headers().get("etag"), Some("\"v1\""));
        assert_eq!(b.body_ref().as_bytes(), b"cached");
    }

    #[test]
    fn head_keeps_length_of_held_body_but_sends_no_payload() {
        let r = Response::new(StatusCode::OK)
            .header("Content-Type", "image/jpeg")
            .body("vader");
        let s = to_string(r.into_head_bytes());
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn head_without_body_omits_length() {
        let mut headers = Headers::new();
        headers.insert("Content-Length", "1048576");
        let r = Response::from_parts(StatusCode::OK, headers, Body::default());
        let s = to_string(r.into_head_bytes());
        assert!(!s.contains("Content-Length"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn connection_close() {
        let r = Response::new(StatusCode::OK).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }
}
