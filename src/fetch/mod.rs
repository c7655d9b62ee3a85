//! Network transport: the collaborator that performs live fetches.
//!
//! The core never talks to sockets directly. It goes through [`Fetch`], which
//! [`HttpFetcher`] implements on top of `reqwest`. Any HTTP status counts as a
//! successful fetch; only transport-level failures surface as [`FetchError`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;
use tracing::debug;

use crate::BoxFuture;
use crate::http::{Body, HOP_BY_HOP, Headers, Request, Response, StatusCode};

/// User agent sent on outbound requests that do not carry their own.
pub const USER_AGENT: &str = concat!("cachefront/", env!("CARGO_PKG_VERSION"));

/// Transport-level fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("cannot send request to {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    #[error("fetch of {url} was aborted")]
    Aborted { url: String },
}

/// Something that can turn a [`Request`] into a [`Response`] over the network.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, FetchError>>;
}

/// [`Fetch`] implementation backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidRequest`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::InvalidRequest {
                url: String::new(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn send(&self, request: Request) -> Result<Response, FetchError> {
        let url = request.url().to_string();
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes()).map_err(
            |e| FetchError::InvalidRequest {
                url: url.clone(),
                reason: e.to_string(),
            },
        )?;

        let headers = outbound_headers(request.headers());
        debug!(%method, %url, "fetching from network");

        let response = self
            .client
            .request(method, request.url().clone())
            .headers(headers)
            .body(request.body().clone())
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = StatusCode::from_u16(response.status().as_u16());
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let body = response.bytes().await.map_err(|e| FetchError::Network {
            url: url.clone(),
            message: format!("failed to read response body: {e}"),
        })?;

        debug!(%url, %status, bytes = body.len(), "network response received");
        Ok(Response::from_parts(status, headers.end_to_end(), Body::new(body)))
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, FetchError>> {
        Box::pin(self.send(request))
    }
}

// Drops hop-by-hop and `Host` headers; reqwest derives those from the URL.
fn outbound_headers(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("host")
            || HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
        {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        map.append(name, value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_headers_strip_connection_scoped_fields() {
        let mut h = Headers::new();
        h.insert("Host", "app.local");
        h.insert("Connection", "keep-alive");
        h.insert("Accept", "text/html");
        h.insert("Service-Worker-Navigation-Preload", "true");
        let map = outbound_headers(&h);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("accept").unwrap(), "text/html");
        assert!(map.get("host").is_none());
    }
}
