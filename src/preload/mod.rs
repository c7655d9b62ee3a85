//! Preload Channel: a navigation fetch the host starts before the worker runs.
//!
//! The host race-starts the preload alongside the worker; the worker only ever
//! sees the eventual outcome through [`PreloadResponse::resolve`], where every
//! kind of failure collapses to "no preload".

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::debug;

use crate::BoxFuture;
use crate::fetch::{Fetch, FetchError};
use crate::http::{Request, Response};

/// Request header that marks a navigation preload.
pub const PRELOAD_HEADER: &str = "Service-Worker-Navigation-Preload";

/// Handle on the (possibly still running) preload for one request.
pub struct PreloadResponse {
    inner: Inner,
}

enum Inner {
    None,
    Pending(BoxFuture<'static, Result<Option<Response>, FetchError>>),
    Spawned(Option<JoinHandle<Result<Response, FetchError>>>),
}

impl PreloadResponse {
    /// No preload was issued for this request.
    pub fn none() -> Self {
        Self { inner: Inner::None }
    }

    /// A preload that has already produced `response`.
    pub fn ready(response: Response) -> Self {
        Self::from_future(async move { Ok(Some(response)) })
    }

    /// A preload that has already failed.
    pub fn failed(error: FetchError) -> Self {
        Self::from_future(async move { Err(error) })
    }

    /// Wraps an arbitrary future that yields the preload outcome.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<Response>, FetchError>> + Send + 'static,
    {
        Self {
            inner: Inner::Pending(Box::pin(future)),
        }
    }

    /// Starts fetching `request` right away on the runtime.
    ///
    /// If the handle is dropped before it is resolved the fetch is aborted.
    pub fn spawn(fetcher: Arc<dyn Fetch>, request: Request) -> Self {
        let handle = tokio::spawn(async move { fetcher.fetch(request).await });
        Self {
            inner: Inner::Spawned(Some(handle)),
        }
    }

    /// Returns `true` if no preload was issued at all.
    pub fn is_none(&self) -> bool {
        matches!(self.inner, Inner::None)
    }

    /// Waits for the preload. Failures, panics and cancellation all read as `None`.
    pub async fn resolve(mut self) -> Option<Response> {
        let outcome = match &mut self.inner {
            Inner::None => return None,
            Inner::Pending(future) => future.await,
            Inner::Spawned(handle) => {
                let handle = handle.take()?;
                match handle.await {
                    Ok(result) => result.map(Some),
                    Err(e) => {
                        debug!(error = %e, "preload task did not complete");
                        return None;
                    }
                }
            }
        };

        match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "preload failed, treating as absent");
                None
            }
        }
    }
}

impl Drop for PreloadResponse {
    fn drop(&mut self) {
        if let Inner::Spawned(Some(handle)) = &self.inner {
            handle.abort();
        }
    }
}

/// Per-registration switch for navigation preload.
///
/// Mirrors the browser API: the worker enables it during activation and the
/// host consults it before dispatching each navigation.
#[derive(Debug)]
pub struct NavigationPreloadManager {
    enabled: AtomicBool,
    header_value: String,
}

impl Default for NavigationPreloadManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationPreloadManager {
    /// A disabled manager whose preload requests carry `header_value = "true"`.
    pub fn new() -> Self {
        Self::with_header_value("true")
    }

    pub fn with_header_value(value: impl Into<String>) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            header_value: value.into(),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn header_value(&self) -> &str {
        &self.header_value
    }

    /// Builds the preload copy of a navigation request.
    pub fn preload_request(&self, request: &Request) -> Request {
        let mut preload = request.duplicate();
        preload
            .headers_mut()
            .set(PRELOAD_HEADER, self.header_value.as_str());
        preload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::StatusCode;
    use url::Url;

    #[tokio::test]
    async fn none_resolves_to_none() {
        let preload = PreloadResponse::none();
        assert!(preload.is_none());
        assert!(preload.resolve().await.is_none());
    }

    #[tokio::test]
    async fn failure_reads_as_absent() {
        let preload = PreloadResponse::failed(FetchError::Aborted {
            url: "http://localhost/".into(),
        });
        assert!(preload.resolve().await.is_none());
    }

    #[tokio::test]
    async fn empty_future_reads_as_absent() {
        let preload = PreloadResponse::from_future(async { Ok(None) });
        assert!(preload.resolve().await.is_none());
    }

    #[tokio::test]
    async fn ready_yields_response() {
        let preload = PreloadResponse::ready(Response::new(StatusCode::OK).body("page"));
        let response = preload.resolve().await.unwrap();
        assert_eq!(response.body_ref().as_bytes(), b"page");
    }

    #[test]
    fn manager_toggles_and_tags_requests() {
        let manager = NavigationPreloadManager::new();
        assert!(!manager.is_enabled());
        manager.enable();
        assert!(manager.is_enabled());

        let request = Request::get(Url::parse("http://localhost/live").unwrap());
        let preload = manager.preload_request(&request);
        assert_eq!(preload.headers().get(PRELOAD_HEADER), Some("true"));
        assert!(request.headers().get(PRELOAD_HEADER).is_none());

        manager.disable();
        assert!(!manager.is_enabled());
    }
}
