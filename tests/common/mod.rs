//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use cachefront::BoxFuture;
use cachefront::fetch::{Fetch, FetchError};
use cachefront::http::{Request, Response, StatusCode};
use url::Url;

pub const ORIGIN: &str = "http://app.local:3000";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// A fetcher that answers from a fixed table and counts every call.
///
/// Unknown paths fail with a network error, like an unreachable host.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, &'static str)>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Request>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn offline() -> Arc<Self> {
        Self::new()
    }

    pub fn route(self: &Arc<Self>, path: &str, status: u16, body: &'static str) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_owned(), (status, body));
        Arc::clone(self)
    }

    pub fn go_offline(&self) {
        self.routes.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Header values seen on requests for `path`.
    pub fn header_seen(&self, path: &str, name: &str) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path() == path)
            .filter_map(|r| r.headers().get(name).map(str::to_owned))
            .collect()
    }
}

impl Fetch for ScriptedFetcher {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, FetchError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let route = self.routes.lock().unwrap().get(request.path()).copied();
            let url = request.url().to_string();
            self.seen.lock().unwrap().push(request);
            match route {
                Some((status, body)) => Ok(Response::new(StatusCode::from_u16(status))
                    .header("Content-Type", "text/plain")
                    .body(body)),
                None => Err(FetchError::Network {
                    url,
                    message: "TypeError: network error".into(),
                }),
            }
        })
    }
}

pub fn body_text(response: Response) -> String {
    let (_, _, body) = response.into_parts();
    String::from_utf8(body.into_bytes().to_vec()).unwrap()
}
