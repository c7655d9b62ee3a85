//! # cachefront
//!
//! A cache-first offline agent for a web application. Every intercepted
//! request is answered from the first source that can:
//!
//! 1. the Cache Store,
//! 2. a navigation preload the host already started,
//! 3. the live network (the response is cached for next time),
//! 4. a pre-seeded fallback asset,
//! 5. a synthetic `408 Network error happened`.
//!
//! The Cache Store is seeded at install time from a static asset list.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cachefront::background::{BoxError, TaskGroup};
//! use cachefront::cache::{MemoryStorage, RequestIdentity};
//! use cachefront::fetch::HttpFetcher;
//! use cachefront::http::Request;
//! use cachefront::policy::RetrievalPolicy;
//! use cachefront::preload::PreloadResponse;
//! use url::Url;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), BoxError> {
//!     let fetcher = Arc::new(HttpFetcher::new(std::time::Duration::from_secs(10))?);
//!     let policy = RetrievalPolicy::new(Arc::new(MemoryStorage::new()), fetcher, "v1");
//!
//!     let url = Url::parse("http://127.0.0.1:3000/")?;
//!     let fallback = RequestIdentity::get(&url.join("/offline.jpg")?);
//!     let tasks = TaskGroup::new();
//!     let response = policy
//!         .resolve(Request::get(url), PreloadResponse::none(), &fallback, &tasks)
//!         .await;
//!     tasks.wait().await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod background;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod policy;
pub mod preload;
pub mod seeder;
pub mod server;

/// A boxed, `Send` future, as returned by the object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheStorage, CacheStore, FileStorage, MemoryStorage, RequestIdentity};
pub use fetch::{Fetch, FetchError, HttpFetcher};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use lifecycle::{CacheFirstWorker, Registration, Runtime};
pub use policy::{Outcome, RetrievalPolicy};
pub use server::{Server, ServerError};
