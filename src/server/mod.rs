//! Async TCP server using Tokio: the fetch-interception surface.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests, and hands each one to the
//! [`Runtime`]. Supports HTTP/1.1 persistent connections (keep-alive). After a
//! response is written, the connection task waits for the request's detached
//! work (cache writes) before reading the next request, so that work is never
//! abandoned mid-flight.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::lifecycle::Runtime;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The listening side of the agent.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use cachefront::cache::MemoryStorage;
/// use cachefront::fetch::HttpFetcher;
/// use cachefront::lifecycle::{CacheFirstWorker, Registration, Runtime};
/// use cachefront::server::Server;
/// use url::Url;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let origin = Url::parse("http://127.0.0.1:3000")?;
///     let fetcher = Arc::new(HttpFetcher::new(std::time::Duration::from_secs(30))?);
///     let fallback = origin.join("/offline.jpg")?;
///     let worker = CacheFirstWorker::new(
///         Arc::new(MemoryStorage::new()),
///         fetcher.clone(),
///         "v1",
///         vec![origin.join("/")?, fallback.clone()],
///         &fallback,
///     );
///     let runtime = Arc::new(Runtime::new(Arc::new(worker), fetcher, Registration::new(origin.clone())));
///     runtime.start().await?;
///
///     let server = Server::bind("127.0.0.1:8787", origin).await?;
///     server.run(runtime).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    origin: Url,
}

impl Server {
    /// Binds the server to the given TCP address. Origin-form request targets
    /// are resolved against `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>, origin: Url) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            origin,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `runtime`.
    ///
    /// Runs until the process is terminated or the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run(self, runtime: Arc<Runtime>) -> Result<(), ServerError> {
        let origin = Arc::new(self.origin);
        info!(address = %self.local_addr, origin = %origin, "cachefront listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let runtime = Arc::clone(&runtime);
            let origin = Arc::clone(&origin);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, runtime, origin).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    runtime: Arc<Runtime>,
    origin: Arc<Url>,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let bytes_read = stream.read_buf(&mut buf).await?;

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            break;
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response = Response::new(StatusCode::PAYLOAD_TOO_LARGE)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        // A single read may carry more than one pipelined request.
        while !buf.is_empty() {
            let (mut request, body_offset) = match Request::parse(&buf, &origin) {
                Ok(pair) => pair,
                Err(RequestError::Incomplete) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response = Response::new(StatusCode::BAD_REQUEST)
                        .body(format!("Bad Request: {e}"))
                        .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    return Ok(());
                }
            };

            let content_length = request.content_length().unwrap_or(0);
            let total_needed = body_offset + content_length;
            if buf.len() < total_needed {
                break;
            }
            request.truncate_body(content_length);

            let keep_alive = request.is_keep_alive();
            let bodiless = request.method().is_bodiless();

            debug!(
                peer = %peer_addr,
                method = %request.method(),
                url = %request.url(),
                "dispatching request"
            );

            let dispatched = runtime.dispatch(request).await;
            let response = dispatched.response.keep_alive(keep_alive);
            let wire = if bodiless {
                response.into_head_bytes()
            } else {
                response.into_bytes()
            };
            stream.write_all(&wire).await?;
            stream.flush().await?;

            if let Err(e) = dispatched.tasks.wait().await {
                warn!(peer = %peer_addr, error = %e, "background cache write failed");
            }

            let _ = buf.split_to(total_needed);

            if !keep_alive {
                debug!(peer = %peer_addr, "Connection: close, shutting down");
                return Ok(());
            }
        }
    }

    Ok(())
}
