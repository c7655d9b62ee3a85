//! End-to-end tests over real sockets.
//!
//! Uses wiremock as the upstream application and talks to the agent with a
//! raw TCP client.

use std::sync::Arc;
use std::time::Duration;

use cachefront::cache::{CacheStorage, FileStorage, RequestIdentity};
use cachefront::fetch::{Fetch, FetchError, HttpFetcher};
use cachefront::http::{Method, Request, StatusCode};
use cachefront::lifecycle::{CacheFirstWorker, Registration, Runtime};
use cachefront::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn http_fetcher_relays_status_headers_and_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/niv.json"))
        .and(header("accept", "application/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .insert_header("etag", "\"abc\"")
                .set_body_string("{\"book\":\"John\"}"),
        )
        .mount(&upstream)
        .await;

    let url = Url::parse(&format!("{}/niv.json", upstream.uri())).unwrap();
    let request = Request::get(url)
        .header("Accept", "application/json")
        .header("Connection", "keep-alive");
    let response = fetcher().fetch(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("etag"), Some("\"abc\""));
    assert!(!response.headers().contains("content-length"));
    assert_eq!(response.body_ref().as_bytes(), b"{\"book\":\"John\"}");
}

#[tokio::test]
async fn http_fetcher_treats_error_statuses_as_responses() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&upstream)
        .await;

    let url = Url::parse(&format!("{}/submit", upstream.uri())).unwrap();
    let request = Request::new(Method::Post, url).body_bytes(&b"x=1"[..]);
    let response = fetcher().fetch(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn http_fetcher_reports_unreachable_hosts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/")).unwrap();
    let err = fetcher().fetch(Request::get(url)).await.unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }));
}

async fn roundtrip(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}

#[tokio::test]
async fn agent_serves_network_then_cache_then_fallback() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("home"))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/offline.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_string("vader"),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/news"))
        .respond_with(ResponseTemplate::new(200).set_body_string("headlines"))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    // Outlives the fetch timeout, so the agent sees a network failure.
    Mock::given(method("GET"))
        .and(path("/unknown.js"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&upstream)
        .await;

    let origin = Url::parse(&upstream.uri()).unwrap();
    let tmp = tempfile::TempDir::new().unwrap();
    let storage = Arc::new(FileStorage::new(tmp.path()));
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new(Duration::from_millis(500)).unwrap());
    let fallback = origin.join("/offline.jpg").unwrap();
    let worker = CacheFirstWorker::new(
        storage.clone(),
        Arc::clone(&fetcher),
        "v1",
        vec![origin.join("/").unwrap(), fallback.clone()],
        &fallback,
    );
    let runtime = Arc::new(Runtime::new(
        Arc::new(worker),
        fetcher,
        Registration::new(origin.clone()),
    ));
    runtime.start().await.unwrap();

    let server = Server::bind("127.0.0.1:0", origin.clone()).await.unwrap();
    let addr = server.local_addr();
    let server_task = tokio::spawn(server.run(runtime));

    let first = roundtrip(addr, "GET /news HTTP/1.1\r\nHost: app\r\nConnection: close\r\n\r\n").await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(first.ends_with("headlines"));

    // The connection only closes after the detached write finished.
    let news = RequestIdentity::get(&origin.join("/news").unwrap());
    assert!(storage.match_any(&news).await.unwrap().is_some());

    let second = roundtrip(addr, "GET /news HTTP/1.1\r\nHost: app\r\nConnection: close\r\n\r\n").await;
    assert!(second.ends_with("headlines"));

    let third = roundtrip(addr, "GET /unknown.js HTTP/1.1\r\nHost: app\r\nConnection: close\r\n\r\n").await;
    assert!(third.to_ascii_lowercase().contains("content-type: image/jpeg\r\n"));
    assert!(third.ends_with("vader"));

    server_task.abort();
}
