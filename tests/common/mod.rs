use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use tokio::net::TcpListener;

use dohrace::cache::{CacheStore, ResponseCache};
use dohrace::race::RaceCoordinator;
use dohrace::resolver::Resolver;
use dohrace::transport::http::HttpTransport;
use dohrace::upstream::{HttpUpstream, Upstream};

pub const ANSWER: &[u8] = b"\x12\x34\x81\x80\x00\x01\x00\x01\x00\x00\x00\x00";
pub const QUERY: &str = "dns=EjQBAAABAAAAAAAAB2V4YW1wbGUDY29tAAABAAE";

/// A request as seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Default)]
pub struct UpstreamLog {
    hits: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl UpstreamLog {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Seen {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    delay: Duration,
    body: &'static [u8],
    log: Arc<UpstreamLog>,
}

async fn answer(State(state): State<MockState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, 65_536).await.unwrap_or_default();

    state.log.hits.fetch_add(1, Ordering::SeqCst);
    state.log.seen.lock().unwrap().push(Seen {
        method: parts.method,
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
    });

    tokio::time::sleep(state.delay).await;

    (
        state.status,
        [("content-type", "application/dns-message")],
        state.body,
    )
        .into_response()
}

/// Spawn a mock DoH upstream and return its `/dns-query` URL.
pub async fn spawn_upstream(
    status: StatusCode,
    delay: Duration,
    body: &'static [u8],
) -> (String, Arc<UpstreamLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(UpstreamLog::default());

    let app = Router::new().fallback(answer).with_state(MockState {
        status,
        delay,
        body,
        log: log.clone(),
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}/dns-query"), log)
}

/// Spawn an upstream that permanently redirects every request to `target`,
/// keeping the query string. Returns its `/dns-query` URL.
pub async fn spawn_redirect(target: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new().fallback(move |request: Request| {
        let target = target.clone();
        async move {
            match request.uri().query() {
                Some(query) => Redirect::permanent(&format!("{target}?{query}")),
                None => Redirect::permanent(&target),
            }
        }
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}/dns-query")
}

pub fn test_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Spawn the proxy in front of `endpoints` and return its address.
pub async fn spawn_proxy(endpoints: &[String], timeout: Duration) -> SocketAddr {
    spawn_proxy_with(test_client(), endpoints, timeout).await
}

/// Like [`spawn_proxy`], with upstreams sharing `client`.
pub async fn spawn_proxy_with(
    client: reqwest::Client,
    endpoints: &[String],
    timeout: Duration,
) -> SocketAddr {
    let upstreams: Vec<Arc<dyn Upstream>> = endpoints
        .iter()
        .map(|e| Arc::new(HttpUpstream::new(client.clone(), e.clone())) as Arc<dyn Upstream>)
        .collect();
    let race = RaceCoordinator::new(upstreams, timeout);
    let cache: Arc<dyn CacheStore> = Arc::new(ResponseCache::new());
    let resolver = Arc::new(Resolver::new(race, Some(cache), Duration::from_secs(300)));

    let transport = HttpTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    let _server = transport.start(resolver, false, std::future::pending());

    addr
}
