//! HTTP transport for DoH queries.
//!
//! A single fallback handler receives every request, so routing decisions
//! stay in the resolver. TLS is expected to be terminated in front of this
//! listener.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{ALLOW, HOST};
use axum::http::{HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::error;

use super::QueryLogger;
use crate::error::{ProxyError, Result};
use crate::resolver::{DohRequest, MAX_DNS_MESSAGE_SIZE, Resolver, Served};
use crate::upstream::DohResponse;

/// HTTP transport for the DoH proxy.
///
/// Binds to a local address and serves every connection with the same
/// resolver.
pub struct HttpTransport {
    listener: TcpListener,
}

impl HttpTransport {
    /// Bind a TCP listener for the transport.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start serving in a background task until `shutdown` resolves.
    pub fn start<F>(
        self,
        resolver: Arc<Resolver>,
        verbose: bool,
        shutdown: F,
    ) -> JoinHandle<io::Result<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(resolver, QueryLogger::new(verbose));
        tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(shutdown)
                .await
        })
    }
}

#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
    logger: QueryLogger,
}

/// Build the axum router serving DoH on `/` and `/dns-query`.
pub fn router(resolver: Arc<Resolver>, logger: QueryLogger) -> Router {
    Router::new()
        .fallback(handle)
        .with_state(AppState { resolver, logger })
}

async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let result = match into_doh_request(request).await {
        Ok(request) => state.resolver.handle(request).await,
        Err(err) => Err(err),
    };
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(resolution) => {
            match &resolution.served {
                Served::Cached => state.logger.cached(resolution.mode, elapsed_ms),
                Served::Raced { upstream } => {
                    state.logger.raced(resolution.mode, upstream, elapsed_ms)
                }
            }
            resolution.response.into_response()
        }
        Err(err) => {
            state.logger.failed(method.as_str(), &path, &err, elapsed_ms);
            err.into_response()
        }
    }
}

/// Convert an axum request into the resolver's view of it.
///
/// Only POST bodies are read.
async fn into_doh_request(request: Request) -> Result<DohRequest> {
    let (parts, body) = request.into_parts();

    let body = if parts.method == Method::POST {
        read_dns_message(body).await?
    } else {
        Default::default()
    };

    let host = parts
        .headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or_default();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    Ok(DohRequest {
        url: format!("{host}{path_and_query}"),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        method: parts.method,
        headers: parts.headers,
        body,
    })
}

/// Buffer a POST body, stopping as soon as it outgrows a DNS message.
///
/// A body that fails mid-stream is a bad request, not an oversized one.
async fn read_dns_message(body: Body) -> Result<Bytes> {
    let mut stream = body.into_data_stream();
    let mut message = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|_| ProxyError::BadRequest("unreadable request body"))?;
        if message.len() + chunk.len() > MAX_DNS_MESSAGE_SIZE {
            return Err(ProxyError::PayloadTooLarge);
        }
        message.extend_from_slice(&chunk);
    }

    Ok(message.freeze())
}

impl IntoResponse for DohResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ProxyError::RouteNotFound => "Not Found",
            ProxyError::MethodNotAllowed => "Method Not Allowed",
            ProxyError::BadRequest(reason) => *reason,
            ProxyError::PayloadTooLarge => "Payload Too Large",
            ProxyError::AllUpstreamsFailed => "All upstreams failed",
            ProxyError::CacheWriteFailed(_) | ProxyError::Config(_) => {
                error!(error = %self, "unexpected error on request path");
                "Internal Server Error"
            }
        };

        let mut response = (status, body).into_response();
        if matches!(self, ProxyError::MethodNotAllowed) {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, POST"));
        }
        response
    }
}
