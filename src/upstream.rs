//! Upstream DoH resolvers.
//!
//! An [`Upstream`] sends one query to one resolver. The race coordinator
//! only sees this trait; [`HttpUpstream`] is the real implementation.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::future::BoxFuture;

use crate::classify::DeliveryMode;
use crate::config::UpstreamSet;
use crate::error::{AttemptError, ProxyError, Result};

/// DoH media type, used for both `Content-Type` and `Accept`.
pub const DNS_MESSAGE: &str = "application/dns-message";

/// Client address headers copied to upstreams for EDNS Client Subnet.
pub const CLIENT_IP_HEADERS: [&str; 2] = ["cf-connecting-ip", "x-forwarded-for"];

/// Redirect hops an upstream may take before the attempt is given up.
pub const MAX_REDIRECTS: usize = 5;

/// An inbound DoH query. Opaque: the DNS message is never parsed.
#[derive(Debug, Clone)]
pub struct DohQuery {
    mode: DeliveryMode,
    query_string: String,
    body: Bytes,
    client_headers: HeaderMap,
}

impl DohQuery {
    /// A GET query; `query_string` is forwarded verbatim (without `?`).
    pub fn get(query_string: impl Into<String>) -> Self {
        Self {
            mode: DeliveryMode::Get,
            query_string: query_string.into(),
            body: Bytes::new(),
            client_headers: HeaderMap::new(),
        }
    }

    /// A POST query carrying a raw wire-format message.
    pub fn post(body: Bytes) -> Self {
        Self {
            mode: DeliveryMode::Post,
            query_string: String::new(),
            body,
            client_headers: HeaderMap::new(),
        }
    }

    /// Copy client address headers from the inbound request.
    pub fn with_client_headers(mut self, inbound: &HeaderMap) -> Self {
        for name in CLIENT_IP_HEADERS {
            let name = HeaderName::from_static(name);
            for value in inbound.get_all(&name) {
                self.client_headers.append(name.clone(), value.clone());
            }
        }
        self
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn client_headers(&self) -> &HeaderMap {
        &self.client_headers
    }
}

/// A complete response snapshot: status, headers and body.
#[derive(Debug, Clone)]
pub struct DohResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DohResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// One upstream DoH resolver.
///
/// Returned futures are `'static` so each attempt can run as its own task;
/// dropping the future must abandon the request.
pub trait Upstream: Send + Sync + 'static {
    /// Endpoint identity, for logs.
    fn name(&self) -> &str;

    /// Send the query. Non-success statuses are returned as responses;
    /// judging them is the caller's job.
    fn send(
        &self,
        query: Arc<DohQuery>,
    ) -> BoxFuture<'static, std::result::Result<DohResponse, AttemptError>>;
}

/// Upstream reached over HTTP(S) with a shared, pooled client.
pub struct HttpUpstream {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Build one upstream per endpoint, all sharing `client`.
    pub fn from_set(client: &reqwest::Client, set: &UpstreamSet) -> Vec<Arc<dyn Upstream>> {
        set.endpoints()
            .iter()
            .map(|endpoint| {
                Arc::new(HttpUpstream::new(client.clone(), endpoint.clone())) as Arc<dyn Upstream>
            })
            .collect()
    }

    /// Build the shared outbound client.
    ///
    /// Keep-alive pooling is left to reqwest. No per-request timeout: only
    /// the race as a whole is time-bounded. Redirects are followed, up to
    /// [`MAX_REDIRECTS`] hops.
    pub fn client() -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("dohrace/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProxyError::Config(format!("http client: {e}")))
    }

    fn url_for(&self, query: &DohQuery) -> String {
        match query.mode() {
            DeliveryMode::Get if !query.query_string().is_empty() => {
                let sep = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}{}", self.endpoint, sep, query.query_string())
            }
            _ => self.endpoint.clone(),
        }
    }
}

impl Upstream for HttpUpstream {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn send(
        &self,
        query: Arc<DohQuery>,
    ) -> BoxFuture<'static, std::result::Result<DohResponse, AttemptError>> {
        let url = self.url_for(&query);
        let client = self.client.clone();

        Box::pin(async move {
            let mut headers = query.client_headers().clone();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(DNS_MESSAGE));
            headers.insert(ACCEPT, HeaderValue::from_static(DNS_MESSAGE));

            let request = match query.mode() {
                DeliveryMode::Get => client.get(url),
                DeliveryMode::Post => client.post(url).body(query.body().clone()),
            };

            let response = request.headers(headers).send().await?;
            let status = response.status();
            let headers = response.headers().clone();

            // Only winning bodies are ever forwarded.
            let body = if status.is_success() {
                response.bytes().await?
            } else {
                Bytes::new()
            };

            Ok(DohResponse {
                status,
                headers,
                body,
            })
        })
    }
}
