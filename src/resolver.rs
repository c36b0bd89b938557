//! DoH request resolution.
//!
//! Handles the request pipeline:
//! 1. Classify (path and method)
//! 2. GET: cache lookup, race on miss, schedule cache write
//! 3. POST: race directly, never cached
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL};
use axum::http::{HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use tracing::debug;

use crate::cache::{CacheKey, CacheStore};
use crate::classify::{DeliveryMode, classify};
use crate::error::{ProxyError, Result};
use crate::race::RaceCoordinator;
use crate::stats::{Stats, StatsSnapshot};
use crate::upstream::{DohQuery, DohResponse};

/// Largest DNS message a DoH request may carry.
pub const MAX_DNS_MESSAGE_SIZE: usize = 65_535;

/// Headers that describe the upstream connection, not the response.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// An inbound request as delivered by a transport.
#[derive(Debug, Clone)]
pub struct DohRequest {
    pub method: Method,
    pub path: String,
    /// Full request URL (authority, path and query), used as cache key.
    pub url: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Served {
    Cached,
    Raced { upstream: String },
}

/// A resolved request, ready to be written back to the client.
#[derive(Debug)]
pub struct Resolution {
    pub mode: DeliveryMode,
    pub served: Served,
    pub response: DohResponse,
}

/// Resolver handles DoH request processing decisions.
///
/// Shared by every connection; holds no per-request state.
pub struct Resolver {
    race: RaceCoordinator,
    cache: Option<Arc<dyn CacheStore>>,
    cache_ttl: Duration,
    cache_control: HeaderValue,
    stats: Stats,
}

impl Resolver {
    /// Create a resolver. Passing `None` for `cache` disables caching; GET
    /// responses still carry the cache headers.
    pub fn new(
        race: RaceCoordinator,
        cache: Option<Arc<dyn CacheStore>>,
        cache_ttl: Duration,
    ) -> Self {
        let cache_control = HeaderValue::try_from(format!("public, max-age={}", cache_ttl.as_secs()))
            .expect("max-age header is ASCII");

        Self {
            race,
            cache,
            cache_ttl,
            cache_control,
            stats: Stats::new(),
        }
    }

    /// Process a request and produce the response to send back.
    ///
    /// This is the main entry point for transports.
    pub async fn handle(&self, request: DohRequest) -> Result<Resolution> {
        let start = Instant::now();
        let result = self.dispatch(request).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(Resolution {
                served: Served::Cached,
                ..
            }) => self.stats.record_cached(elapsed_ms),
            Ok(_) => self.stats.record_raced(elapsed_ms),
            Err(ProxyError::AllUpstreamsFailed) => self.stats.record_failed(elapsed_ms),
            Err(_) => self.stats.record_rejected(elapsed_ms),
        }

        result
    }

    async fn dispatch(&self, request: DohRequest) -> Result<Resolution> {
        match classify(&request.method, &request.path)? {
            DeliveryMode::Get => self.resolve_get(request).await,
            DeliveryMode::Post => self.resolve_post(request).await,
        }
    }

    async fn resolve_get(&self, request: DohRequest) -> Result<Resolution> {
        let query_string = request
            .query
            .filter(|q| !q.is_empty())
            .ok_or(ProxyError::BadRequest("missing DoH query parameters"))?;

        let key = CacheKey::new(&Method::GET, &request.url);

        if let Some(cache) = &self.cache {
            if let Some(response) = cache.get(&key) {
                return Ok(Resolution {
                    mode: DeliveryMode::Get,
                    served: Served::Cached,
                    response,
                });
            }
        }

        let winner = self.race.race(Arc::new(DohQuery::get(query_string))).await?;
        let upstream = self.race.upstream_name(winner.index).to_string();

        let mut response = forwardable(winner.response);
        response
            .headers
            .insert(CACHE_CONTROL, self.cache_control.clone());
        response
            .headers
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

        if let Some(cache) = &self.cache {
            self.schedule_cache_write(cache.clone(), key, response.clone());
        }

        Ok(Resolution {
            mode: DeliveryMode::Get,
            served: Served::Raced { upstream },
            response,
        })
    }

    async fn resolve_post(&self, request: DohRequest) -> Result<Resolution> {
        if request.body.is_empty() {
            return Err(ProxyError::BadRequest("empty DNS message"));
        }
        if request.body.len() > MAX_DNS_MESSAGE_SIZE {
            return Err(ProxyError::PayloadTooLarge);
        }

        let query = DohQuery::post(request.body).with_client_headers(&request.headers);
        let winner = self.race.race(Arc::new(query)).await?;
        let upstream = self.race.upstream_name(winner.index).to_string();

        Ok(Resolution {
            mode: DeliveryMode::Post,
            served: Served::Raced { upstream },
            response: forwardable(winner.response),
        })
    }

    /// Write to the cache in a detached task. The response never waits on
    /// it, and a failed write is only logged.
    fn schedule_cache_write(&self, cache: Arc<dyn CacheStore>, key: CacheKey, response: DohResponse) {
        let ttl = self.cache_ttl;
        tokio::spawn(async move {
            if let Err(err) = cache.put(key, response, ttl) {
                debug!(error = %err, "cache write failed");
            }
        });
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    /// Drop expired cache entries, returning how many were removed.
    pub fn purge_cache(&self) -> usize {
        self.cache.as_ref().map(|c| c.purge_expired()).unwrap_or(0)
    }

    pub fn upstream_count(&self) -> usize {
        self.race.len()
    }
}

fn forwardable(mut response: DohResponse) -> DohResponse {
    for name in HOP_BY_HOP {
        response.headers.remove(name);
    }
    response
}
