//! Proxy configuration.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;

use crate::error::{ProxyError, Result};

/// Upstreams used when none are configured.
pub const DEFAULT_UPSTREAMS: [&str; 3] = [
    "https://cloudflare-dns.com/dns-query",
    "https://dns.google/dns-query",
    "https://dns.quad9.net/dns-query",
];

/// Global race timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Freshness window for cached GET responses.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Upper bound on cached GET responses.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Ordered, immutable set of upstream DoH endpoints.
///
/// Order carries no priority: every endpoint is raced at once.
#[derive(Debug, Clone)]
pub struct UpstreamSet {
    endpoints: Vec<String>,
}

impl UpstreamSet {
    /// Validate and build the set.
    ///
    /// Every endpoint must be an absolute `http` or `https` URL and the set
    /// must not be empty.
    pub fn new<I, S>(endpoints: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints.into_iter().map(Into::into).collect();

        if endpoints.is_empty() {
            return Err(ProxyError::Config("no upstream endpoints".to_string()));
        }

        for endpoint in &endpoints {
            let url = Url::parse(endpoint)
                .map_err(|e| ProxyError::Config(format!("invalid upstream {endpoint}: {e}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ProxyError::Config(format!(
                    "upstream {endpoint} must use http or https"
                )));
            }
        }

        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for UpstreamSet {
    fn default() -> Self {
        Self {
            endpoints: DEFAULT_UPSTREAMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Configuration for the DoH proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address to bind (e.g., 127.0.0.1:8053)
    pub bind_addr: SocketAddr,
    /// Upstream DoH endpoints (races all, uses first success)
    pub upstreams: UpstreamSet,
    /// Hard limit on a whole race
    pub timeout: Duration,
    /// Freshness window for cached GET responses
    pub cache_ttl: Duration,
    /// Serve repeated GET queries from the cache
    pub cache_enabled: bool,
    /// Most responses the cache holds at once
    pub cache_max_entries: usize,
    /// Enable per-query logging
    pub verbose: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8053)),
            upstreams: UpstreamSet::default(),
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_enabled: true,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            verbose: false,
        }
    }
}
