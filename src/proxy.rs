//! DoH proxy orchestration.
//!
//! Wires the upstreams, cache and resolver together, binds the HTTP
//! transport and runs the proxy server.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cache::{CacheStore, ResponseCache};
use crate::config::ProxyConfig;
use crate::error::Result;
use crate::race::RaceCoordinator;
use crate::resolver::Resolver;
use crate::transport::http::HttpTransport;
use crate::upstream::HttpUpstream;

/// Build the resolver described by `config`, with real HTTP upstreams.
pub fn build_resolver(config: &ProxyConfig) -> Result<Resolver> {
    let client = HttpUpstream::client()?;
    let upstreams = HttpUpstream::from_set(&client, &config.upstreams);
    let race = RaceCoordinator::new(upstreams, config.timeout);

    let cache = if config.cache_enabled {
        Some(Arc::new(ResponseCache::with_max_entries(config.cache_max_entries))
            as Arc<dyn CacheStore>)
    } else {
        None
    };

    Ok(Resolver::new(race, cache, config.cache_ttl))
}

/// Run the DoH proxy with the given configuration.
///
/// Serves until `shutdown` resolves.
pub async fn run<F>(config: ProxyConfig, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let resolver = Arc::new(build_resolver(&config).map_err(io::Error::other)?);

    let transport = HttpTransport::bind(config.bind_addr).await?;
    let local_addr = transport.local_addr()?;
    info!(
        addr = %local_addr,
        timeout_ms = config.timeout.as_millis() as u64,
        cache = config.cache_enabled,
        "DoH proxy listening"
    );
    info!(
        upstreams = %config.upstreams.endpoints().join(", "),
        "Racing upstreams"
    );

    let server = transport.start(resolver.clone(), config.verbose, shutdown);

    // Report stats and sweep the cache every minute
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let purged = resolver.purge_cache();
            let stats = resolver.stats_snapshot_and_reset();
            info!(
                uptime_secs = stats.uptime_secs,
                cache = resolver.cache_len(),
                purged,
                requests = stats.requests,
                raced = stats.raced,
                cached = stats.cached,
                failed = stats.failed,
                rejected = stats.rejected,
                avg_response_ms = stats.avg_response_ms,
                "stats"
            );
        }
    });

    let result = server.await.map_err(io::Error::other)?;
    reporter.abort();
    result
}
