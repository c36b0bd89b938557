use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dohrace::config::{DEFAULT_UPSTREAMS, ProxyConfig, UpstreamSet};
use dohrace::proxy;

#[derive(Parser)]
#[command(name = "dohrace")]
#[command(about = "DNS-over-HTTPS proxy that races upstream resolvers", long_about = None)]
struct Args {
    /// Local port to listen on
    #[arg(short, long, env = "DOHRACE_PORT", default_value = "8053")]
    port: u16,

    /// Bind address
    #[arg(short, long, env = "DOHRACE_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Upstream DoH endpoint URL (repeat or comma separate to race several)
    #[arg(
        short,
        long = "upstream",
        env = "DOHRACE_UPSTREAMS",
        value_delimiter = ',',
        default_values = DEFAULT_UPSTREAMS
    )]
    upstreams: Vec<String>,

    /// Give up on a race after this many milliseconds
    #[arg(long, env = "DOHRACE_TIMEOUT_MS", default_value = "2000")]
    timeout_ms: u64,

    /// Freshness window for cached GET responses, in seconds
    #[arg(long, env = "DOHRACE_CACHE_TTL", default_value = "300")]
    cache_ttl: u64,

    /// Most GET responses kept in the cache at once
    #[arg(long, env = "DOHRACE_CACHE_ENTRIES", default_value = "10000")]
    cache_entries: usize,

    /// Never serve GET responses from the cache
    #[arg(long, env = "DOHRACE_NO_CACHE")]
    no_cache: bool,

    /// Log every query and upstream attempt
    #[arg(short, long, env = "DOHRACE_VERBOSE")]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> dohrace::error::Result<ProxyConfig> {
        Ok(ProxyConfig {
            bind_addr: SocketAddr::new(self.bind, self.port),
            upstreams: UpstreamSet::new(self.upstreams)?,
            timeout: Duration::from_millis(self.timeout_ms),
            cache_ttl: Duration::from_secs(self.cache_ttl),
            cache_enabled: !self.no_cache,
            cache_max_entries: self.cache_entries,
            verbose: self.verbose,
        })
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info,dohrace=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.into_config()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(config, shutdown_signal()))?;

    Ok(())
}
