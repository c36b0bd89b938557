//! Transport layer for the DoH proxy.
//!
//! Receives DoH requests from clients over HTTP and hands them to the
//! resolver.

pub mod http;

use tracing::info;

use crate::classify::DeliveryMode;
use crate::error::ProxyError;

/// Logger for DoH query events.
///
/// Per-query lines are only emitted when enabled (`--verbose`).
#[derive(Debug, Clone, Copy)]
pub struct QueryLogger {
    enabled: bool,
}

impl QueryLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn cached(&self, mode: DeliveryMode, elapsed_ms: f64) {
        if self.enabled {
            info!(
                mode = mode.as_str(),
                total_ms = elapsed_ms,
                "CACHED"
            );
        }
    }

    pub fn raced(&self, mode: DeliveryMode, upstream: &str, elapsed_ms: f64) {
        if self.enabled {
            info!(
                mode = mode.as_str(),
                upstream,
                total_ms = elapsed_ms,
                "RACED"
            );
        }
    }

    pub fn failed(&self, method: &str, path: &str, err: &ProxyError, elapsed_ms: f64) {
        if self.enabled {
            info!(
                method,
                path,
                error = %err,
                total_ms = elapsed_ms,
                "FAILED"
            );
        }
    }
}
