//! First-success-wins racing across upstream resolvers.
//!
//! Every upstream gets the query at the same time, each attempt in its own
//! task. The coordinator is the single consumer of a completion channel:
//! the first successful response it receives wins, every other attempt is
//! aborted, and a single timer bounds the whole race.
//!
//! Tie-break: when several attempts succeed at effectively the same moment,
//! whichever completion reaches the channel first wins. This depends on
//! task scheduling and is not deterministic. Configuration order gives no
//! preference.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AttemptError, ProxyError, Result};
use crate::upstream::{DohQuery, DohResponse, Upstream};

/// The outcome of a successful race.
#[derive(Debug)]
pub struct Winner {
    /// Position of the winning upstream in the resolver set.
    pub index: usize,
    pub response: DohResponse,
    pub elapsed: Duration,
}

/// Cancellation handles for in-flight attempts, indexed by attempt.
///
/// Dropping the set aborts whatever is still running, so attempts never
/// outlive the race, including when the race future itself is dropped.
struct Attempts {
    handles: Vec<AbortHandle>,
}

impl Attempts {
    fn with_capacity(n: usize) -> Self {
        Self {
            handles: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, handle: AbortHandle) {
        self.handles.push(handle);
    }

    /// Abort every attempt except `winner`.
    ///
    /// Aborting a task that already finished is a no-op.
    fn cancel_except(&self, winner: usize) {
        for (index, handle) in self.handles.iter().enumerate() {
            if index != winner {
                handle.abort();
            }
        }
    }

    fn cancel_all(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for Attempts {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Races a query across a fixed set of upstreams.
#[derive(Clone)]
pub struct RaceCoordinator {
    upstreams: Arc<[Arc<dyn Upstream>]>,
    timeout: Duration,
}

impl RaceCoordinator {
    pub fn new(upstreams: Vec<Arc<dyn Upstream>>, timeout: Duration) -> Self {
        Self {
            upstreams: upstreams.into(),
            timeout,
        }
    }

    pub fn upstream_name(&self, index: usize) -> &str {
        self.upstreams
            .get(index)
            .map(|u| u.name())
            .unwrap_or("<unknown>")
    }

    pub fn len(&self) -> usize {
        self.upstreams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one race.
    ///
    /// Returns the first response with a success status. Fails with
    /// [`ProxyError::AllUpstreamsFailed`] once every attempt has failed, or
    /// when the timeout fires first. Individual failures are only logged.
    pub async fn race(&self, query: Arc<DohQuery>) -> Result<Winner> {
        let start = Instant::now();

        if self.upstreams.is_empty() {
            return Err(ProxyError::AllUpstreamsFailed);
        }

        let (tx, mut rx) = mpsc::channel(self.upstreams.len());
        let mut attempts = Attempts::with_capacity(self.upstreams.len());

        for (index, upstream) in self.upstreams.iter().enumerate() {
            let attempt = upstream.send(query.clone());
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let result = attempt.await;
                let _ = tx.send((index, result)).await;
            });
            attempts.push(handle.abort_handle());
        }

        // Only attempts hold senders now, so the channel closes once all of
        // them have reported.
        drop(tx);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                completion = rx.recv() => {
                    let Some((index, result)) = completion else {
                        debug!(upstreams = self.upstreams.len(), "every upstream failed");
                        return Err(ProxyError::AllUpstreamsFailed);
                    };

                    match judge(result) {
                        Ok(response) => {
                            attempts.cancel_except(index);
                            let elapsed = start.elapsed();
                            debug!(
                                upstream = self.upstream_name(index),
                                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                                "race won"
                            );
                            return Ok(Winner { index, response, elapsed });
                        }
                        Err(err) => {
                            debug!(
                                upstream = self.upstream_name(index),
                                error = %err,
                                "upstream attempt failed"
                            );
                        }
                    }
                }
                _ = &mut deadline => {
                    attempts.cancel_all();
                    debug!(timeout_ms = self.timeout.as_millis() as u64, "race timed out");
                    return Err(ProxyError::AllUpstreamsFailed);
                }
            }
        }
    }
}

/// Transport errors and non-success statuses count the same.
fn judge(
    result: std::result::Result<DohResponse, AttemptError>,
) -> std::result::Result<DohResponse, AttemptError> {
    let response = result?;
    if response.is_success() {
        Ok(response)
    } else {
        Err(AttemptError::Status(response.status))
    }
}
