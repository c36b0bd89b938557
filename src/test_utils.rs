//! Test doubles shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::error::AttemptError;
use crate::upstream::{DohQuery, DohResponse, Upstream};

/// What a scripted upstream does once its delay has passed.
#[derive(Debug, Clone)]
pub enum Script {
    Respond(StatusCode, &'static [u8]),
    Fail,
    Hang,
}

/// Observations about one scripted upstream, shared with the test.
#[derive(Default)]
pub struct Probe {
    pub calls: AtomicUsize,
    pub cancelled: AtomicBool,
    pub cancel_notify: Notify,
    pub last_query: std::sync::Mutex<Option<DohQuery>>,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the in-flight attempt has been dropped before finishing.
    pub async fn wait_cancelled(&self) -> bool {
        if self.was_cancelled() {
            return true;
        }
        tokio::time::timeout(Duration::from_secs(5), self.cancel_notify.notified())
            .await
            .is_ok()
    }
}

/// Marks the probe cancelled if dropped while still armed.
struct CancelGuard {
    probe: Arc<Probe>,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.probe.cancelled.store(true, Ordering::SeqCst);
            self.probe.cancel_notify.notify_one();
        }
    }
}

/// Upstream that follows a fixed script after a delay.
pub struct ScriptedUpstream {
    name: String,
    delay: Duration,
    script: Script,
    probe: Arc<Probe>,
}

impl ScriptedUpstream {
    pub fn new(name: &str, delay_ms: u64, script: Script) -> (Arc<dyn Upstream>, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let upstream = Arc::new(Self {
            name: name.to_string(),
            delay: Duration::from_millis(delay_ms),
            script,
            probe: probe.clone(),
        });
        (upstream, probe)
    }
}

impl Upstream for ScriptedUpstream {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(
        &self,
        query: Arc<DohQuery>,
    ) -> BoxFuture<'static, Result<DohResponse, AttemptError>> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.probe.last_query.lock() {
            *last = Some((*query).clone());
        }

        let delay = self.delay;
        let script = self.script.clone();
        let name = self.name.clone();
        let mut guard = CancelGuard {
            probe: self.probe.clone(),
            armed: true,
        };

        Box::pin(async move {
            tokio::time::sleep(delay).await;

            let result = match script {
                Script::Respond(status, body) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("x-upstream", HeaderValue::from_str(&name).unwrap());
                    headers.insert("connection", HeaderValue::from_static("keep-alive"));
                    Ok(DohResponse {
                        status,
                        headers,
                        body: Bytes::from_static(body),
                    })
                }
                Script::Fail => Err(AttemptError::Transport("connection refused".to_string())),
                Script::Hang => std::future::pending().await,
            };

            guard.armed = false;
            result
        })
    }
}

/// Minimal successful DNS response body used across tests.
pub const ANSWER: &[u8] = b"\x12\x34\x81\x80\x00\x01\x00\x01\x00\x00\x00\x00";
