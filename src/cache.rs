//! Response cache for GET queries, with per-entry freshness.

use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use axum::http::Method;
use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::config::DEFAULT_CACHE_MAX_ENTRIES;
use crate::error::{ProxyError, Result};
use crate::upstream::DohResponse;

/// Cache key: method plus the full request URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(method: &Method, url: &str) -> Self {
        Self(format!("{method} {url}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for cached responses.
///
/// `get` and `put` must each be atomic. Callers never hold anything across
/// the two.
pub trait CacheStore: Send + Sync + 'static {
    /// Fresh entry for `key`, if any.
    fn get(&self, key: &CacheKey) -> Option<DohResponse>;

    /// Store `response` under `key`, fresh for `ttl`.
    fn put(&self, key: CacheKey, response: DohResponse, ttl: Duration) -> Result<()>;

    /// Number of stored entries, fresh or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed.
    fn purge_expired(&self) -> usize {
        0
    }
}

struct CacheEntry {
    response: DohResponse,
    expires_at: Instant,
}

/// In-memory [`CacheStore`].
///
/// Expired entries are removed when looked up, or by `purge_expired`.
/// Holds at most `max_entries` responses; inserting a new key into a full
/// cache first drops expired entries, then the one closest to expiry.
pub struct ResponseCache {
    entries: RwLock<FxHashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_CACHE_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            max_entries: max_entries.max(1),
        }
    }
}

fn make_room(entries: &mut FxHashMap<CacheKey, CacheEntry>, max_entries: usize, now: Instant) {
    if entries.len() < max_entries {
        return;
    }

    entries.retain(|_, entry| now < entry.expires_at);
    if entries.len() < max_entries {
        return;
    }

    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.expires_at)
        .map(|(key, _)| key.clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for ResponseCache {
    fn get(&self, key: &CacheKey) -> Option<DohResponse> {
        let now = Instant::now();

        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            match entries.get(key) {
                Some(entry) if now < entry.expires_at => return Some(entry.response.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        if let Some(entry) = entries.get(key) {
            if now >= entry.expires_at {
                entries.remove(key);
            }
        }
        None
    }

    fn put(&self, key: CacheKey, response: DohResponse, ttl: Duration) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ProxyError::CacheWriteFailed("cache lock poisoned".to_string()))?;

        let now = Instant::now();
        if !entries.contains_key(&key) {
            make_room(&mut entries, self.max_entries, now);
        }
        entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }
}
