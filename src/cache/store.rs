//! TTL-bounded LRU of rendered responses.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

/// A buffered response ready to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CachedResponse {
    pub fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);

        for (name, value) in self.headers {
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                builder = builder.header(name, header_value);
            }
        }

        builder
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: CachedResponse,
    stored_at: Instant,
}

/// Rendered-page store.
///
/// Expiry is passive: nothing sweeps the map, a read that finds an entry
/// older than the TTL drops it and reports a miss.
pub struct PageCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            ttl: config.ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as if the current time were `now`.
    pub fn get_at(&self, key: &str, now: Instant) -> Option<CachedResponse> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");

        let expired = match entries.peek(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.stored_at) >= self.ttl,
        };

        if expired {
            entries.pop(key);
            counter!("postline_page_cache_expired_total").increment(1);
            return None;
        }

        entries.get(key).map(|entry| entry.response.clone())
    }

    pub fn set(&self, key: String, response: CachedResponse) {
        self.set_at(key, response, Instant::now());
    }

    pub fn set_at(&self, key: String, response: CachedResponse, now: Instant) {
        let entry = CacheEntry {
            response,
            stored_at: now,
        };
        let mut entries = rw_write(&self.entries, SOURCE, "set");
        let displaced = entries.push(key.clone(), entry);
        if displaced.is_some_and(|(evicted, _)| evicted != key) {
            counter!("postline_page_cache_evict_total").increment(1);
        }
    }

    /// Drop every entry. Returns how many were held.
    pub fn clear(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
