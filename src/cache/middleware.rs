//! Page cache middleware.
//!
//! Serves GET requests for the wrapped routes from [`PageCache`] and stores
//! successful renders. Requests carrying [`SkipPageCache`] (set by the auth
//! layer for signed-in viewers) bypass the cache in both directions.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, Limited};
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::{CacheConfig, PageCache, store::CachedResponse};

const MAX_CACHED_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared cache state for middleware.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub pages: Arc<PageCache>,
}

impl CacheState {
    pub fn new(config: CacheConfig) -> Self {
        let pages = Arc::new(PageCache::new(&config));
        Self { config, pages }
    }
}

/// Request extension marking a request whose response is viewer-specific.
#[derive(Debug, Clone, Copy)]
pub struct SkipPageCache;

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn page_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled
        || request.method() != Method::GET
        || request.extensions().get::<SkipPageCache>().is_some()
    {
        return next.run(request).await;
    }

    let key = cache.config.key_for(request.uri().path());

    if let Some(cached) = cache.pages.get(&key) {
        counter!("postline_page_cache_hits_total").increment(1);
        debug!(cache = "page", outcome = "hit", key = %key, "serving cached page");
        return cached.into_response();
    }

    counter!("postline_page_cache_misses_total").increment(1);
    debug!(cache = "page", outcome = "miss", key = %key, "rendering page");

    let response = next.run(request).await;
    if !should_store(&response) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match Limited::new(body, MAX_CACHED_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(cache = "page", key = %key, error = %err, "failed to buffer page for caching");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    cache.pages.set(
        key,
        CachedResponse {
            status: parts.status.as_u16(),
            headers: parts
                .headers
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
                .collect(),
            body: bytes.clone(),
        },
    );

    Response::from_parts(parts, Body::from(bytes))
}

fn should_store(response: &Response) -> bool {
    response.status() == StatusCode::OK && !response.headers().contains_key(SET_COOKIE)
}
