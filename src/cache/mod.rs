//! Rendered page cache.
//!
//! Holds whole HTTP responses for a small set of public routes (today only
//! the home page). Entries live under a fixed key per path, so every query
//! variant of a route shares one slot. Entries expire passively after the
//! configured TTL and can be dropped all at once through [`PageCache::clear`].
//!
//! ```toml
//! [cache]
//! enabled = true
//! index_ttl_seconds = 20
//! key_prefix = "index_page"
//! max_entries = 64
//! ```

mod config;
mod lock;
mod middleware;
mod store;

pub use config::CacheConfig;
pub use middleware::{CacheState, SkipPageCache, page_cache_layer};
pub use store::{CachedResponse, PageCache};
