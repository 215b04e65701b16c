//! Page cache configuration, resolved from the `[cache]` settings section.

use std::num::NonZeroUsize;
use std::time::Duration;

pub const DEFAULT_INDEX_TTL_SECS: u64 = 20;
pub const DEFAULT_KEY_PREFIX: &str = "index_page";
pub const DEFAULT_MAX_ENTRIES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    /// How long a stored page is served before it is recomputed.
    pub ttl: Duration,
    pub key_prefix: String,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(DEFAULT_INDEX_TTL_SECS),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.index_ttl,
            key_prefix: settings.key_prefix.clone(),
            max_entries: settings.max_entries.get(),
        }
    }
}

impl CacheConfig {
    /// Key for a cached path. The query string never takes part.
    pub fn key_for(&self, path: &str) -> String {
        format!("{}:{}", self.key_prefix, path)
    }

    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
