use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber. `RUST_LOG` directives win over the
/// configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "postline_page_cache_hits_total",
            Unit::Count,
            "Pages served from the rendered page cache."
        );
        describe_counter!(
            "postline_page_cache_misses_total",
            Unit::Count,
            "Cacheable requests that had to be rendered."
        );
        describe_counter!(
            "postline_page_cache_expired_total",
            Unit::Count,
            "Cached pages dropped on lookup because their TTL had passed."
        );
        describe_counter!(
            "postline_page_cache_evict_total",
            Unit::Count,
            "Cached pages evicted to stay within the entry limit."
        );
        describe_counter!(
            "postline_posts_created_total",
            Unit::Count,
            "Posts written through the create form."
        );
        describe_counter!(
            "postline_comments_created_total",
            Unit::Count,
            "Comments accepted on post detail pages."
        );
        describe_counter!(
            "postline_follows_created_total",
            Unit::Count,
            "New follower to author edges."
        );
    });
}
