//! Private listener: cache control, post removal and health.

mod cache;
mod health;
mod moderation;
mod state;

pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use super::middleware::{log_responses, set_request_context};

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache/invalidate", post(cache::invalidate_cache))
        .route("/posts/{post_id}", delete(moderation::delete_post))
        .route("/_health/db", get(health::admin_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
