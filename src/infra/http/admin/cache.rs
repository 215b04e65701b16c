use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::AdminState;

pub(super) async fn invalidate_cache(State(state): State<AdminState>) -> Response {
    let dropped = state.cache.pages.clear();
    info!(target = "postline::cache", dropped, "page cache cleared");
    StatusCode::NO_CONTENT.into_response()
}
