//! Administrative post removal. Cached pages are left alone: the home page
//! keeps showing a deleted post until its entry expires or
//! `/cache/invalidate` is called.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::application::{error::HttpError, posts::PostError};

use super::AdminState;

const SOURCE: &str = "infra::http::admin::moderation";

pub(super) async fn delete_post(
    State(state): State<AdminState>,
    Path(post_id): Path<i64>,
) -> Response {
    match state.posts.delete_post(post_id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(PostError::NotFound) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Post not found",
            format!("no post with id {post_id}"),
        )
        .into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}
