use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::{
    application::{error::HttpError, follow::FollowError},
    presentation::views::{
        FollowTemplate, LayoutChrome, LayoutContext, render_error_response,
        render_not_found_response, render_template_response,
    },
};

use super::{
    HttpState, RequireUser,
    public::{PageQuery, feed_error_to_response},
};

const FEED_PATH: &str = "/follow";

pub(super) async fn follow_index(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(Some(&user));

    match state.feed.follow_context(&user, query.page()).await {
        Ok(content) => {
            let view = LayoutContext::new(chrome.with_title("Following"), content);
            render_template_response(FollowTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

/// Self-follow and repeat follows are silent; every success lands on the feed.
pub(super) async fn profile_follow(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    Path(username): Path<String>,
) -> Response {
    match state.follows.follow(&user, &username).await {
        Ok(outcome) => {
            debug!(target = "postline::follow", author = %username, ?outcome, "follow handled");
            Redirect::to(FEED_PATH).into_response()
        }
        Err(err) => follow_error_response(err, state.chrome.load(Some(&user))),
    }
}

pub(super) async fn profile_unfollow(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    Path(username): Path<String>,
) -> Response {
    match state.follows.unfollow(&user, &username).await {
        Ok(outcome) => {
            debug!(target = "postline::follow", author = %username, ?outcome, "unfollow handled");
            Redirect::to(FEED_PATH).into_response()
        }
        Err(err) => follow_error_response(err, state.chrome.load(Some(&user))),
    }
}

fn follow_error_response(err: FollowError, chrome: LayoutChrome) -> Response {
    match err {
        FollowError::AuthorNotFound => render_not_found_response(chrome),
        err => render_error_response(chrome, HttpError::from(err)),
    }
}
