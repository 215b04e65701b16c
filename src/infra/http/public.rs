use std::{io::ErrorKind, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;

use crate::{
    application::{
        chrome::ChromeService,
        error::HttpError,
        feed::{FeedError, FeedService},
        follow::FollowService,
        posts::PostService,
        repos::UsersRepo,
    },
    cache::{CacheState, page_cache_layer},
    infra::uploads::{UploadStorage, UploadStorageError},
    presentation::views::{
        GroupTemplate, IndexTemplate, LayoutChrome, LayoutContext, PostTemplate,
        ProfileTemplate, render_error_response, render_not_found_response,
        render_template_response,
    },
};

use super::{
    auth::{AuthConfig, Viewer, resolve_viewer},
    follow, posts,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub posts: Arc<PostService>,
    pub follows: Arc<FollowService>,
    pub chrome: Arc<ChromeService>,
    pub users: Arc<dyn UsersRepo>,
    pub uploads: Arc<UploadStorage>,
    pub cache: CacheState,
    pub auth: AuthConfig,
    pub upload_body_limit: usize,
}

pub fn build_router(state: HttpState) -> Router {
    // Only the home listing goes through the page cache.
    let cached_routes = Router::new()
        .route("/", get(index))
        .layer(middleware::from_fn_with_state(
            state.cache.clone(),
            page_cache_layer,
        ));

    let form_routes = Router::new()
        .route("/create", get(posts::create_form).post(posts::create_submit))
        .route(
            "/posts/{post_id}/edit",
            get(posts::edit_form).post(posts::edit_submit),
        )
        .layer(DefaultBodyLimit::max(state.upload_body_limit));

    let routes = Router::new()
        .route("/group/{slug}", get(group_posts))
        .route("/profile/{username}", get(profile))
        .route("/profile/{username}/follow", get(follow::profile_follow))
        .route("/profile/{username}/unfollow", get(follow::profile_unfollow))
        .route("/posts/{post_id}", get(post_detail))
        .route("/posts/{post_id}/comment", post(posts::add_comment))
        .route("/follow", get(follow::follow_index))
        .route("/media/{*path}", get(serve_media))
        .fallback(fallback);

    cached_routes
        .merge(form_routes)
        .merge(routes)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_viewer))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct PageQuery {
    pub(super) page: Option<String>,
}

impl PageQuery {
    pub(super) fn page(&self) -> Option<&str> {
        self.page.as_deref()
    }
}

async fn index(
    State(state): State<HttpState>,
    Viewer(viewer): Viewer,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());

    match state.feed.index_context(query.page()).await {
        Ok(content) => {
            let view = LayoutContext::new(chrome.with_title(""), content);
            render_template_response(IndexTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn group_posts(
    State(state): State<HttpState>,
    Viewer(viewer): Viewer,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());

    match state.feed.group_context(&slug, query.page()).await {
        Ok(content) => {
            let title = content.title.clone();
            let view = LayoutContext::new(chrome.with_title(title), content);
            render_template_response(GroupTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn profile(
    State(state): State<HttpState>,
    Viewer(viewer): Viewer,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());

    match state
        .feed
        .profile_context(viewer.as_ref(), &username, query.page())
        .await
    {
        Ok(content) => {
            let title = format!("Posts by {}", content.author);
            let view = LayoutContext::new(chrome.with_title(title), content);
            render_template_response(ProfileTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    Viewer(viewer): Viewer,
    Path(post_id): Path<String>,
) -> Response {
    let chrome = state.chrome.load(viewer.as_ref());
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(chrome);
    };

    match state.feed.post_detail_context(viewer.as_ref(), post_id).await {
        Ok(content) => {
            let title = format!("Post {}", content.preview);
            let view = LayoutContext::new(chrome.with_title(title), content);
            render_template_response(PostTemplate { view }, StatusCode::OK)
        }
        Err(err) => feed_error_to_response(err, chrome),
    }
}

async fn serve_media(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_media";

    match state.uploads.read(&path).await {
        Ok(bytes) => build_media_response(&path, bytes),
        Err(UploadStorageError::InvalidPath) => media_not_found(SOURCE),
        Err(UploadStorageError::Io(err)) if err.kind() == ErrorKind::NotFound => {
            media_not_found(SOURCE)
        }
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored image"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read image",
                err.to_string(),
            )
            .into_response()
        }
    }
}

fn media_not_found(source: &'static str) -> Response {
    HttpError::new(
        source,
        StatusCode::NOT_FOUND,
        "Image not found",
        "The requested image is not available",
    )
    .into_response()
}

fn build_media_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    // Stored names carry a uuid, so a path never changes content.
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}

async fn fallback(State(state): State<HttpState>, Viewer(viewer): Viewer) -> Response {
    render_not_found_response(state.chrome.load(viewer.as_ref()))
}

/// Path ids that are not positive integers are treated as unknown posts.
pub(super) fn parse_post_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

pub(super) fn feed_error_to_response(err: FeedError, chrome: LayoutChrome) -> Response {
    match err {
        FeedError::UnknownGroup | FeedError::UnknownAuthor | FeedError::UnknownPost => {
            let detail = err.to_string();
            let mut response = render_not_found_response(chrome);
            crate::application::error::ErrorReport::from_message(
                "infra::http::feed_error_to_response",
                StatusCode::NOT_FOUND,
                detail,
            )
            .attach(&mut response);
            response
        }
        err => render_error_response(chrome, HttpError::from(err)),
    }
}
