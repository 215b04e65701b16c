//! Authoring handlers: post create/edit forms and comment submission.

use axum::{
    Form,
    extract::{Path, State, rejection::FormRejection},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::Multipart;
use axum_extra::extract::multipart::{MultipartError, MultipartRejection};
use tracing::debug;

use crate::{
    application::{error::HttpError, posts::PostError},
    domain::{
        entities::UserRecord,
        posts::{CommentForm, FieldErrors, GROUP_FIELD, IMAGE_FIELD, ImageUpload, PostForm, TEXT_FIELD},
    },
    presentation::views::{
        LayoutChrome, LayoutContext, PostFormContext, PostFormTemplate, post_href, profile_href,
        render_error_response, render_not_found_response, render_template_response,
    },
};

use super::{HttpState, RequireUser, public::parse_post_id};

const SOURCE: &str = "infra::http::posts";

/// Checkbox the edit form renders next to the current image.
pub(super) const CLEAR_IMAGE_FIELD: &str = "image-clear";

pub(super) async fn create_form(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
) -> Response {
    let chrome = form_chrome(&state, &user, "New post");
    match state.posts.list_groups().await {
        Ok(groups) => render_form(chrome, PostFormContext::create(&groups)),
        Err(err) => post_error_response(err, chrome),
    }
}

pub(super) async fn create_submit(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    multipart: Multipart,
) -> Response {
    let form = match read_post_form(multipart).await {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };
    let (text, group) = (form.text.clone(), form.group.clone());

    match state.posts.create_post(&user, form).await {
        Ok(_) => Redirect::to(&profile_href(&user.username)).into_response(),
        Err(PostError::Validation(errors)) => {
            let chrome = form_chrome(&state, &user, "New post");
            match state.posts.list_groups().await {
                Ok(groups) => render_form(
                    chrome,
                    PostFormContext::create(&groups).resubmitted(
                        &text,
                        group.as_deref(),
                        &groups,
                        &errors,
                    ),
                ),
                Err(err) => post_error_response(err, chrome),
            }
        }
        Err(err) => post_error_response(err, form_chrome(&state, &user, "New post")),
    }
}

pub(super) async fn edit_form(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    Path(post_id): Path<String>,
) -> Response {
    let chrome = form_chrome(&state, &user, "Edit post");
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(chrome);
    };

    let post = match state.posts.load_for_edit(&user, post_id).await {
        Ok(post) => post,
        Err(err) => return post_error_response(err, chrome),
    };
    match state.posts.list_groups().await {
        Ok(groups) => render_form(chrome, PostFormContext::edit(&post, &groups)),
        Err(err) => post_error_response(err, chrome),
    }
}

pub(super) async fn edit_submit(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    Path(post_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let chrome = form_chrome(&state, &user, "Edit post");
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(chrome);
    };

    // Non-authors are sent back before the body is looked at.
    if let Err(err) = state.posts.load_for_edit(&user, post_id).await {
        return post_error_response(err, chrome);
    }
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => return rejection.into_response(),
    };
    let form = match read_post_form(multipart).await {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };
    let (text, group) = (form.text.clone(), form.group.clone());

    match state.posts.edit_post(&user, post_id, form).await {
        Ok(post) => Redirect::to(&post_href(post.id)).into_response(),
        Err(PostError::Validation(errors)) => {
            rerender_edit(&state, &user, post_id, chrome, &text, group.as_deref(), &errors).await
        }
        Err(err) => post_error_response(err, chrome),
    }
}

async fn rerender_edit(
    state: &HttpState,
    user: &UserRecord,
    post_id: i64,
    chrome: LayoutChrome,
    text: &str,
    group: Option<&str>,
    errors: &FieldErrors,
) -> Response {
    let post = match state.posts.load_for_edit(user, post_id).await {
        Ok(post) => post,
        Err(err) => return post_error_response(err, chrome),
    };
    match state.posts.list_groups().await {
        Ok(groups) => render_form(
            chrome,
            PostFormContext::edit(&post, &groups).resubmitted(text, group, &groups, errors),
        ),
        Err(err) => post_error_response(err, chrome),
    }
}

/// Always redirects to the post, whether or not the comment was kept.
pub(super) async fn add_comment(
    State(state): State<HttpState>,
    RequireUser(user): RequireUser,
    Path(post_id): Path<String>,
    form: Result<Form<CommentForm>, FormRejection>,
) -> Response {
    let chrome = state.chrome.load(Some(&user));
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(chrome);
    };

    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            debug!(target = SOURCE, post_id, error = %rejection, "unreadable comment form");
            CommentForm::default()
        }
    };

    match state.posts.add_comment(&user, post_id, form).await {
        Ok(_) => Redirect::to(&post_href(post_id)).into_response(),
        Err(err) => post_error_response(err, chrome),
    }
}

fn form_chrome(state: &HttpState, user: &UserRecord, title: &str) -> LayoutChrome {
    state.chrome.load(Some(user)).with_title(title)
}

fn render_form(chrome: LayoutChrome, content: PostFormContext) -> Response {
    let view = LayoutContext::new(chrome, content);
    render_template_response(PostFormTemplate { view }, StatusCode::OK)
}

fn post_error_response(err: PostError, chrome: LayoutChrome) -> Response {
    match err {
        PostError::NotFound => render_not_found_response(chrome),
        PostError::Forbidden { post_id } => {
            debug!(target = SOURCE, post_id, "non-author sent back to the post");
            Redirect::to(&post_href(post_id)).into_response()
        }
        err => render_error_response(chrome, HttpError::from(err)),
    }
}

async fn read_post_form(mut multipart: Multipart) -> Result<PostForm, HttpError> {
    let mut form = PostForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            TEXT_FIELD => form.text = field.text().await.map_err(multipart_error)?,
            GROUP_FIELD => form.group = Some(field.text().await.map_err(multipart_error)?),
            IMAGE_FIELD => {
                let file_name = field.file_name().map(str::to_owned).unwrap_or_default();
                let data = field.bytes().await.map_err(multipart_error)?;
                // Browsers send an empty, unnamed part when no file was chosen.
                if !(file_name.is_empty() && data.is_empty()) {
                    form.image = Some(ImageUpload { file_name, data });
                }
            }
            CLEAR_IMAGE_FIELD => {
                let value = field.text().await.map_err(multipart_error)?;
                form.clear_image = matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "on" | "true" | "1" | "yes"
                );
            }
            _ => {}
        }
    }

    Ok(form)
}

fn multipart_error(err: MultipartError) -> HttpError {
    let status = err.status();
    HttpError::from_error(SOURCE, status, "Invalid form submission", &err)
}
