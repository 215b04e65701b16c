//! Viewer resolution.
//!
//! Sign-in lives in front of this service. The fronting proxy passes the
//! authenticated username in a trusted header (`auth.user_header`), which is
//! resolved against the users table once per request.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderName, Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;
use tracing::warn;
use url::form_urlencoded;

use crate::cache::SkipPageCache;
use crate::domain::entities::UserRecord;

use super::{HttpState, repo_error_to_http};

const SOURCE: &str = "infra::http::auth";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub user_header: HeaderName,
    pub login_url: String,
}

impl From<&crate::config::AuthSettings> for AuthConfig {
    fn from(settings: &crate::config::AuthSettings) -> Self {
        Self {
            user_header: settings.user_header.clone(),
            login_url: settings.login_url.clone(),
        }
    }
}

impl AuthConfig {
    /// Login URL carrying `next` so the user lands back on `path`.
    pub fn login_redirect(&self, path: &str) -> String {
        let separator = if self.login_url.contains('?') { '&' } else { '?' };
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("next", path)
            .finish();
        format!("{}{separator}{query}", self.login_url)
    }
}

/// Request extension inserted by [`resolve_viewer`].
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: Option<UserRecord>,
    pub login_url: String,
}

pub async fn resolve_viewer(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let username = request
        .headers()
        .get(&state.auth.user_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);

    let user = match username {
        None => None,
        Some(username) => match state.users.find_user_by_username(&username).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                warn!(
                    target = "postline::auth",
                    username = %username,
                    "trusted header names an unknown user; treating request as anonymous"
                );
                None
            }
            Err(err) => return repo_error_to_http(SOURCE, err).into_response(),
        },
    };

    if user.is_some() {
        request.extensions_mut().insert(SkipPageCache);
    }

    let path = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    request.extensions_mut().insert(AuthContext {
        user,
        login_url: state.auth.login_redirect(&path),
    });

    next.run(request).await
}

/// The signed-in user, if any.
pub struct Viewer(pub Option<UserRecord>);

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer(
            parts
                .extensions
                .get::<AuthContext>()
                .and_then(|context| context.user.clone()),
        ))
    }
}

/// The signed-in user. Anonymous requests are sent to the login page.
pub struct RequireUser(pub UserRecord);

impl<S: Send + Sync> FromRequestParts<S> for RequireUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<AuthContext>() {
            Some(AuthContext {
                user: Some(user), ..
            }) => Ok(RequireUser(user.clone())),
            Some(context) => Err(Redirect::to(&context.login_url).into_response()),
            None => Err(Redirect::to("/").into_response()),
        }
    }
}
