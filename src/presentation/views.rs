use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use url::form_urlencoded;

use crate::application::error::{ErrorReport, HttpError};
use crate::application::pagination::PageWindow;
use crate::domain::entities::{CommentRecord, GroupRecord, PostRecord};
use crate::domain::posts::{self, FieldErrors, GROUP_FIELD, IMAGE_FIELD, TEXT_FIELD};

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(chrome: LayoutChrome) -> Response {
    let view = LayoutContext::new(chrome, ErrorPageView::not_found());
    let mut response = render_template_response(ErrorTemplate { view }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Render the generic error page while keeping the original diagnostic.
pub fn render_error_response(chrome: LayoutChrome, error: HttpError) -> Response {
    let status = error.status();
    let view = LayoutContext::new(chrome, ErrorPageView::for_status(status));
    let mut response = render_template_response(ErrorTemplate { view }, status);
    error.report().clone().attach(&mut response);
    response
}

#[derive(Clone)]
pub struct BrandView {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct NavigationLinkView {
    pub label: String,
    pub href: String,
}

#[derive(Clone)]
pub struct NavigationView {
    pub entries: Vec<NavigationLinkView>,
}

#[derive(Clone)]
pub struct PageMetaView {
    pub title: String,
}

/// Signed-in user as shown in the header.
#[derive(Clone)]
pub struct ViewerView {
    pub username: String,
    pub profile_href: String,
}

#[derive(Clone)]
pub struct LayoutChrome {
    pub brand: BrandView,
    pub navigation: NavigationView,
    pub meta: PageMetaView,
    pub viewer: Option<ViewerView>,
}

impl LayoutChrome {
    pub fn with_title(self, title: impl Into<String>) -> Self {
        let page_title = title.into();
        let title = if page_title.is_empty() {
            self.brand.title.clone()
        } else {
            format!("{page_title} | {}", self.brand.title)
        };
        Self {
            meta: PageMetaView { title },
            ..self
        }
    }
}

#[derive(Clone)]
pub struct LayoutContext<T> {
    pub brand: BrandView,
    pub navigation: NavigationView,
    pub meta: PageMetaView,
    pub viewer: Option<ViewerView>,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(chrome: LayoutChrome, content: T) -> Self {
        Self {
            brand: chrome.brand,
            navigation: chrome.navigation,
            meta: chrome.meta,
            viewer: chrome.viewer,
            content,
        }
    }
}

#[derive(Clone)]
pub struct GroupBadge {
    pub title: String,
    pub href: String,
}

#[derive(Clone)]
pub struct PostCard {
    pub id: i64,
    pub text: String,
    pub author: String,
    pub author_href: String,
    pub detail_href: String,
    pub group: Option<GroupBadge>,
    pub image_url: Option<String>,
    pub published: String,
    pub iso_date: String,
}

impl PostCard {
    pub fn from_record(post: &PostRecord) -> Self {
        Self {
            id: post.id,
            text: post.text.clone(),
            author: post.author_username.clone(),
            author_href: profile_href(&post.author_username),
            detail_href: post_href(post.id),
            group: post.group.as_ref().map(|group| GroupBadge {
                title: group.title.clone(),
                href: group_href(&group.slug),
            }),
            image_url: post.image.as_deref().map(media_url),
            published: posts::format_human_date(post.created_at),
            iso_date: post.created_at.date().to_string(),
        }
    }
}

/// Previous/next links for a listing served at `base_path`.
#[derive(Clone)]
pub struct PaginatorView {
    pub number: u64,
    pub num_pages: u64,
    pub previous_href: Option<String>,
    pub next_href: Option<String>,
    pub first_href: Option<String>,
    pub last_href: Option<String>,
}

impl PaginatorView {
    pub fn new(base_path: &str, window: &PageWindow) -> Self {
        let link = |number: u64| format!("{base_path}?page={number}");
        Self {
            number: window.number,
            num_pages: window.num_pages,
            previous_href: window.previous_number().map(link),
            next_href: window.next_number().map(link),
            first_href: window.has_previous().then(|| link(1)),
            last_href: window.has_next().then(|| link(window.num_pages)),
        }
    }

    pub fn is_paginated(&self) -> bool {
        self.num_pages > 1
    }
}

pub struct ListingContext {
    pub heading: String,
    pub posts: Vec<PostCard>,
    pub paginator: PaginatorView,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<ListingContext>,
}

#[derive(Template)]
#[template(path = "follow.html")]
pub struct FollowTemplate {
    pub view: LayoutContext<ListingContext>,
}

pub struct GroupContext {
    pub title: String,
    pub description: String,
    pub posts: Vec<PostCard>,
    pub paginator: PaginatorView,
}

#[derive(Template)]
#[template(path = "group.html")]
pub struct GroupTemplate {
    pub view: LayoutContext<GroupContext>,
}

/// Follow button state on a profile. `Hidden` covers anonymous viewers and
/// the author's own profile.
#[derive(Clone, PartialEq, Eq)]
pub enum FollowControl {
    Hidden,
    Follow { href: String },
    Unfollow { href: String },
}

impl FollowControl {
    pub fn href(&self) -> &str {
        match self {
            FollowControl::Hidden => "",
            FollowControl::Follow { href } | FollowControl::Unfollow { href } => href,
        }
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, FollowControl::Hidden)
    }

    pub fn is_following(&self) -> bool {
        matches!(self, FollowControl::Unfollow { .. })
    }
}

pub struct ProfileContext {
    pub author: String,
    pub posts_qty: u64,
    pub following: bool,
    pub follow: FollowControl,
    pub posts: Vec<PostCard>,
    pub paginator: PaginatorView,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileContext>,
}

pub struct CommentView {
    pub author: String,
    pub author_href: String,
    pub text: String,
    pub published: String,
}

impl CommentView {
    pub fn from_record(comment: &CommentRecord) -> Self {
        Self {
            author: comment.author_username.clone(),
            author_href: profile_href(&comment.author_username),
            text: comment.text.clone(),
            published: posts::format_human_date(comment.created_at),
        }
    }
}

pub struct PostDetailContext {
    pub post: PostCard,
    pub preview: String,
    pub posts_qty: u64,
    pub comments: Vec<CommentView>,
    pub edit_href: Option<String>,
    /// Present only for signed-in viewers.
    pub comment_action: Option<String>,
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub view: LayoutContext<PostDetailContext>,
}

pub struct GroupOption {
    pub id: i64,
    pub title: String,
    pub selected: bool,
}

pub struct PostFormErrors {
    pub text: Vec<String>,
    pub group: Vec<String>,
    pub image: Vec<String>,
}

impl PostFormErrors {
    pub fn from_field_errors(errors: &FieldErrors) -> Self {
        Self {
            text: errors.for_field(TEXT_FIELD),
            group: errors.for_field(GROUP_FIELD),
            image: errors.for_field(IMAGE_FIELD),
        }
    }

    pub fn none() -> Self {
        Self::from_field_errors(&FieldErrors::new())
    }
}

pub struct PostFormContext {
    pub is_edit: bool,
    pub action: String,
    pub text: String,
    pub groups: Vec<GroupOption>,
    pub no_group_selected: bool,
    pub current_image: Option<String>,
    pub errors: PostFormErrors,
}

impl PostFormContext {
    pub fn create(groups: &[GroupRecord]) -> Self {
        Self::build(false, "/create".to_string(), "", None, groups, None)
    }

    pub fn edit(post: &PostRecord, groups: &[GroupRecord]) -> Self {
        Self::build(
            true,
            format!("{}/edit", post_href(post.id)),
            &post.text,
            post.group.as_ref().map(|group| group.id.to_string()).as_deref(),
            groups,
            post.image.as_deref(),
        )
    }

    /// Re-display a rejected submission with its errors.
    pub fn resubmitted(
        mut self,
        text: &str,
        group: Option<&str>,
        groups: &[GroupRecord],
        errors: &FieldErrors,
    ) -> Self {
        let selected = group.map(str::trim).filter(|value| !value.is_empty());
        self.text = text.to_string();
        self.groups = group_options(groups, selected);
        self.no_group_selected = selected.is_none();
        self.errors = PostFormErrors::from_field_errors(errors);
        self
    }

    fn build(
        is_edit: bool,
        action: String,
        text: &str,
        group: Option<&str>,
        groups: &[GroupRecord],
        current_image: Option<&str>,
    ) -> Self {
        Self {
            is_edit,
            action,
            text: text.to_string(),
            groups: group_options(groups, group),
            no_group_selected: group.is_none(),
            current_image: current_image.map(media_url),
            errors: PostFormErrors::none(),
        }
    }
}

fn group_options(groups: &[GroupRecord], selected: Option<&str>) -> Vec<GroupOption> {
    groups
        .iter()
        .map(|group| GroupOption {
            id: group.id,
            title: group.title.clone(),
            selected: selected.is_some_and(|value| value == group.id.to_string()),
        })
        .collect()
}

#[derive(Template)]
#[template(path = "post_form.html")]
pub struct PostFormTemplate {
    pub view: LayoutContext<PostFormContext>,
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
    pub primary_action: Option<ErrorAction>,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "The page you requested does not exist.".to_string(),
            primary_action: Some(ErrorAction::home()),
        }
    }

    pub fn for_status(status: StatusCode) -> Self {
        if status == StatusCode::NOT_FOUND {
            return Self::not_found();
        }
        Self {
            title: status
                .canonical_reason()
                .unwrap_or("Something went wrong")
                .to_string(),
            message: "The request could not be completed. Please try again later.".to_string(),
            primary_action: Some(ErrorAction::home()),
        }
    }
}

pub struct ErrorAction {
    pub href: String,
    pub label: String,
}

impl ErrorAction {
    pub fn home() -> Self {
        Self {
            href: "/".to_string(),
            label: "Back to home".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}

pub fn profile_href(username: &str) -> String {
    format!("/profile/{}", path_segment(username))
}

pub fn group_href(slug: &str) -> String {
    format!("/group/{}", path_segment(slug))
}

/// Percent-encode one path segment. `form_urlencoded` writes spaces as `+`,
/// which a path would keep literally, so they become `%20`.
fn path_segment(raw: &str) -> String {
    form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub fn post_href(id: i64) -> String {
    format!("/posts/{id}")
}

pub fn media_url(stored_path: &str) -> String {
    format!("/media/{stored_path}")
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::domain::entities::GroupRef;
    use crate::domain::posts::INVALID_CHOICE_MESSAGE;

    fn window(number: u64, num_pages: u64) -> PageWindow {
        PageWindow {
            number,
            num_pages,
            total: num_pages * 10,
            limit: 10,
            offset: (number - 1) * 10,
        }
    }

    fn group(id: i64, title: &str) -> GroupRecord {
        GroupRecord {
            id,
            title: title.to_string(),
            slug: title.to_lowercase(),
            description: String::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn paginator_links_keep_the_base_path() {
        let view = PaginatorView::new("/group/cats", &window(2, 3));
        assert_eq!(view.previous_href.as_deref(), Some("/group/cats?page=1"));
        assert_eq!(view.next_href.as_deref(), Some("/group/cats?page=3"));
        assert!(view.is_paginated());

        let single = PaginatorView::new("/", &window(1, 1));
        assert!(single.previous_href.is_none() && single.next_href.is_none());
        assert!(!single.is_paginated());
    }

    #[test]
    fn post_card_resolves_links() {
        let post = PostRecord {
            id: 7,
            author_id: 1,
            author_username: "leo".to_string(),
            text: "hello".to_string(),
            group: Some(GroupRef {
                id: 3,
                slug: "cats".to_string(),
                title: "Cats".to_string(),
            }),
            image: Some("posts/a.gif".to_string()),
            created_at: OffsetDateTime::UNIX_EPOCH,
        };

        let card = PostCard::from_record(&post);
        assert_eq!(card.author_href, "/profile/leo");
        assert_eq!(card.detail_href, "/posts/7");
        assert_eq!(card.group.map(|g| g.href), Some("/group/cats".to_string()));
        assert_eq!(card.image_url.as_deref(), Some("/media/posts/a.gif"));
    }

    #[test]
    fn profile_links_encode_the_username() {
        assert_eq!(profile_href("leo"), "/profile/leo");
        assert_eq!(profile_href("a/b"), "/profile/a%2Fb");
        assert_eq!(profile_href("x y?#"), "/profile/x%20y%3F%23");
        assert_eq!(profile_href("a+b@c"), "/profile/a%2Bb%40c");
    }

    #[test]
    fn resubmitted_form_keeps_input_and_errors() {
        let groups = vec![group(1, "Cats"), group(2, "Dogs")];
        let mut errors = FieldErrors::new();
        errors.push(GROUP_FIELD, INVALID_CHOICE_MESSAGE);

        let form = PostFormContext::create(&groups).resubmitted("draft", Some("2"), &groups, &errors);

        assert_eq!(form.text, "draft");
        assert!(form.groups[1].selected);
        assert!(!form.no_group_selected);
        assert_eq!(form.errors.group, vec![INVALID_CHOICE_MESSAGE]);
        assert!(form.errors.text.is_empty());
    }

    #[test]
    fn error_page_titles_follow_status() {
        assert_eq!(
            ErrorPageView::for_status(StatusCode::INTERNAL_SERVER_ERROR).title,
            "Internal Server Error"
        );
        assert_eq!(
            ErrorPageView::for_status(StatusCode::NOT_FOUND).title,
            "Page Not Found"
        );
    }
}
