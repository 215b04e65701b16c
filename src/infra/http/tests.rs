use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderName, Request, StatusCode, header::LOCATION},
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::application::{
    chrome::ChromeService,
    feed::FeedService,
    follow::FollowService,
    pagination::Paginator,
    posts::PostService,
    query::{PostQuery, test_support::MemoryStore},
    repos::{CommentsRepo, PostsRepo},
};
use crate::cache::{CacheConfig, CacheState};
use crate::infra::uploads::UploadStorage;

use super::{AdminState, AuthConfig, HealthProbe, HttpState, build_admin_router, build_router};

const USER_HEADER: &str = "x-remote-user";

struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn ping(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

struct Harness {
    public: Router,
    admin: Router,
    _media: TempDir,
}

fn harness(store: Arc<MemoryStore>) -> Harness {
    let query = Arc::new(PostQuery::new(
        store.clone(),
        store.clone(),
        Paginator::default(),
    ));
    let follows = Arc::new(FollowService::new(store.clone(), store.clone(), query.clone()));
    let feed = Arc::new(FeedService::new(
        query,
        store.clone(),
        store.clone(),
        follows.clone(),
    ));
    let media = tempfile::tempdir().unwrap();
    let uploads = Arc::new(UploadStorage::new(media.path().to_path_buf()).unwrap());
    let posts = Arc::new(PostService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        uploads.clone(),
    ));
    let cache = CacheState::new(CacheConfig::default());

    let public = build_router(HttpState {
        feed,
        posts: posts.clone(),
        follows,
        chrome: Arc::new(ChromeService::new("Postline", "/auth/login/")),
        users: store.clone(),
        uploads,
        cache: cache.clone(),
        auth: AuthConfig {
            user_header: HeaderName::from_static(USER_HEADER),
            login_url: "/auth/login/".to_string(),
        },
        upload_body_limit: 1024 * 1024,
    });
    let admin = build_admin_router(AdminState {
        posts,
        cache,
        health: Arc::new(AlwaysHealthy),
    });

    Harness {
        public,
        admin,
        _media: media,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(LOCATION)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, location, String::from_utf8(bytes.to_vec()).unwrap())
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(user) = user {
        builder = builder.header(USER_HEADER, user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_comment(uri: &str, user: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header(USER_HEADER, user)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "postline-test-boundary";

fn multipart_post(uri: &str, user: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::post(uri)
        .header(USER_HEADER, user)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn card_count(html: &str) -> usize {
    html.matches("<article class=\"post-card\">").count()
}

#[tokio::test]
async fn thirteen_posts_split_into_ten_and_three() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    for n in 0..13 {
        store.post(&leo, &format!("post {n}"), None).await;
    }
    let app = harness(store);

    let (status, _, first) = send(&app.public, get("/profile/leo", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(card_count(&first), 10);
    assert!(first.contains("Page 1 of 2"));

    let (_, _, second) = send(&app.public, get("/profile/leo?page=2", None)).await;
    assert_eq!(card_count(&second), 3);

    let (_, _, clamped) = send(&app.public, get("/profile/leo?page=99", None)).await;
    assert_eq!(card_count(&clamped), 3);
}

#[tokio::test]
async fn home_page_stays_stale_until_cleared() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    let post = store.post(&leo, "soon to be removed", None).await;
    let app = harness(store.clone());

    let (_, _, before) = send(&app.public, get("/", None)).await;
    assert!(before.contains("soon to be removed"));

    let (status, _, _) = send(
        &app.admin,
        Request::delete(format!("/posts/{}", post.id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(store.post_count().await, 0);

    let (_, _, stale) = send(&app.public, get("/", None)).await;
    assert!(stale.contains("soon to be removed"), "cached page survives delete");

    let (status, _, _) = send(
        &app.admin,
        Request::post("/cache/invalidate").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, fresh) = send(&app.public, get("/", None)).await;
    assert!(!fresh.contains("soon to be removed"));
}

#[tokio::test]
async fn signed_in_home_page_bypasses_the_cache() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    let app = harness(store.clone());

    send(&app.public, get("/", None)).await;
    store.post(&leo, "fresh post", None).await;

    let (_, _, anonymous) = send(&app.public, get("/", None)).await;
    assert!(!anonymous.contains("fresh post"));
    let (_, _, signed_in) = send(&app.public, get("/", Some("leo"))).await;
    assert!(signed_in.contains("fresh post"));
    assert!(signed_in.contains("Signed in as"));
}

#[tokio::test]
async fn group_listing_is_isolated() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    let cats = store.group("Cats", "cats").await;
    let dogs = store.group("Dogs", "dogs").await;
    store.post(&leo, "about cats", Some(cats.id)).await;
    store.post(&leo, "about dogs", Some(dogs.id)).await;
    let app = harness(store);

    let (status, _, html) = send(&app.public, get("/group/dogs", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("about dogs"));
    assert!(!html.contains("about cats"));

    let (status, _, _) = send(&app.public, get("/group/birds", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_profile_and_post_are_not_found() {
    let app = harness(Arc::new(MemoryStore::default()));

    for uri in ["/profile/ghost", "/posts/41", "/posts/not-a-number", "/nowhere"] {
        let (status, _, html) = send(&app.public, get(uri, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(html.contains("Page Not Found"));
    }
}

#[tokio::test]
async fn anonymous_users_are_sent_to_login() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    let post = store.post(&leo, "text", None).await;
    let app = harness(store);

    let (status, location, _) = send(&app.public, get("/create", None)).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/auth/login/?next=%2Fcreate"));

    let (status, location, _) = send(
        &app.public,
        get(&format!("/posts/{}/edit", post.id), Some("nobody-known")),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert!(location.unwrap().starts_with("/auth/login/?next="));

    let (_, location, _) = send(&app.public, get("/follow", None)).await;
    assert_eq!(location.as_deref(), Some("/auth/login/?next=%2Ffollow"));
}

#[tokio::test]
async fn create_post_sets_author_and_redirects_to_profile() {
    let store = Arc::new(MemoryStore::default());
    store.user("leo").await;
    let app = harness(store.clone());

    let (status, location, _) = send(
        &app.public,
        multipart_post("/create", "leo", &[("text", "Hello there"), ("group", "")]),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/profile/leo"));

    let posts = store
        .list_posts(
            &crate::application::repos::PostFilter::All,
            Paginator::default().window(1, None),
        )
        .await
        .unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].author_username, "leo");
    assert_eq!(posts[0].text, "Hello there");
}

#[tokio::test]
async fn invalid_post_form_is_redisplayed_with_errors() {
    let store = Arc::new(MemoryStore::default());
    store.user("leo").await;
    let app = harness(store.clone());

    let (status, _, html) = send(
        &app.public,
        multipart_post("/create", "leo", &[("text", "   "), ("group", "404")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("This field is required."));
    assert_eq!(store.post_count().await, 0);
}

#[tokio::test]
async fn non_author_edit_redirects_and_changes_nothing() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    store.user("ann").await;
    let post = store.post(&leo, "original", None).await;
    let app = harness(store.clone());
    let edit_uri = format!("/posts/{}/edit", post.id);

    let (status, location, _) = send(&app.public, get(&edit_uri, Some("ann"))).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location, Some(format!("/posts/{}", post.id)));

    let (status, location, _) = send(
        &app.public,
        multipart_post(&edit_uri, "ann", &[("text", "hijacked")]),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location, Some(format!("/posts/{}", post.id)));

    let stored = store.find_post_by_id(post.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "original");

    let (status, location, _) = send(
        &app.public,
        multipart_post(&edit_uri, "leo", &[("text", "edited")]),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location, Some(format!("/posts/{}", post.id)));
    let stored = store.find_post_by_id(post.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "edited");
}

#[tokio::test]
async fn non_author_edit_redirects_before_the_body_is_read() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    store.user("ann").await;
    let post = store.post(&leo, "original", None).await;
    let app = harness(store.clone());
    let edit_uri = format!("/posts/{}/edit", post.id);

    let broken_multipart = Request::post(edit_uri.as_str())
        .header(USER_HEADER, "ann")
        .header("content-type", "multipart/form-data; boundary=nope")
        .body(Body::from("not a multipart body"))
        .unwrap();
    let not_multipart = Request::post(edit_uri.as_str())
        .header(USER_HEADER, "ann")
        .header("content-type", "text/plain")
        .body(Body::from("text=hijacked"))
        .unwrap();

    for request in [broken_multipart, not_multipart] {
        let (status, location, _) = send(&app.public, request).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location, Some(format!("/posts/{}", post.id)));
    }
    let stored = store.find_post_by_id(post.id).await.unwrap().unwrap();
    assert_eq!(stored.text, "original");
}

#[tokio::test]
async fn null_characters_rerender_posts_and_drop_comments() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    let post = store.post(&leo, "discuss", None).await;
    let app = harness(store.clone());

    let (status, _, html) = send(
        &app.public,
        multipart_post("/create", "leo", &[("text", "a\0b")]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("Null characters are not allowed."));
    assert_eq!(store.post_count().await, 1);

    let uri = format!("/posts/{}/comment", post.id);
    let (status, location, _) = send(&app.public, post_comment(&uri, "leo", "text=x%00")).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location, Some(format!("/posts/{}", post.id)));
    assert_eq!(store.comment_count().await, 0);
}

#[tokio::test]
async fn usernames_with_path_characters_get_working_profile_links() {
    let store = Arc::new(MemoryStore::default());
    store.user("a/b").await;
    let leo = store.user("leo").await;
    store.post(&leo, "by leo", None).await;
    let app = harness(store.clone());

    let (status, location, _) = send(
        &app.public,
        multipart_post("/create", "a/b", &[("text", "slashed author")]),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    let location = location.expect("redirect target");
    assert_eq!(location, "/profile/a%2Fb");

    let (status, _, html) = send(&app.public, get(&location, Some("leo"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("slashed author"));
    assert!(html.contains("/profile/a%2Fb/follow"));

    let (status, location, _) =
        send(&app.public, get("/profile/a%2Fb/follow", Some("leo"))).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some("/follow"));
    assert_eq!(store.follow_count().await, 1);
}

#[tokio::test]
async fn comments_always_redirect_to_the_post() {
    let store = Arc::new(MemoryStore::default());
    let leo = store.user("leo").await;
    store.user("ann").await;
    let post = store.post(&leo, "discuss", None).await;
    let app = harness(store.clone());
    let uri = format!("/posts/{}/comment", post.id);
    let detail = format!("/posts/{}", post.id);

    let (status, location, _) = send(&app.public, post_comment(&uri, "ann", "text=")).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some(detail.as_str()));
    assert_eq!(store.comment_count().await, 0);

    let (status, location, _) =
        send(&app.public, post_comment(&uri, "ann", "text=Nice+post")).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(location.as_deref(), Some(detail.as_str()));

    let comments = store.list_comments_for_post(post.id).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].author_username, "ann");

    let (_, _, html) = send(&app.public, get(&detail, None)).await;
    assert!(html.contains("Nice post"));
    assert!(!html.contains("Add a comment"), "anonymous viewers get no form");
}

#[tokio::test]
async fn follow_routes_are_idempotent_and_feed_the_follow_page() {
    let store = Arc::new(MemoryStore::default());
    store.user("leo").await;
    let ann = store.user("ann").await;
    let bob = store.user("bob").await;
    store.post(&ann, "from ann", None).await;
    store.post(&bob, "from bob", None).await;
    let app = harness(store.clone());

    for _ in 0..2 {
        let (status, location, _) =
            send(&app.public, get("/profile/ann/follow", Some("leo"))).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(location.as_deref(), Some("/follow"));
    }
    assert_eq!(store.follow_count().await, 1);

    let (_, location, _) = send(&app.public, get("/profile/leo/follow", Some("leo"))).await;
    assert_eq!(location.as_deref(), Some("/follow"));
    assert_eq!(store.follow_count().await, 1, "self-follow is ignored");

    let (_, _, feed) = send(&app.public, get("/follow", Some("leo"))).await;
    assert!(feed.contains("from ann"));
    assert!(!feed.contains("from bob"));

    let (_, _, profile) = send(&app.public, get("/profile/ann", Some("leo"))).await;
    assert!(profile.contains("/profile/ann/unfollow"));

    for _ in 0..2 {
        let (status, _, _) = send(&app.public, get("/profile/ann/unfollow", Some("leo"))).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
    }
    assert_eq!(store.follow_count().await, 0);

    let (status, _, _) = send(&app.public, get("/profile/ghost/follow", Some("leo"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_delete_of_missing_post_is_not_found() {
    let app = harness(Arc::new(MemoryStore::default()));

    let (status, _, _) = send(
        &app.admin,
        Request::delete("/posts/77").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(
        &app.admin,
        Request::get("/_health/db").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
