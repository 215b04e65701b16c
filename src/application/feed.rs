//! Listing and detail page contexts.

use std::sync::Arc;

use thiserror::Error;

use crate::application::follow::{FollowError, FollowService};
use crate::application::pagination::Page;
use crate::application::query::PostQuery;
use crate::application::repos::{GroupsRepo, PostFilter, RepoError, UsersRepo};
use crate::domain::entities::{PostRecord, UserRecord};
use crate::domain::posts;
use crate::presentation::views::{
    CommentView, FollowControl, GroupContext, ListingContext, PaginatorView, PostCard,
    PostDetailContext, ProfileContext, group_href, post_href, profile_href,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("unknown group")]
    UnknownGroup,
    #[error("unknown author")]
    UnknownAuthor,
    #[error("unknown post")]
    UnknownPost,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<FollowError> for FeedError {
    fn from(err: FollowError) -> Self {
        match err {
            FollowError::AuthorNotFound => FeedError::UnknownAuthor,
            FollowError::Repo(err) => FeedError::Repo(err),
        }
    }
}

#[derive(Clone)]
pub struct FeedService {
    query: Arc<PostQuery>,
    groups: Arc<dyn GroupsRepo>,
    users: Arc<dyn UsersRepo>,
    follows: Arc<FollowService>,
}

impl FeedService {
    pub fn new(
        query: Arc<PostQuery>,
        groups: Arc<dyn GroupsRepo>,
        users: Arc<dyn UsersRepo>,
        follows: Arc<FollowService>,
    ) -> Self {
        Self {
            query,
            groups,
            users,
            follows,
        }
    }

    pub async fn index_context(&self, page: Option<&str>) -> Result<ListingContext, FeedError> {
        let posts = self.query.list_posts(&PostFilter::All, page).await?;
        Ok(listing("Latest posts", "/", posts))
    }

    pub async fn group_context(
        &self,
        slug: &str,
        page: Option<&str>,
    ) -> Result<GroupContext, FeedError> {
        let group = self
            .groups
            .find_group_by_slug(slug)
            .await?
            .ok_or(FeedError::UnknownGroup)?;

        let posts = self
            .query
            .list_posts(&PostFilter::GroupSlug(group.slug.clone()), page)
            .await?;

        Ok(GroupContext {
            title: group.title,
            description: group.description,
            posts: cards(&posts.items),
            paginator: PaginatorView::new(&group_href(&group.slug), &posts.window),
        })
    }

    pub async fn profile_context(
        &self,
        viewer: Option<&UserRecord>,
        username: &str,
        page: Option<&str>,
    ) -> Result<ProfileContext, FeedError> {
        let author = self
            .users
            .find_user_by_username(username)
            .await?
            .ok_or(FeedError::UnknownAuthor)?;

        let posts = self
            .query
            .list_posts(&PostFilter::AuthorUsername(author.username.clone()), page)
            .await?;
        let following = self.follows.is_following(viewer, author.id).await?;

        let base = profile_href(&author.username);
        let follow = match viewer {
            Some(user) if user.id != author.id => {
                if following {
                    FollowControl::Unfollow {
                        href: format!("{base}/unfollow"),
                    }
                } else {
                    FollowControl::Follow {
                        href: format!("{base}/follow"),
                    }
                }
            }
            _ => FollowControl::Hidden,
        };

        Ok(ProfileContext {
            posts_qty: posts.window.total,
            following,
            follow,
            posts: cards(&posts.items),
            paginator: PaginatorView::new(&base, &posts.window),
            author: author.username,
        })
    }

    pub async fn follow_context(
        &self,
        viewer: &UserRecord,
        page: Option<&str>,
    ) -> Result<ListingContext, FeedError> {
        let posts = self.follows.list_followed_feed(viewer, page).await?;
        Ok(listing("Authors you follow", "/follow", posts))
    }

    pub async fn post_detail_context(
        &self,
        viewer: Option<&UserRecord>,
        post_id: i64,
    ) -> Result<PostDetailContext, FeedError> {
        let post = self
            .query
            .find_post(post_id)
            .await?
            .ok_or(FeedError::UnknownPost)?;

        let posts_qty = self
            .query
            .count_posts_by_author(&post.author_username)
            .await?;
        let comments = self.query.list_comments_for_post(post.id).await?;

        let href = post_href(post.id);
        Ok(PostDetailContext {
            preview: posts::preview(&post.text),
            edit_href: viewer
                .filter(|user| post.is_authored_by(user))
                .map(|_| format!("{href}/edit")),
            comment_action: viewer.map(|_| format!("{href}/comment")),
            posts_qty,
            comments: comments.iter().map(CommentView::from_record).collect(),
            post: PostCard::from_record(&post),
        })
    }
}

fn cards(posts: &[PostRecord]) -> Vec<PostCard> {
    posts.iter().map(PostCard::from_record).collect()
}

fn listing(heading: &str, base_path: &str, posts: Page<PostRecord>) -> ListingContext {
    ListingContext {
        heading: heading.to_string(),
        posts: cards(&posts.items),
        paginator: PaginatorView::new(base_path, &posts.window),
    }
}
