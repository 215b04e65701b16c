//! Author follow edges.
//!
//! At most one edge exists per (follower, author) pair. The storage layer
//! enforces that with a unique constraint; this service only adds the rule
//! that nobody follows themselves. Both the self-follow and the repeated
//! follow resolve silently.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::pagination::Page;
use crate::application::query::PostQuery;
use crate::application::repos::{FollowsRepo, PostFilter, RepoError, UsersRepo};
use crate::domain::entities::{PostRecord, UserRecord};

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("author not found")]
    AuthorNotFound,
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowOutcome {
    Created,
    AlreadyFollowing,
    SelfFollowRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnfollowOutcome {
    Removed,
    NotFollowing,
}

#[derive(Clone)]
pub struct FollowService {
    users: Arc<dyn UsersRepo>,
    follows: Arc<dyn FollowsRepo>,
    query: Arc<PostQuery>,
}

impl FollowService {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        follows: Arc<dyn FollowsRepo>,
        query: Arc<PostQuery>,
    ) -> Self {
        Self {
            users,
            follows,
            query,
        }
    }

    pub async fn follow(
        &self,
        current: &UserRecord,
        target_username: &str,
    ) -> Result<FollowOutcome, FollowError> {
        let author = self.resolve_author(target_username).await?;

        if author.id == current.id {
            debug!(user = %current.username, "ignoring self-follow");
            return Ok(FollowOutcome::SelfFollowRejected);
        }

        if self.follows.create_follow(current.id, author.id).await? {
            counter!("postline_follows_created_total").increment(1);
            info!(
                target = "postline::follow",
                user = %current.username,
                author = %author.username,
                "follow created"
            );
            Ok(FollowOutcome::Created)
        } else {
            Ok(FollowOutcome::AlreadyFollowing)
        }
    }

    pub async fn unfollow(
        &self,
        current: &UserRecord,
        target_username: &str,
    ) -> Result<UnfollowOutcome, FollowError> {
        let author = self.resolve_author(target_username).await?;

        if self.follows.delete_follow(current.id, author.id).await? {
            info!(
                target = "postline::follow",
                user = %current.username,
                author = %author.username,
                "follow removed"
            );
            Ok(UnfollowOutcome::Removed)
        } else {
            Ok(UnfollowOutcome::NotFollowing)
        }
    }

    /// Anonymous viewers never follow anyone; storage is not consulted for them.
    pub async fn is_following(
        &self,
        viewer: Option<&UserRecord>,
        author_id: i64,
    ) -> Result<bool, FollowError> {
        match viewer {
            None => Ok(false),
            Some(user) => Ok(self.follows.follow_exists(user.id, author_id).await?),
        }
    }

    pub async fn list_followed_feed(
        &self,
        current: &UserRecord,
        page: Option<&str>,
    ) -> Result<Page<PostRecord>, FollowError> {
        Ok(self
            .query
            .list_posts(&PostFilter::FollowedBy(current.id), page)
            .await?)
    }

    async fn resolve_author(&self, username: &str) -> Result<UserRecord, FollowError> {
        self.users
            .find_user_by_username(username)
            .await?
            .ok_or(FollowError::AuthorNotFound)
    }
}
