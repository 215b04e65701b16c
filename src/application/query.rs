//! Read-side post queries shared by every listing.

use std::sync::Arc;

use crate::application::pagination::{Page, Paginator};
use crate::application::repos::{CommentsRepo, PostFilter, PostsRepo, RepoError};
use crate::domain::entities::{CommentRecord, PostRecord};

#[derive(Clone)]
pub struct PostQuery {
    posts: Arc<dyn PostsRepo>,
    comments: Arc<dyn CommentsRepo>,
    paginator: Paginator,
}

impl PostQuery {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        comments: Arc<dyn CommentsRepo>,
        paginator: Paginator,
    ) -> Self {
        Self {
            posts,
            comments,
            paginator,
        }
    }

    pub fn paginator(&self) -> Paginator {
        self.paginator
    }

    /// One page of `filter`, newest first. The total is counted first so the
    /// requested page can be clamped before the rows are fetched.
    pub async fn list_posts(
        &self,
        filter: &PostFilter,
        page: Option<&str>,
    ) -> Result<Page<PostRecord>, RepoError> {
        let total = self.posts.count_posts(filter).await?;
        let window = self.paginator.window(total, page);

        let items = if total == 0 {
            Vec::new()
        } else {
            self.posts.list_posts(filter, window).await?
        };

        Ok(Page { items, window })
    }

    pub async fn count_posts_by_author(&self, username: &str) -> Result<u64, RepoError> {
        self.posts
            .count_posts(&PostFilter::AuthorUsername(username.to_string()))
            .await
    }

    pub async fn find_post(&self, id: i64) -> Result<Option<PostRecord>, RepoError> {
        self.posts.find_post_by_id(id).await
    }

    pub async fn list_comments_for_post(
        &self,
        post_id: i64,
    ) -> Result<Vec<CommentRecord>, RepoError> {
        self.comments.list_comments_for_post(post_id).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory repositories shared by the service tests.

    use async_trait::async_trait;
    use time::{Duration, OffsetDateTime};
    use tokio::sync::Mutex;

    use crate::application::pagination::PageWindow;
    use crate::application::repos::{
        CommentsRepo, CreateCommentParams, CreateGroupParams, CreatePostParams, CreateUserParams,
        FollowsRepo, GroupsRepo, ImageChange, PostFilter, PostsRepo, PostsWriteRepo, RepoError,
        UpdatePostParams, UsersRepo,
    };
    use crate::domain::entities::{
        CommentRecord, FollowRecord, GroupRecord, GroupRef, PostRecord, UserRecord,
    };

    #[derive(Default)]
    struct State {
        users: Vec<UserRecord>,
        groups: Vec<GroupRecord>,
        posts: Vec<PostRecord>,
        comments: Vec<CommentRecord>,
        follows: Vec<FollowRecord>,
        next_id: i64,
        clock: i64,
    }

    impl State {
        fn next_id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }

        /// Strictly increasing timestamps so ordering is deterministic.
        fn tick(&mut self) -> OffsetDateTime {
            self.clock += 1;
            OffsetDateTime::UNIX_EPOCH + Duration::minutes(self.clock)
        }

        fn matches(&self, post: &PostRecord, filter: &PostFilter) -> bool {
            match filter {
                PostFilter::All => true,
                PostFilter::GroupSlug(slug) => post
                    .group
                    .as_ref()
                    .is_some_and(|group| &group.slug == slug),
                PostFilter::AuthorUsername(name) => &post.author_username == name,
                PostFilter::FollowedBy(user_id) => self
                    .follows
                    .iter()
                    .any(|f| f.user_id == *user_id && f.author_id == post.author_id),
            }
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        state: Mutex<State>,
    }

    impl MemoryStore {
        pub async fn user(&self, username: &str) -> UserRecord {
            self.create_user(CreateUserParams {
                username: username.to_string(),
            })
            .await
            .expect("create user")
        }

        pub async fn group(&self, title: &str, slug: &str) -> GroupRecord {
            self.create_group(CreateGroupParams {
                title: title.to_string(),
                slug: slug.to_string(),
                description: String::new(),
            })
            .await
            .expect("create group")
        }

        pub async fn post(&self, author: &UserRecord, text: &str, group_id: Option<i64>) -> PostRecord {
            self.create_post(CreatePostParams {
                author_id: author.id,
                text: text.to_string(),
                group_id,
                image: None,
            })
            .await
            .expect("create post")
        }

        pub async fn follow_count(&self) -> usize {
            self.state.lock().await.follows.len()
        }

        pub async fn post_count(&self) -> usize {
            self.state.lock().await.posts.len()
        }

        pub async fn comment_count(&self) -> usize {
            self.state.lock().await.comments.len()
        }
    }

    #[async_trait]
    impl UsersRepo for MemoryStore {
        async fn find_user_by_username(
            &self,
            username: &str,
        ) -> Result<Option<UserRecord>, RepoError> {
            let state = self.state.lock().await;
            Ok(state.users.iter().find(|u| u.username == username).cloned())
        }

        async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
            let mut state = self.state.lock().await;
            if state.users.iter().any(|u| u.username == params.username) {
                return Err(RepoError::Duplicate {
                    constraint: "users_username_key".to_string(),
                });
            }
            let user = UserRecord {
                id: state.next_id(),
                username: params.username,
                created_at: state.tick(),
            };
            state.users.push(user.clone());
            Ok(user)
        }
    }

    #[async_trait]
    impl GroupsRepo for MemoryStore {
        async fn list_groups(&self) -> Result<Vec<GroupRecord>, RepoError> {
            let mut groups = self.state.lock().await.groups.clone();
            groups.sort_by(|a, b| a.title.cmp(&b.title));
            Ok(groups)
        }

        async fn find_group_by_slug(&self, slug: &str) -> Result<Option<GroupRecord>, RepoError> {
            let state = self.state.lock().await;
            Ok(state.groups.iter().find(|g| g.slug == slug).cloned())
        }

        async fn find_group_by_id(&self, id: i64) -> Result<Option<GroupRecord>, RepoError> {
            let state = self.state.lock().await;
            Ok(state.groups.iter().find(|g| g.id == id).cloned())
        }

        async fn create_group(&self, params: CreateGroupParams) -> Result<GroupRecord, RepoError> {
            let mut state = self.state.lock().await;
            if state.groups.iter().any(|g| g.slug == params.slug) {
                return Err(RepoError::Duplicate {
                    constraint: "groups_slug_key".to_string(),
                });
            }
            let group = GroupRecord {
                id: state.next_id(),
                title: params.title,
                slug: params.slug,
                description: params.description,
                created_at: state.tick(),
            };
            state.groups.push(group.clone());
            Ok(group)
        }
    }

    #[async_trait]
    impl PostsRepo for MemoryStore {
        async fn list_posts(
            &self,
            filter: &PostFilter,
            window: PageWindow,
        ) -> Result<Vec<PostRecord>, RepoError> {
            let state = self.state.lock().await;
            let mut posts: Vec<_> = state
                .posts
                .iter()
                .filter(|p| state.matches(p, filter))
                .cloned()
                .collect();
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(posts
                .into_iter()
                .skip(window.offset as usize)
                .take(window.limit as usize)
                .collect())
        }

        async fn count_posts(&self, filter: &PostFilter) -> Result<u64, RepoError> {
            let state = self.state.lock().await;
            Ok(state.posts.iter().filter(|p| state.matches(p, filter)).count() as u64)
        }

        async fn find_post_by_id(&self, id: i64) -> Result<Option<PostRecord>, RepoError> {
            let state = self.state.lock().await;
            Ok(state.posts.iter().find(|p| p.id == id).cloned())
        }
    }

    #[async_trait]
    impl PostsWriteRepo for MemoryStore {
        async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
            let mut state = self.state.lock().await;
            let author = state
                .users
                .iter()
                .find(|u| u.id == params.author_id)
                .cloned()
                .ok_or_else(|| RepoError::Integrity {
                    message: "unknown author".to_string(),
                })?;
            let group = group_ref(&state.groups, params.group_id)?;
            let post = PostRecord {
                id: state.next_id(),
                author_id: author.id,
                author_username: author.username,
                text: params.text,
                group,
                image: params.image,
                created_at: state.tick(),
            };
            state.posts.push(post.clone());
            Ok(post)
        }

        async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
            let mut state = self.state.lock().await;
            let group = group_ref(&state.groups, params.group_id)?;
            let post = state
                .posts
                .iter_mut()
                .find(|p| p.id == params.id)
                .ok_or(RepoError::NotFound)?;
            post.text = params.text;
            post.group = group;
            match params.image {
                ImageChange::Keep => {}
                ImageChange::Replace(path) => post.image = Some(path),
                ImageChange::Clear => post.image = None,
            }
            Ok(post.clone())
        }

        async fn delete_post(&self, id: i64) -> Result<Option<PostRecord>, RepoError> {
            let mut state = self.state.lock().await;
            let Some(index) = state.posts.iter().position(|p| p.id == id) else {
                return Ok(None);
            };
            state.comments.retain(|c| c.post_id != id);
            Ok(Some(state.posts.remove(index)))
        }
    }

    #[async_trait]
    impl CommentsRepo for MemoryStore {
        async fn list_comments_for_post(
            &self,
            post_id: i64,
        ) -> Result<Vec<CommentRecord>, RepoError> {
            let state = self.state.lock().await;
            Ok(state
                .comments
                .iter()
                .filter(|c| c.post_id == post_id)
                .cloned()
                .collect())
        }

        async fn create_comment(
            &self,
            params: CreateCommentParams,
        ) -> Result<CommentRecord, RepoError> {
            let mut state = self.state.lock().await;
            let author_username = state
                .users
                .iter()
                .find(|u| u.id == params.author_id)
                .map(|u| u.username.clone())
                .ok_or_else(|| RepoError::Integrity {
                    message: "unknown author".to_string(),
                })?;
            let comment = CommentRecord {
                id: state.next_id(),
                post_id: params.post_id,
                author_id: params.author_id,
                author_username,
                text: params.text,
                created_at: state.tick(),
            };
            state.comments.push(comment.clone());
            Ok(comment)
        }
    }

    #[async_trait]
    impl FollowsRepo for MemoryStore {
        async fn create_follow(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
            let mut state = self.state.lock().await;
            if state
                .follows
                .iter()
                .any(|f| f.user_id == user_id && f.author_id == author_id)
            {
                return Ok(false);
            }
            let follow = FollowRecord {
                id: state.next_id(),
                user_id,
                author_id,
                created_at: state.tick(),
            };
            state.follows.push(follow);
            Ok(true)
        }

        async fn delete_follow(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
            let mut state = self.state.lock().await;
            let before = state.follows.len();
            state
                .follows
                .retain(|f| !(f.user_id == user_id && f.author_id == author_id));
            Ok(state.follows.len() != before)
        }

        async fn follow_exists(&self, user_id: i64, author_id: i64) -> Result<bool, RepoError> {
            let state = self.state.lock().await;
            Ok(state
                .follows
                .iter()
                .any(|f| f.user_id == user_id && f.author_id == author_id))
        }
    }

    fn group_ref(groups: &[GroupRecord], id: Option<i64>) -> Result<Option<GroupRef>, RepoError> {
        match id {
            None => Ok(None),
            Some(id) => groups
                .iter()
                .find(|g| g.id == id)
                .map(|g| {
                    Some(GroupRef {
                        id: g.id,
                        slug: g.slug.clone(),
                        title: g.title.clone(),
                    })
                })
                .ok_or_else(|| RepoError::Integrity {
                    message: format!("unknown group {id}"),
                }),
        }
    }
}
