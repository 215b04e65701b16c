//! Post authoring: create, edit, comment and administrative delete.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::repos::{
    CommentsRepo, CreateCommentParams, CreatePostParams, GroupsRepo, ImageChange, PostsRepo,
    PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{CommentRecord, GroupRecord, PostRecord, UserRecord};
use crate::domain::posts::{
    self, CommentForm, FieldErrors, GROUP_FIELD, INVALID_CHOICE_MESSAGE, PostDraft, PostForm,
    ValidImage,
};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ImageStoreError(pub String);

/// Where accepted post images are written.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist the image and return its stored relative path.
    async fn store_image(&self, image: &ValidImage) -> Result<String, ImageStoreError>;

    async fn remove_image(&self, stored_path: &str) -> Result<(), ImageStoreError>;
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("post not found")]
    NotFound,
    #[error("user is not the author of post {post_id}")]
    Forbidden { post_id: i64 },
    #[error("post form is invalid: {0}")]
    Validation(FieldErrors),
    #[error("image storage failed")]
    Storage(#[source] ImageStoreError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentOutcome {
    Created(CommentRecord),
    /// Invalid input is discarded; the caller redirects either way.
    Dropped,
}

#[derive(Clone)]
pub struct PostService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    groups: Arc<dyn GroupsRepo>,
    comments: Arc<dyn CommentsRepo>,
    images: Arc<dyn ImageStore>,
}

impl PostService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        groups: Arc<dyn GroupsRepo>,
        comments: Arc<dyn CommentsRepo>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            reader,
            writer,
            groups,
            comments,
            images,
        }
    }

    pub async fn list_groups(&self) -> Result<Vec<GroupRecord>, PostError> {
        Ok(self.groups.list_groups().await?)
    }

    /// The author always comes from the signed-in user, never from the form.
    pub async fn create_post(
        &self,
        author: &UserRecord,
        form: PostForm,
    ) -> Result<PostRecord, PostError> {
        let draft = self.validate(form).await?;

        let image = match draft.image.as_ref() {
            Some(image) => Some(self.store_image(image).await?),
            None => None,
        };

        let created = self
            .writer
            .create_post(CreatePostParams {
                author_id: author.id,
                text: draft.text,
                group_id: draft.group_id,
                image: image.clone(),
            })
            .await;

        let post = match created {
            Ok(post) => post,
            Err(err) => {
                if let Some(path) = image {
                    self.discard_image(&path).await;
                }
                return Err(err.into());
            }
        };

        counter!("postline_posts_created_total").increment(1);
        info!(
            target = "postline::posts",
            post_id = post.id,
            author = %author.username,
            "post created"
        );
        Ok(post)
    }

    /// Load a post for its edit form, refusing anyone but the author.
    pub async fn load_for_edit(
        &self,
        editor: &UserRecord,
        post_id: i64,
    ) -> Result<PostRecord, PostError> {
        let post = self.find(post_id).await?;
        if !post.is_authored_by(editor) {
            return Err(PostError::Forbidden { post_id });
        }
        Ok(post)
    }

    /// The author check runs before the form is validated.
    pub async fn edit_post(
        &self,
        editor: &UserRecord,
        post_id: i64,
        form: PostForm,
    ) -> Result<PostRecord, PostError> {
        let existing = self.load_for_edit(editor, post_id).await?;
        let draft = self.validate(form).await?;

        let change = match (draft.image.as_ref(), draft.clear_image) {
            (Some(image), _) => ImageChange::Replace(self.store_image(image).await?),
            (None, true) => ImageChange::Clear,
            (None, false) => ImageChange::Keep,
        };

        let updated = self
            .writer
            .update_post(UpdatePostParams {
                id: post_id,
                text: draft.text,
                group_id: draft.group_id,
                image: change.clone(),
            })
            .await;

        let post = match updated {
            Ok(post) => post,
            Err(err) => {
                if let ImageChange::Replace(path) = &change {
                    self.discard_image(path).await;
                }
                return Err(err.into());
            }
        };

        if change != ImageChange::Keep {
            if let Some(previous) = existing.image.as_deref() {
                self.discard_image(previous).await;
            }
        }

        info!(target = "postline::posts", post_id, "post updated");
        Ok(post)
    }

    pub async fn add_comment(
        &self,
        author: &UserRecord,
        post_id: i64,
        form: CommentForm,
    ) -> Result<CommentOutcome, PostError> {
        self.find(post_id).await?;

        let draft = match posts::validate_comment(form) {
            Ok(draft) => draft,
            Err(errors) => {
                debug!(post_id, errors = %errors, "dropping invalid comment");
                return Ok(CommentOutcome::Dropped);
            }
        };

        let comment = self
            .comments
            .create_comment(CreateCommentParams {
                post_id,
                author_id: author.id,
                text: draft.text,
            })
            .await?;

        counter!("postline_comments_created_total").increment(1);
        Ok(CommentOutcome::Created(comment))
    }

    /// Administrative removal. The stored image goes with the row; cached
    /// pages are left as they are.
    pub async fn delete_post(&self, post_id: i64) -> Result<PostRecord, PostError> {
        let deleted = self
            .writer
            .delete_post(post_id)
            .await?
            .ok_or(PostError::NotFound)?;

        if let Some(path) = deleted.image.as_deref() {
            self.discard_image(path).await;
        }

        info!(target = "postline::posts", post_id, "post deleted");
        Ok(deleted)
    }

    async fn find(&self, post_id: i64) -> Result<PostRecord, PostError> {
        self.reader
            .find_post_by_id(post_id)
            .await?
            .ok_or(PostError::NotFound)
    }

    /// Field validation plus the one check that needs storage: the chosen
    /// group must exist.
    async fn validate(&self, form: PostForm) -> Result<PostDraft, PostError> {
        let draft = posts::validate_post(form).map_err(PostError::Validation)?;

        if let Some(group_id) = draft.group_id {
            if self.groups.find_group_by_id(group_id).await?.is_none() {
                let mut errors = FieldErrors::new();
                errors.push(GROUP_FIELD, INVALID_CHOICE_MESSAGE);
                return Err(PostError::Validation(errors));
            }
        }

        Ok(draft)
    }

    async fn store_image(&self, image: &ValidImage) -> Result<String, PostError> {
        self.images
            .store_image(image)
            .await
            .map_err(PostError::Storage)
    }

    async fn discard_image(&self, path: &str) {
        if let Err(err) = self.images.remove_image(path).await {
            warn!(path = %path, error = %err, "failed to remove stored image");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::Mutex;

    use super::*;
    use crate::application::query::test_support::MemoryStore;
    use crate::domain::posts::{ImageUpload, TEXT_FIELD};

    const GIF_1X1: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x21, 0xf9,
        0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00,
        0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
    ];

    #[derive(Default)]
    struct RecordingImages {
        stored: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageStore for RecordingImages {
        async fn store_image(&self, image: &ValidImage) -> Result<String, ImageStoreError> {
            let path = format!("posts/{}", image.upload.file_name);
            self.stored.lock().await.push(path.clone());
            Ok(path)
        }

        async fn remove_image(&self, stored_path: &str) -> Result<(), ImageStoreError> {
            self.removed.lock().await.push(stored_path.to_string());
            Ok(())
        }
    }

    fn service(store: &Arc<MemoryStore>, images: &Arc<RecordingImages>) -> PostService {
        PostService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            images.clone(),
        )
    }

    fn text_form(text: &str) -> PostForm {
        PostForm {
            text: text.to_string(),
            ..PostForm::default()
        }
    }

    fn gif(name: &str) -> ImageUpload {
        ImageUpload {
            file_name: name.to_string(),
            data: Bytes::from_static(GIF_1X1),
        }
    }

    #[tokio::test]
    async fn created_post_belongs_to_submitter() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;

        let post = service(&store, &images)
            .create_post(&leo, text_form("hello"))
            .await
            .unwrap();

        assert_eq!(post.author_id, leo.id);
        assert_eq!(post.author_username, "leo");
    }

    #[tokio::test]
    async fn blank_text_is_a_validation_error() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;

        let err = service(&store, &images)
            .create_post(&leo, text_form("   "))
            .await
            .unwrap_err();

        match err {
            PostError::Validation(errors) => assert!(errors.has(TEXT_FIELD)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.post_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_group_is_an_invalid_choice() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;

        let form = PostForm {
            group: Some("999".to_string()),
            ..text_form("hello")
        };
        let err = service(&store, &images)
            .create_post(&leo, form)
            .await
            .unwrap_err();

        match err {
            PostError::Validation(errors) => {
                assert_eq!(errors.for_field(GROUP_FIELD), vec![INVALID_CHOICE_MESSAGE])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_author_edit_is_forbidden_before_validation() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;
        let ann = store.user("ann").await;
        let post = store.post(&leo, "original", None).await;

        let err = service(&store, &images)
            .edit_post(&ann, post.id, text_form(""))
            .await
            .unwrap_err();

        assert!(matches!(err, PostError::Forbidden { post_id } if post_id == post.id));
        let unchanged = store.find_post_by_id(post.id).await.unwrap().unwrap();
        assert_eq!(unchanged.text, "original");
    }

    #[tokio::test]
    async fn replacing_an_image_discards_the_previous_file() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;
        let service = service(&store, &images);

        let form = PostForm {
            image: Some(gif("one.gif")),
            ..text_form("with image")
        };
        let post = service.create_post(&leo, form).await.unwrap();
        assert_eq!(post.image.as_deref(), Some("posts/one.gif"));

        let form = PostForm {
            image: Some(gif("two.gif")),
            ..text_form("new image")
        };
        let edited = service.edit_post(&leo, post.id, form).await.unwrap();

        assert_eq!(edited.image.as_deref(), Some("posts/two.gif"));
        assert_eq!(*images.removed.lock().await, vec!["posts/one.gif"]);
    }

    #[tokio::test]
    async fn clearing_keeps_text_edit_and_drops_image() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;
        let service = service(&store, &images);
        let post = service
            .create_post(
                &leo,
                PostForm {
                    image: Some(gif("one.gif")),
                    ..text_form("with image")
                },
            )
            .await
            .unwrap();

        let edited = service
            .edit_post(
                &leo,
                post.id,
                PostForm {
                    clear_image: true,
                    ..text_form("no image")
                },
            )
            .await
            .unwrap();

        assert_eq!(edited.text, "no image");
        assert!(edited.image.is_none());
    }

    #[tokio::test]
    async fn invalid_comment_is_dropped() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;
        let post = store.post(&leo, "post", None).await;
        let service = service(&store, &images);

        let dropped = service
            .add_comment(&leo, post.id, CommentForm { text: " ".into() })
            .await
            .unwrap();
        let created = service
            .add_comment(&leo, post.id, CommentForm { text: "nice".into() })
            .await
            .unwrap();

        assert_eq!(dropped, CommentOutcome::Dropped);
        assert!(matches!(created, CommentOutcome::Created(c) if c.text == "nice"));
        assert_eq!(store.comment_count().await, 1);
    }

    #[tokio::test]
    async fn comment_on_missing_post_is_not_found() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());
        let leo = store.user("leo").await;

        let err = service(&store, &images)
            .add_comment(&leo, 42, CommentForm { text: "hi".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, PostError::NotFound));
    }

    #[tokio::test]
    async fn delete_reports_missing_posts() {
        let store = Arc::new(MemoryStore::default());
        let images = Arc::new(RecordingImages::default());

        let err = service(&store, &images).delete_post(7).await.unwrap_err();
        assert!(matches!(err, PostError::NotFound));
    }
}
