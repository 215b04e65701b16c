//! Filesystem storage for post images.
//!
//! Stored paths are relative to the upload root and look like
//! `posts/{uuid}-{name}.{ext}`. They are what the `posts.image` column holds
//! and what `/media/{path}` serves.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::application::posts::{ImageStore, ImageStoreError};
use crate::domain::posts::ValidImage;

/// Directory under the upload root that holds post images.
pub const POST_IMAGE_DIR: &str = "posts";

#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file is empty")]
    EmptyPayload,
}


#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    /// Storage rooted at `root`, created when missing.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn store(
        &self,
        original_name: &str,
        data: &Bytes,
    ) -> Result<String, UploadStorageError> {
        if data.is_empty() {
            return Err(UploadStorageError::EmptyPayload);
        }

        let stored_path = build_stored_path(original_name);
        let absolute = self.resolve(&stored_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        if let Err(err) = file.write_all(data).await {
            drop(file);
            let _ = fs::remove_file(&absolute).await;
            return Err(err.into());
        }
        file.flush().await?;

        Ok(stored_path)
    }

    pub async fn read(&self, stored_path: &str) -> Result<Bytes, UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    /// Missing files count as deleted.
    pub async fn delete(&self, stored_path: &str) -> Result<(), UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UploadStorageError::Io(err)),
        }
    }

    /// Absolute path of a stored upload. Absolute inputs and `..` segments
    /// are rejected so a request path can never leave the root.
    pub fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        if stored_path.is_empty()
            || relative.is_absolute()
            || relative.components().any(|component| {
                matches!(
                    component,
                    Component::ParentDir | Component::Prefix(_) | Component::RootDir
                )
            })
        {
            return Err(UploadStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStore for UploadStorage {
    async fn store_image(&self, image: &ValidImage) -> Result<String, ImageStoreError> {
        let stored_path = self
            .store(&image.upload.file_name, &image.upload.data)
            .await
            .map_err(|err| ImageStoreError(err.to_string()))?;

        debug!(
            target = "postline::uploads",
            path = %stored_path,
            size_bytes = image.upload.data.len(),
            width = image.width,
            height = image.height,
            "stored post image"
        );
        Ok(stored_path)
    }

    async fn remove_image(&self, stored_path: &str) -> Result<(), ImageStoreError> {
        self.delete(stored_path)
            .await
            .map_err(|err| ImageStoreError(err.to_string()))
    }
}

fn build_stored_path(original_name: &str) -> String {
    format!(
        "{POST_IMAGE_DIR}/{}-{}",
        Uuid::new_v4(),
        sanitize_filename(original_name)
    )
}

fn sanitize_filename(original: &str) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("image");
    let mut base = slugify(stem);
    if base.is_empty() {
        base = "image".to_string();
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.trim_matches('.').to_ascii_lowercase())
        .filter(|value| !value.is_empty());

    match extension {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
