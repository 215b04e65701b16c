//! Post and comment input rules.
//!
//! Every form the application accepts is checked by an explicit function in
//! this module. Each function lists the fields it reads, which of them are
//! required, and the message attached to a failing field. Rules that need
//! storage (for example "the chosen group exists") live in the application
//! layer and append to the same [`FieldErrors`].

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

pub const HUMAN_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[month repr:long] [day padding:none], [year]");

/// Number of characters a post shows when rendered as a short label.
pub const POST_PREVIEW_CHARS: usize = 15;

pub const TEXT_FIELD: &str = "text";
pub const GROUP_FIELD: &str = "group";
pub const IMAGE_FIELD: &str = "image";

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const NULL_CHARACTER_MESSAGE: &str = "Null characters are not allowed.";
pub const INVALID_CHOICE_MESSAGE: &str = "Select a valid choice.";
pub const INVALID_IMAGE_MESSAGE: &str = "Upload a valid image.";
pub const EMPTY_FILE_MESSAGE: &str = "The submitted file is empty.";
pub const CONTRADICTORY_IMAGE_MESSAGE: &str =
    "Please either submit a file or check the clear checkbox, not both.";

/// Field-level validation failures in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    entries: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.entries.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Messages attached to one field.
    pub fn for_field(&self, field: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| entry.field == field)
            .map(|entry| entry.message.clone())
            .collect()
    }

    pub fn has(&self, field: &str) -> bool {
        self.entries.iter().any(|entry| entry.field == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.entries.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", entry.field, entry.message)?;
        }
        Ok(())
    }
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub data: Bytes,
}

/// Raw post form. `group` holds the submitted select value, where an empty
/// string means "no group". `clear_image` is the edit form's "remove the
/// current image" checkbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostForm {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<ImageUpload>,
    pub clear_image: bool,
}

/// A post form that passed [`validate_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<ValidImage>,
    pub clear_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidImage {
    pub upload: ImageUpload,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommentForm {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentDraft {
    pub text: String,
}

/// Post fields: `text` required, `group` optional, `image` optional.
pub fn validate_post(form: PostForm) -> Result<PostDraft, FieldErrors> {
    let mut errors = FieldErrors::new();

    let text = match required_text(&form.text) {
        Ok(text) => Some(text),
        Err(message) => {
            errors.push(TEXT_FIELD, message);
            None
        }
    };

    let group_id = match form.group.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<i64>() {
            Ok(id) if id > 0 => Some(id),
            _ => {
                errors.push(GROUP_FIELD, INVALID_CHOICE_MESSAGE);
                None
            }
        },
    };

    let image = match form.image {
        None => None,
        Some(_) if form.clear_image => {
            errors.push(IMAGE_FIELD, CONTRADICTORY_IMAGE_MESSAGE);
            None
        }
        Some(upload) => match validate_image(upload) {
            Ok(image) => Some(image),
            Err(message) => {
                errors.push(IMAGE_FIELD, message);
                None
            }
        },
    };

    match text {
        Some(text) if errors.is_empty() => Ok(PostDraft {
            text,
            group_id,
            image,
            clear_image: form.clear_image,
        }),
        _ => Err(errors),
    }
}

/// Comment fields: `text` required.
pub fn validate_comment(form: CommentForm) -> Result<CommentDraft, FieldErrors> {
    match required_text(&form.text) {
        Ok(text) => Ok(CommentDraft { text }),
        Err(message) => {
            let mut errors = FieldErrors::new();
            errors.push(TEXT_FIELD, message);
            Err(errors)
        }
    }
}

/// Accept the upload only when its header decodes as a known raster format.
pub fn validate_image(upload: ImageUpload) -> Result<ValidImage, &'static str> {
    if upload.data.is_empty() {
        return Err(EMPTY_FILE_MESSAGE);
    }

    match imagesize::blob_size(&upload.data) {
        Ok(size) if size.width > 0 && size.height > 0 => Ok(ValidImage {
            width: size.width,
            height: size.height,
            upload,
        }),
        _ => Err(INVALID_IMAGE_MESSAGE),
    }
}

/// Storage rejects NUL bytes in text columns, so they fail here instead.
fn required_text(raw: &str) -> Result<String, &'static str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(REQUIRED_MESSAGE);
    }
    if trimmed.contains('\0') {
        return Err(NULL_CHARACTER_MESSAGE);
    }
    Ok(trimmed.to_string())
}

/// First [`POST_PREVIEW_CHARS`] characters of a post body.
pub fn preview(text: &str) -> String {
    text.chars().take(POST_PREVIEW_CHARS).collect()
}

pub fn format_human_date(timestamp: OffsetDateTime) -> String {
    timestamp
        .date()
        .format(HUMAN_DATE_FORMAT)
        .unwrap_or_else(|_| timestamp.date().to_string())
}
