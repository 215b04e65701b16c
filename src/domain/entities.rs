//! Domain entities mirrored from persistent storage.

use std::fmt;

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::error::DomainError;
use crate::domain::posts::{FieldErrors, preview};

pub const USERNAME_FIELD: &str = "username";
pub const USERNAME_MAX_CHARS: usize = 150;
pub const INVALID_USERNAME_MESSAGE: &str = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub created_at: OffsetDateTime,
}

/// Usernames are 1 to 150 letters, digits or `@ . + - _`.
pub fn validate_username(raw: &str) -> Result<String, DomainError> {
    let username = raw.trim();
    let valid = !username.is_empty()
        && username.chars().count() <= USERNAME_MAX_CHARS
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'));

    if valid {
        Ok(username.to_string())
    } else {
        let mut errors = FieldErrors::new();
        errors.push(USERNAME_FIELD, INVALID_USERNAME_MESSAGE);
        Err(DomainError::validation(errors))
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecord {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub created_at: OffsetDateTime,
}

impl fmt::Display for GroupRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// Group columns joined onto a post row so listings never look groups up one by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRef {
    pub id: i64,
    pub slug: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub text: String,
    pub group: Option<GroupRef>,
    pub image: Option<String>,
    pub created_at: OffsetDateTime,
}

impl PostRecord {
    pub fn is_authored_by(&self, user: &UserRecord) -> bool {
        self.author_id == user.id
    }
}

impl fmt::Display for PostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&preview(&self.text))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRecord {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_username: String,
    pub text: String,
    pub created_at: OffsetDateTime,
}

/// A follower → author edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowRecord {
    pub id: i64,
    pub user_id: i64,
    pub author_id: i64,
    pub created_at: OffsetDateTime,
}
