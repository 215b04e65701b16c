use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;

use crate::application::pagination::PageWindow;
use crate::application::repos::{
    CreatePostParams, ImageChange, PostFilter, PostsRepo, PostsWriteRepo, RepoError,
    UpdatePostParams,
};
use crate::domain::entities::{GroupRef, PostRecord};

use super::{PostgresRepositories, map_sqlx_error};

const POST_COLUMNS: &str = "p.id, p.author_id, u.username AS author_username, p.text, p.image, \
     p.created_at, g.id AS group_id, g.slug AS group_slug, g.title AS group_title";

/// Author and group are joined in so a listing is a single query.
fn select_posts_from(source: &str) -> String {
    format!(
        "SELECT {POST_COLUMNS} FROM {source} p \
         JOIN users u ON u.id = p.author_id \
         LEFT JOIN groups g ON g.id = p.group_id"
    )
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: i64,
    author_id: i64,
    author_username: String,
    text: String,
    image: Option<String>,
    created_at: OffsetDateTime,
    group_id: Option<i64>,
    group_slug: Option<String>,
    group_title: Option<String>,
}

impl From<PostRow> for PostRecord {
    fn from(row: PostRow) -> Self {
        let group = match (row.group_id, row.group_slug, row.group_title) {
            (Some(id), Some(slug), Some(title)) => Some(GroupRef { id, slug, title }),
            _ => None,
        };

        Self {
            id: row.id,
            author_id: row.author_id,
            author_username: row.author_username,
            text: row.text,
            group,
            image: row.image,
            created_at: row.created_at,
        }
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, RepoError> {
    i64::try_from(value).map_err(|_| RepoError::InvalidInput {
        message: format!("{what} exceeds supported range"),
    })
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_posts(
        &self,
        filter: &PostFilter,
        window: PageWindow,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let mut qb = QueryBuilder::new(select_posts_from("posts"));
        qb.push(" WHERE 1=1 ");
        Self::apply_post_filter(&mut qb, filter);
        qb.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
        qb.push_bind(to_i64(window.limit, "page size")?);
        qb.push(" OFFSET ");
        qb.push_bind(to_i64(window.offset, "page offset")?);

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(PostRecord::from).collect())
    }

    async fn count_posts(&self, filter: &PostFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::new(
            "SELECT COUNT(*) FROM posts p \
             JOIN users u ON u.id = p.author_id \
             LEFT JOIN groups g ON g.id = p.group_id \
             WHERE 1=1 ",
        );
        Self::apply_post_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    async fn find_post_by_id(&self, id: i64) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!("{} WHERE p.id = $1", select_posts_from("posts"));
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        let sql = format!(
            "WITH inserted AS ( \
                 INSERT INTO posts (author_id, text, group_id, image) \
                 VALUES ($1, $2, $3, $4) RETURNING * \
             ) {}",
            select_posts_from("inserted")
        );

        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(params.author_id)
            .bind(params.text)
            .bind(params.group_id)
            .bind(params.image)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(PostRecord::from(row))
    }

    async fn update_post(&self, params: UpdatePostParams) -> Result<PostRecord, RepoError> {
        let mut qb = QueryBuilder::new("WITH updated AS (UPDATE posts SET text = ");
        qb.push_bind(params.text);
        qb.push(", group_id = ");
        qb.push_bind(params.group_id);
        match params.image {
            ImageChange::Keep => {}
            ImageChange::Replace(path) => {
                qb.push(", image = ");
                qb.push_bind(path);
            }
            ImageChange::Clear => {
                qb.push(", image = NULL");
            }
        }
        qb.push(" WHERE id = ");
        qb.push_bind(params.id);
        qb.push(" RETURNING *) ");
        qb.push(select_posts_from("updated"));

        let row = qb
            .build_query_as::<PostRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        row.map(PostRecord::from).ok_or(RepoError::NotFound)
    }

    async fn delete_post(&self, id: i64) -> Result<Option<PostRecord>, RepoError> {
        let sql = format!(
            "WITH deleted AS (DELETE FROM posts WHERE id = $1 RETURNING *) {}",
            select_posts_from("deleted")
        );

        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(PostRecord::from))
    }
}
