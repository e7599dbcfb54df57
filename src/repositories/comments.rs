use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Comment;
use crate::db::types::UserRole;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, user_id, comment_text, is_resolved, parent_id, created_at, updated_at";

/// Comment joined with its author and the number of direct replies.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CommentRow {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) user_id: String,
    pub(crate) author_username: String,
    pub(crate) author_role: UserRole,
    pub(crate) comment_text: String,
    pub(crate) is_resolved: bool,
    pub(crate) parent_id: Option<String>,
    pub(crate) reply_count: i64,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

const ROW_SELECT: &str = "\
    SELECT c.id, c.exam_id, c.user_id, u.username AS author_username, u.role AS author_role, \
           c.comment_text, c.is_resolved, c.parent_id, \
           (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id) AS reply_count, \
           c.created_at, c.updated_at \
    FROM comments c \
    JOIN users u ON u.id = c.user_id";

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Comment>, sqlx::Error> {
    sqlx::query_as::<_, Comment>(&format!("SELECT {COLUMNS} FROM comments WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn find_row_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<CommentRow>, sqlx::Error> {
    sqlx::query_as::<_, CommentRow>(&format!("{ROW_SELECT} WHERE c.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_top_level(
    pool: &PgPool,
    exam_id: &str,
    skip: i64,
    limit: i64,
) -> Result<Vec<CommentRow>, sqlx::Error> {
    sqlx::query_as::<_, CommentRow>(&format!(
        "{ROW_SELECT} WHERE c.exam_id = $1 AND c.parent_id IS NULL \
         ORDER BY c.created_at DESC OFFSET $2 LIMIT $3"
    ))
    .bind(exam_id)
    .bind(skip.max(0))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub(crate) async fn count_top_level(pool: &PgPool, exam_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM comments WHERE exam_id = $1 AND parent_id IS NULL",
    )
    .bind(exam_id)
    .fetch_one(pool)
    .await
}

pub(crate) async fn list_replies(
    pool: &PgPool,
    parent_id: &str,
) -> Result<Vec<CommentRow>, sqlx::Error> {
    sqlx::query_as::<_, CommentRow>(&format!(
        "{ROW_SELECT} WHERE c.parent_id = $1 ORDER BY c.created_at ASC"
    ))
    .bind(parent_id)
    .fetch_all(pool)
    .await
}

pub(crate) struct CreateComment<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) user_id: &'a str,
    pub(crate) comment_text: &'a str,
    pub(crate) parent_id: Option<&'a str>,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateComment<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO comments (
            id, exam_id, user_id, comment_text, is_resolved, parent_id, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,FALSE,$5,$6,$6)",
    )
    .bind(params.id)
    .bind(params.exam_id)
    .bind(params.user_id)
    .bind(params.comment_text)
    .bind(params.parent_id)
    .bind(params.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn set_resolved(
    pool: &PgPool,
    id: &str,
    resolved: bool,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE comments SET is_resolved = $1, updated_at = $2 WHERE id = $3")
        .bind(resolved)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub(crate) async fn delete_by_id(pool: &PgPool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM comments WHERE id = $1").bind(id).execute(pool).await?;
    Ok(())
}
