use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::types::UserRole;
use crate::repositories::comments::CommentRow;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct CommentCreate {
    #[serde(alias = "commentText", alias = "text")]
    #[validate(length(min = 1, max = 5000, message = "comment_text must be 1-5000 characters"))]
    pub(crate) comment_text: String,
    #[serde(default)]
    #[serde(alias = "parentId")]
    pub(crate) parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentResolve {
    #[serde(default = "default_true")]
    #[serde(alias = "isResolved")]
    pub(crate) is_resolved: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommentListQuery {
    #[serde(default)]
    pub(crate) skip: i64,
    #[serde(default)]
    pub(crate) limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommentAuthor {
    pub(crate) id: String,
    pub(crate) username: String,
    pub(crate) role: UserRole,
}

#[derive(Debug, Serialize)]
pub(crate) struct CommentResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) author: CommentAuthor,
    pub(crate) comment_text: String,
    pub(crate) is_resolved: bool,
    pub(crate) parent_id: Option<String>,
    pub(crate) reply_count: i64,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<CommentRow> for CommentResponse {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            exam_id: row.exam_id,
            author: CommentAuthor {
                id: row.user_id,
                username: row.author_username,
                role: row.author_role,
            },
            comment_text: row.comment_text,
            is_resolved: row.is_resolved,
            parent_id: row.parent_id,
            reply_count: row.reply_count,
            created_at: format_primitive(row.created_at),
            updated_at: format_primitive(row.updated_at),
        }
    }
}

fn default_true() -> bool {
    true
}
