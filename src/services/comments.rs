// Comments service
// Comment authoring with the parent's comments_count kept in step.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthContext;
use crate::db::{BoardDb, Comment, Cursor, Page};
use crate::error::BoardError;
use crate::util::new_id;
use crate::validation;

/// Comment threads page in larger steps than request lists.
pub const COMMENT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComment {
    pub feature_request_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentQuery {
    pub feature_request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

fn require_comment(db: &BoardDb, id: &str) -> Result<Comment, BoardError> {
    db.get_comment(id)?
        .ok_or_else(|| BoardError::not_found("Comment", id))
}

/// Add a comment and bump the parent's count in one transaction.
pub fn create(db: &BoardDb, auth: &AuthContext, input: &CreateComment) -> Result<String, BoardError> {
    let user = auth.require_user()?;
    let content = validation::comment_content(&input.content)?;
    if db.get_feature_request(&input.feature_request_id)?.is_none() {
        return Err(BoardError::not_found(
            "Feature request",
            input.feature_request_id.as_str(),
        ));
    }

    let now = Utc::now();
    let comment = Comment {
        id: new_id(),
        content,
        feature_request_id: input.feature_request_id.clone(),
        author_id: user.uid.clone(),
        author_name: super::author_name(user),
        author_email: user.email.clone(),
        author_photo_url: user.photo_url.clone(),
        created_at: now,
        updated_at: now,
    };
    db.with_transaction(|db| {
        db.insert_comment(&comment)?;
        db.adjust_comments_count(&comment.feature_request_id, 1, &now)
    })?;

    log::debug!(
        "Comment {} added to {} by {}",
        comment.id,
        comment.feature_request_id,
        user.uid
    );
    Ok(comment.id)
}

pub fn get(db: &BoardDb, id: &str) -> Result<Option<Comment>, BoardError> {
    Ok(db.get_comment(id)?)
}

/// A page of comments, oldest first.
pub fn list(db: &BoardDb, query: &CommentQuery) -> Result<Page<Comment>, BoardError> {
    let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
    let limit = super::page_size(Some(query.limit.unwrap_or(COMMENT_PAGE_SIZE)));
    Ok(db.list_comments_for(&query.feature_request_id, limit, cursor.as_ref())?)
}

/// Counted from the comments themselves, not the denormalized field.
pub fn count_for(db: &BoardDb, feature_request_id: &str) -> Result<i64, BoardError> {
    Ok(db.count_comments_for(feature_request_id)?)
}

pub fn update(
    db: &BoardDb,
    auth: &AuthContext,
    id: &str,
    content: &str,
) -> Result<Comment, BoardError> {
    auth.require_user()?;
    let existing = require_comment(db, id)?;
    if !auth.can_modify(&existing.author_id) {
        return Err(BoardError::permission(
            "only the author or an administrator can edit this comment",
        ));
    }
    let content = validation::comment_content(content)?;
    db.update_comment_content(id, &content, &Utc::now())?;
    require_comment(db, id)
}

/// Remove a comment and decrement the parent's count in one transaction.
/// Returns the removed comment.
pub fn delete(db: &BoardDb, auth: &AuthContext, id: &str) -> Result<Comment, BoardError> {
    let user = auth.require_user()?;
    let existing = require_comment(db, id)?;
    if !auth.can_modify(&existing.author_id) {
        return Err(BoardError::permission(
            "only the author or an administrator can delete this comment",
        ));
    }
    let now = Utc::now();
    db.with_transaction(|db| {
        db.delete_comment(id)?;
        // The parent may already be gone; nothing to decrement then.
        db.adjust_comments_count(&existing.feature_request_id, -1, &now)
    })?;
    log::debug!("Comment {} deleted by {}", id, user.uid);
    Ok(existing)
}
