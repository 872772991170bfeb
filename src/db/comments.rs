use super::*;

const COMMENT_COLUMNS: &str = "id, content, feature_request_id, author_id, author_name,
     author_email, author_photo_url, created_at, updated_at";

impl BoardDb {
    // =========================================================================
    // Comments
    // =========================================================================

    fn map_comment_row(row: &rusqlite::Row) -> rusqlite::Result<(Comment, String)> {
        let created_raw: Option<String> = row.get(7)?;
        let updated_raw: Option<String> = row.get(8)?;
        let comment = Comment {
            id: row.get(0)?,
            content: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            feature_request_id: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            author_id: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            author_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            author_email: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            author_photo_url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            created_at: parse_timestamp(created_raw.as_deref()),
            updated_at: parse_timestamp(updated_raw.as_deref()),
        };
        Ok((comment, created_raw.unwrap_or_default()))
    }

    pub fn insert_comment(&self, comment: &Comment) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO comments (
                id, content, feature_request_id, author_id, author_name,
                author_email, author_photo_url, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                comment.id,
                comment.content,
                comment.feature_request_id,
                comment.author_id,
                comment.author_name,
                comment.author_email,
                comment.author_photo_url,
                to_timestamp(&comment.created_at),
                to_timestamp(&comment.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<Comment>, DbError> {
        let sql = format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_comment_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.0)),
            None => Ok(None),
        }
    }

    pub fn update_comment_content(
        &self,
        id: &str,
        content: &str,
        updated_at: &DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, content, to_timestamp(updated_at)],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_comment(&self, id: &str) -> Result<bool, DbError> {
        let rows = self
            .conn
            .execute("DELETE FROM comments WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Comments on a feature request, oldest first.
    pub fn list_comments_for(
        &self,
        feature_request_id: &str,
        limit: usize,
        after: Option<&Cursor>,
    ) -> Result<Page<Comment>, DbError> {
        let mut sql = format!(
            "SELECT {} FROM comments WHERE feature_request_id = ?1",
            COMMENT_COLUMNS
        );
        let mut values = vec![rusqlite::types::Value::Text(feature_request_id.to_string())];
        if let Some(cursor) = after {
            sql.push_str(" AND (COALESCE(created_at, ''), id) > (?2, ?3)");
            values.push(rusqlite::types::Value::Text(cursor.created_at.clone()));
            values.push(rusqlite::types::Value::Text(cursor.id.clone()));
        }
        sql.push_str(&format!(
            " ORDER BY COALESCE(created_at, '') ASC, id ASC LIMIT ?{}",
            values.len() + 1
        ));
        values.push(rusqlite::types::Value::Integer(limit as i64 + 1));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_comment_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let page = Page::from_overfetch(rows, limit, |(comment, created_raw)| Cursor {
            sort_value: None,
            created_at: created_raw.clone(),
            id: comment.id.clone(),
        });
        Ok(page.map(|(comment, _)| comment))
    }

    /// True number of comments on a feature request.
    pub fn count_comments_for(&self, feature_request_id: &str) -> Result<i64, DbError> {
        self.count(
            "SELECT COUNT(*) FROM comments WHERE feature_request_id = ?",
            vec![feature_request_id.to_string().into()],
        )
    }

    pub fn count_comments_by_author(&self, author_id: &str) -> Result<i64, DbError> {
        self.count(
            "SELECT COUNT(*) FROM comments WHERE author_id = ?",
            vec![author_id.to_string().into()],
        )
    }

    pub fn count_all_comments(&self) -> Result<i64, DbError> {
        self.count("SELECT COUNT(*) FROM comments", Vec::new())
    }

    // =========================================================================
    // Orphans
    // =========================================================================

    /// Comments whose feature request no longer exists.
    pub fn list_orphaned_comment_ids(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id FROM comments c
             LEFT JOIN feature_requests fr ON fr.id = c.feature_request_id
             WHERE fr.id IS NULL
             ORDER BY c.id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn delete_orphaned_comments(&self) -> Result<usize, DbError> {
        let rows = self.conn.execute(
            "DELETE FROM comments
             WHERE feature_request_id NOT IN (SELECT id FROM feature_requests)",
            [],
        )?;
        Ok(rows)
    }
}
