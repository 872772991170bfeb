use super::*;

impl BoardDb {
    // =========================================================================
    // Labels
    // =========================================================================

    fn map_label_row(row: &rusqlite::Row) -> rusqlite::Result<Label> {
        let background: Option<String> = row.get(2)?;
        let text: Option<String> = row.get(3)?;
        let created_raw: Option<String> = row.get(5)?;
        let updated_raw: Option<String> = row.get(6)?;
        Ok(Label {
            id: row.get(0)?,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            background_color: background
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LABEL_BACKGROUND.to_string()),
            text_color: text
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LABEL_TEXT.to_string()),
            created_by: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            created_at: parse_timestamp(created_raw.as_deref()),
            updated_at: parse_timestamp(updated_raw.as_deref()),
        })
    }

    pub fn insert_label(&self, label: &Label) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO labels (id, name, background_color, text_color, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                label.id,
                label.name,
                label.background_color,
                label.text_color,
                label.created_by,
                to_timestamp(&label.created_at),
                to_timestamp(&label.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_label(&self, id: &str) -> Result<Option<Label>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, background_color, text_color, created_by, created_at, updated_at
             FROM labels WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_label_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All labels ordered by name.
    pub fn list_labels(&self) -> Result<Vec<Label>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, background_color, text_color, created_by, created_at, updated_at
             FROM labels
             ORDER BY name COLLATE NOCASE, id",
        )?;
        let rows = stmt.query_map([], Self::map_label_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Overwrite the editable fields of a label.
    pub fn update_label(&self, label: &Label) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE labels SET name = ?2, background_color = ?3, text_color = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                label.id,
                label.name,
                label.background_color,
                label.text_color,
                to_timestamp(&label.updated_at),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Delete a label and detach it from every feature request.
    pub fn delete_label(&self, id: &str) -> Result<bool, DbError> {
        self.with_transaction(|db| {
            db.conn.execute(
                "DELETE FROM feature_request_labels WHERE label_id = ?1",
                params![id],
            )?;
            let rows = db
                .conn
                .execute("DELETE FROM labels WHERE id = ?1", params![id])?;
            Ok(rows > 0)
        })
    }

    pub fn count_labels(&self) -> Result<i64, DbError> {
        self.count("SELECT COUNT(*) FROM labels", Vec::new())
    }

    /// The subset of `ids` with no matching label, in input order.
    pub fn missing_label_ids(&self, ids: &[String]) -> Result<Vec<String>, DbError> {
        let mut missing = Vec::new();
        for id in ids {
            let exists: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM labels WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if !exists && !missing.contains(id) {
                missing.push(id.clone());
            }
        }
        Ok(missing)
    }
}
