use super::*;

use rusqlite::types::Value;

use crate::types::{FeatureRequestSort, FeatureRequestStatus, SortDirection, SortField};
use crate::util::like_pattern;

const FEATURE_REQUEST_COLUMNS: &str = "id, title, description, status, upvotes, author_id,
     author_name, author_email, comments_count, created_at, updated_at";

/// Sort key for `created_at`; rows imported without a timestamp sort first.
const CREATED_KEY: &str = "COALESCE(created_at, '')";

/// Translate a filter into `WHERE` fragments and their positional values.
fn filter_clauses(filter: &FeatureRequestFilter) -> (Vec<String>, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?".to_string());
        values.push(Value::Text(status.as_str().to_string()));
    }

    if let Some(ref statuses) = filter.statuses {
        if statuses.is_empty() {
            clauses.push("0".to_string());
        } else {
            let placeholders = vec!["?"; statuses.len()].join(", ");
            clauses.push(format!("status IN ({})", placeholders));
            values.extend(statuses.iter().map(|s| Value::Text(s.as_str().to_string())));
        }
    }

    if !filter.label_ids.is_empty() {
        let placeholders = vec!["?"; filter.label_ids.len()].join(", ");
        clauses.push(format!(
            "id IN (SELECT feature_request_id FROM feature_request_labels
                    WHERE label_id IN ({}))",
            placeholders
        ));
        values.extend(filter.label_ids.iter().cloned().map(Value::Text));
    }

    if let Some(ref author_id) = filter.author_id {
        clauses.push("author_id = ?".to_string());
        values.push(Value::Text(author_id.clone()));
    }

    if let Some(ref user_id) = filter.upvoted_by {
        clauses.push(
            "id IN (SELECT feature_request_id FROM feature_request_upvotes WHERE user_id = ?)"
                .to_string(),
        );
        values.push(Value::Text(user_id.clone()));
    }

    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let pattern = like_pattern(&term.to_lowercase());
        clauses.push(
            "(lower_unicode(title) LIKE ? ESCAPE '\\' OR lower_unicode(description) LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }

    (clauses, values)
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    }
}

impl BoardDb {
    // =========================================================================
    // Feature requests
    // =========================================================================

    /// Map a row of `FEATURE_REQUEST_COLUMNS`. Memberships are loaded
    /// separately; the raw `created_at` text is kept for cursors.
    fn map_feature_request_row(row: &rusqlite::Row) -> rusqlite::Result<(FeatureRequest, String)> {
        let created_raw: Option<String> = row.get(9)?;
        let updated_raw: Option<String> = row.get(10)?;
        let status: Option<String> = row.get(3)?;
        let request = FeatureRequest {
            id: row.get(0)?,
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            status: FeatureRequestStatus::from_stored(status.as_deref()),
            upvotes: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
            upvoted_by: Vec::new(),
            labels: Vec::new(),
            author_id: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            author_name: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            author_email: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            comments_count: row.get::<_, Option<i64>>(8)?.unwrap_or(0),
            created_at: parse_timestamp(created_raw.as_deref()),
            updated_at: parse_timestamp(updated_raw.as_deref()),
        };
        Ok((request, created_raw.unwrap_or_default()))
    }

    /// Fill `upvoted_by` and `labels` from the membership tables.
    fn load_memberships(&self, request: &mut FeatureRequest) -> Result<(), DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM feature_request_upvotes
             WHERE feature_request_id = ?1
             ORDER BY COALESCE(created_at, ''), user_id",
        )?;
        request.upvoted_by = stmt
            .query_map(params![request.id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT label_id FROM feature_request_labels
             WHERE feature_request_id = ?1
             ORDER BY position, label_id",
        )?;
        request.labels = stmt
            .query_map(params![request.id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(())
    }

    /// Insert a feature request together with its upvoters and labels.
    pub fn insert_feature_request(&self, request: &FeatureRequest) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO feature_requests (
                id, title, description, status, upvotes, author_id, author_name,
                author_email, comments_count, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                request.id,
                request.title,
                request.description,
                request.status.as_str(),
                request.upvotes,
                request.author_id,
                request.author_name,
                request.author_email,
                request.comments_count,
                to_timestamp(&request.created_at),
                to_timestamp(&request.updated_at),
            ],
        )?;

        let created = to_timestamp(&request.created_at);
        for user_id in &request.upvoted_by {
            self.conn.execute(
                "INSERT OR IGNORE INTO feature_request_upvotes (feature_request_id, user_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![request.id, user_id, created],
            )?;
        }
        self.set_feature_request_labels(&request.id, &request.labels)?;
        Ok(())
    }

    /// Get a feature request by ID.
    pub fn get_feature_request(&self, id: &str) -> Result<Option<FeatureRequest>, DbError> {
        let sql = format!(
            "SELECT {} FROM feature_requests WHERE id = ?1",
            FEATURE_REQUEST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], Self::map_feature_request_row)?;

        match rows.next() {
            Some(row) => {
                let (mut request, _) = row?;
                self.load_memberships(&mut request)?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Apply field changes and refresh `updated_at`. Returns `false` when no
    /// row matched.
    pub fn update_feature_request(
        &self,
        id: &str,
        patch: &FeatureRequestPatch,
        updated_at: &DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE feature_requests SET
                title = COALESCE(?2, title),
                description = COALESCE(?3, description),
                status = COALESCE(?4, status),
                updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                patch.title,
                patch.description,
                patch.status.map(|s| s.as_str()),
                to_timestamp(updated_at),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Replace the attached labels, keeping the given order and dropping
    /// duplicates.
    pub fn set_feature_request_labels(&self, id: &str, label_ids: &[String]) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM feature_request_labels WHERE feature_request_id = ?1",
            params![id],
        )?;
        let mut position: i64 = 0;
        for label_id in label_ids {
            let inserted = self.conn.execute(
                "INSERT OR IGNORE INTO feature_request_labels (feature_request_id, label_id, position)
                 VALUES (?1, ?2, ?3)",
                params![id, label_id, position],
            )?;
            position += inserted as i64;
        }
        Ok(())
    }

    /// Hard delete. Upvotes and label attachments go with the row; comments
    /// are left in place.
    pub fn delete_feature_request(&self, id: &str) -> Result<bool, DbError> {
        let rows = self
            .conn
            .execute("DELETE FROM feature_requests WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// List feature requests matching `filter`, one page at a time.
    ///
    /// Ordering is total: the sort field, then `created_at`, then `id`, all in
    /// the requested direction. `after` resumes just past a previous page.
    pub fn list_feature_requests(
        &self,
        filter: &FeatureRequestFilter,
        sort: FeatureRequestSort,
        limit: usize,
        after: Option<&Cursor>,
    ) -> Result<Page<FeatureRequest>, DbError> {
        let (mut clauses, mut values) = filter_clauses(filter);
        let dir = sort.direction.sql();
        let op = match sort.direction {
            SortDirection::Asc => ">",
            SortDirection::Desc => "<",
        };

        if let Some(cursor) = after {
            match sort.field {
                SortField::Votes => {
                    let votes = cursor.sort_value.ok_or_else(|| {
                        DbError::InvalidCursor("cursor was not issued for a vote ordering".into())
                    })?;
                    clauses.push(format!("(upvotes, {}, id) {} (?, ?, ?)", CREATED_KEY, op));
                    values.push(Value::Integer(votes));
                }
                SortField::CreatedAt => {
                    clauses.push(format!("({}, id) {} (?, ?)", CREATED_KEY, op));
                }
            }
            values.push(Value::Text(cursor.created_at.clone()));
            values.push(Value::Text(cursor.id.clone()));
        }

        let order = match sort.field {
            SortField::Votes => format!("upvotes {d}, {} {d}, id {d}", CREATED_KEY, d = dir),
            SortField::CreatedAt => format!("{} {d}, id {d}", CREATED_KEY, d = dir),
        };
        let sql = format!(
            "SELECT {} FROM feature_requests {} ORDER BY {} LIMIT ?",
            FEATURE_REQUEST_COLUMNS,
            where_sql(&clauses),
            order
        );
        values.push(Value::Integer(limit as i64 + 1));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_feature_request_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let page = Page::from_overfetch(rows, limit, |(request, created_raw)| Cursor {
            sort_value: match sort.field {
                SortField::Votes => Some(request.upvotes),
                SortField::CreatedAt => None,
            },
            created_at: created_raw.clone(),
            id: request.id.clone(),
        });
        let mut page = page.map(|(request, _)| request);
        for request in &mut page.items {
            self.load_memberships(request)?;
        }
        Ok(page)
    }

    /// Count feature requests matching `filter`.
    pub fn count_feature_requests(&self, filter: &FeatureRequestFilter) -> Result<i64, DbError> {
        let (clauses, values) = filter_clauses(filter);
        let sql = format!("SELECT COUNT(*) FROM feature_requests {}", where_sql(&clauses));
        self.count(&sql, values)
    }

    // =========================================================================
    // Upvotes & counters
    // =========================================================================

    /// Add the user's vote if absent, remove it if present, and move the
    /// counter with it in one transaction. `None` when the request is gone.
    pub fn toggle_upvote(
        &self,
        id: &str,
        user_id: &str,
        now: &DateTime<Utc>,
    ) -> Result<Option<UpvoteOutcome>, DbError> {
        self.with_transaction(|db| {
            let exists: bool = db.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM feature_requests WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )?;
            if !exists {
                return Ok(None);
            }

            let stamp = to_timestamp(now);
            let removed = db.conn.execute(
                "DELETE FROM feature_request_upvotes
                 WHERE feature_request_id = ?1 AND user_id = ?2",
                params![id, user_id],
            )?;
            let upvoted = if removed > 0 {
                db.conn.execute(
                    "UPDATE feature_requests
                     SET upvotes = MAX(upvotes - 1, 0), updated_at = ?2
                     WHERE id = ?1",
                    params![id, stamp],
                )?;
                false
            } else {
                db.conn.execute(
                    "INSERT INTO feature_request_upvotes (feature_request_id, user_id, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![id, user_id, stamp],
                )?;
                db.conn.execute(
                    "UPDATE feature_requests
                     SET upvotes = upvotes + 1, updated_at = ?2
                     WHERE id = ?1",
                    params![id, stamp],
                )?;
                true
            };

            let upvotes: i64 = db.conn.query_row(
                "SELECT upvotes FROM feature_requests WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            Ok(Some(UpvoteOutcome { upvoted, upvotes }))
        })
    }

    /// Move `comments_count` by `delta`, never below zero, and stamp
    /// `updated_at`.
    pub fn adjust_comments_count(
        &self,
        id: &str,
        delta: i64,
        now: &DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE feature_requests
             SET comments_count = MAX(COALESCE(comments_count, 0) + ?2, 0), updated_at = ?3
             WHERE id = ?1",
            params![id, delta, to_timestamp(now)],
        )?;
        Ok(rows > 0)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Feature requests whose counters disagree with their membership rows.
    pub fn find_counter_drift(&self) -> Result<Vec<CounterDrift>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, upvotes, actual_upvotes, comments_count, actual_comments FROM (
                SELECT fr.id,
                       fr.upvotes,
                       (SELECT COUNT(*) FROM feature_request_upvotes u
                        WHERE u.feature_request_id = fr.id) AS actual_upvotes,
                       fr.comments_count,
                       (SELECT COUNT(*) FROM comments c
                        WHERE c.feature_request_id = fr.id) AS actual_comments
                FROM feature_requests fr
             )
             WHERE upvotes != actual_upvotes OR comments_count != actual_comments
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CounterDrift {
                id: row.get(0)?,
                upvotes: row.get(1)?,
                actual_upvotes: row.get(2)?,
                comments_count: row.get(3)?,
                actual_comments: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rewrite drifted counters from the membership rows. Returns the number
    /// of feature requests changed.
    pub fn repair_counters(&self) -> Result<usize, DbError> {
        self.with_transaction(|db| {
            let changed = db.conn.execute(
                "UPDATE feature_requests SET
                    upvotes = (SELECT COUNT(*) FROM feature_request_upvotes u
                               WHERE u.feature_request_id = feature_requests.id),
                    comments_count = (SELECT COUNT(*) FROM comments c
                                      WHERE c.feature_request_id = feature_requests.id)
                 WHERE upvotes != (SELECT COUNT(*) FROM feature_request_upvotes u
                                   WHERE u.feature_request_id = feature_requests.id)
                    OR comments_count != (SELECT COUNT(*) FROM comments c
                                          WHERE c.feature_request_id = feature_requests.id)",
                [],
            )?;
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{sample_comment, sample_request, test_db, ts};
    use super::*;
    use std::collections::HashSet;

    fn seed(db: &BoardDb, count: usize) {
        for i in 0..count {
            let request = sample_request(&format!("fr-{:02}", i), &format!("Request {}", i), i as i64);
            db.insert_feature_request(&request).unwrap();
        }
    }

    #[test]
    fn test_insert_and_get_with_memberships() {
        let db = test_db();
        db.conn_ref()
            .execute_batch(
                "INSERT INTO labels (id, name) VALUES ('l-ui', 'UI'), ('l-api', 'API');",
            )
            .unwrap();
        let mut request = sample_request("fr-1", "Dark mode", 0);
        request.upvoted_by = vec!["u1".to_string(), "u1".to_string()];
        request.upvotes = 1;
        request.labels = vec!["l-api".to_string(), "l-ui".to_string(), "l-api".to_string()];
        db.insert_feature_request(&request).unwrap();

        let loaded = db.get_feature_request("fr-1").unwrap().unwrap();
        assert_eq!(loaded.title, "Dark mode");
        assert_eq!(loaded.upvoted_by, vec!["u1"]);
        assert_eq!(loaded.labels, vec!["l-api", "l-ui"]);
        assert_eq!(loaded.created_at, ts(0));
        assert!(db.get_feature_request("missing").unwrap().is_none());
    }

    #[test]
    fn test_pages_never_overlap_and_report_has_more() {
        let db = test_db();
        seed(&db, 25);

        let mut seen = Vec::new();
        let mut cursor: Option<Cursor> = None;
        let mut pages = 0;
        loop {
            let page = db
                .list_feature_requests(
                    &FeatureRequestFilter::default(),
                    FeatureRequestSort::newest(),
                    10,
                    cursor.as_ref(),
                )
                .unwrap();
            assert!(page.items.len() <= 10);
            pages += 1;
            seen.extend(page.items.iter().map(|r| r.id.clone()));
            match page.next_cursor {
                Some(ref token) => {
                    assert!(page.has_more);
                    cursor = Some(Cursor::decode(token).unwrap());
                }
                None => {
                    assert!(!page.has_more);
                    break;
                }
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 25);
        assert_eq!(seen.first().map(String::as_str), Some("fr-24"));
        assert_eq!(seen.last().map(String::as_str), Some("fr-00"));
    }

    #[test]
    fn test_vote_ordering_breaks_ties_by_created_then_id() {
        let db = test_db();
        let mut a = sample_request("a", "A", 0);
        a.upvotes = 3;
        let mut b = sample_request("b", "B", 5);
        b.upvotes = 3;
        let mut c = sample_request("c", "C", 5);
        c.upvotes = 3;
        let mut d = sample_request("d", "D", 1);
        d.upvotes = 9;
        for r in [&a, &b, &c, &d] {
            db.insert_feature_request(r).unwrap();
        }

        let first = db
            .list_feature_requests(
                &FeatureRequestFilter::default(),
                FeatureRequestSort::most_voted(),
                2,
                None,
            )
            .unwrap();
        let ids: Vec<_> = first.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);

        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let second = db
            .list_feature_requests(
                &FeatureRequestFilter::default(),
                FeatureRequestSort::most_voted(),
                2,
                Some(&cursor),
            )
            .unwrap();
        let ids: Vec<_> = second.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(!second.has_more);
    }

    #[test]
    fn test_vote_ordering_rejects_created_cursor() {
        let db = test_db();
        let cursor = Cursor {
            sort_value: None,
            created_at: String::new(),
            id: "x".to_string(),
        };
        let result = db.list_feature_requests(
            &FeatureRequestFilter::default(),
            FeatureRequestSort::most_voted(),
            10,
            Some(&cursor),
        );
        assert!(matches!(result, Err(DbError::InvalidCursor(_))));
    }

    #[test]
    fn test_status_and_label_filters() {
        let db = test_db();
        db.conn_ref()
            .execute_batch("INSERT INTO labels (id, name) VALUES ('l-ui', 'UI');")
            .unwrap();
        let open = sample_request("open", "Open one", 0);
        let mut archived = sample_request("archived", "Old one", 1);
        archived.status = FeatureRequestStatus::Archived;
        let mut done = sample_request("done", "Shipped", 2);
        done.status = FeatureRequestStatus::Completed;
        done.labels = vec!["l-ui".to_string()];
        for r in [&open, &archived, &done] {
            db.insert_feature_request(r).unwrap();
        }

        let public = FeatureRequestFilter {
            statuses: Some(FeatureRequestStatus::PUBLIC.to_vec()),
            ..Default::default()
        };
        assert_eq!(db.count_feature_requests(&public).unwrap(), 2);

        let only_archived = FeatureRequestFilter {
            status: Some(FeatureRequestStatus::Archived),
            ..Default::default()
        };
        assert_eq!(db.count_feature_requests(&only_archived).unwrap(), 1);

        let labelled = FeatureRequestFilter {
            label_ids: vec!["l-ui".to_string(), "l-none".to_string()],
            ..Default::default()
        };
        let page = db
            .list_feature_requests(&labelled, FeatureRequestSort::newest(), 10, None)
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "done");

        let nothing = FeatureRequestFilter {
            statuses: Some(Vec::new()),
            ..Default::default()
        };
        assert_eq!(db.count_feature_requests(&nothing).unwrap(), 0);
    }

    #[test]
    fn test_search_is_case_insensitive_over_title_and_description() {
        let db = test_db();
        let mut dark = sample_request("dark", "Dark mode", 0);
        dark.description = "Easier on the eyes at night".to_string();
        let export = sample_request("export", "CSV export", 1);
        db.insert_feature_request(&dark).unwrap();
        db.insert_feature_request(&export).unwrap();

        let by_title = FeatureRequestFilter {
            search: Some("DARK".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_feature_requests(&by_title).unwrap(), 1);

        let by_description = FeatureRequestFilter {
            search: Some("night".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_feature_requests(&by_description).unwrap(), 1);

        let wildcard = FeatureRequestFilter {
            search: Some("%".to_string()),
            ..Default::default()
        };
        assert_eq!(db.count_feature_requests(&wildcard).unwrap(), 0);
    }

    #[test]
    fn test_search_folds_non_ascii_case() {
        let db = test_db();
        let eclair = sample_request("eclair", "Éclair export", 0);
        let mut unicode = sample_request("unicode", "Unicode support", 1);
        unicode.description = "Handle ÜNICODE filenames".to_string();
        db.insert_feature_request(&eclair).unwrap();
        db.insert_feature_request(&unicode).unwrap();

        for (term, expected) in [("éclair", "eclair"), ("ÉCLAIR", "eclair"), ("ünicode", "unicode")] {
            let filter = FeatureRequestFilter {
                search: Some(term.to_string()),
                ..Default::default()
            };
            let page = db
                .list_feature_requests(&filter, FeatureRequestSort::newest(), 10, None)
                .unwrap();
            let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec![expected], "search for {}", term);
        }
    }

    #[test]
    fn test_toggle_upvote_twice_restores_state() {
        let db = test_db();
        db.insert_feature_request(&sample_request("fr-1", "Dark mode", 0))
            .unwrap();

        let on = db.toggle_upvote("fr-1", "u1", &ts(10)).unwrap().unwrap();
        assert!(on.upvoted);
        assert_eq!(on.upvotes, 1);
        let after_on = db.get_feature_request("fr-1").unwrap().unwrap();
        assert!(after_on.has_upvoted("u1"));

        let off = db.toggle_upvote("fr-1", "u1", &ts(11)).unwrap().unwrap();
        assert!(!off.upvoted);
        assert_eq!(off.upvotes, 0);
        let after_off = db.get_feature_request("fr-1").unwrap().unwrap();
        assert!(after_off.upvoted_by.is_empty());
        assert_eq!(after_off.upvotes, 0);

        assert!(db.toggle_upvote("missing", "u1", &ts(12)).unwrap().is_none());
    }

    #[test]
    fn test_upvoted_by_filter() {
        let db = test_db();
        seed(&db, 3);
        db.toggle_upvote("fr-01", "voter", &ts(20)).unwrap();
        let filter = FeatureRequestFilter {
            upvoted_by: Some("voter".to_string()),
            ..Default::default()
        };
        let page = db
            .list_feature_requests(&filter, FeatureRequestSort::newest(), 10, None)
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "fr-01");
    }

    #[test]
    fn test_comments_count_never_negative() {
        let db = test_db();
        db.insert_feature_request(&sample_request("fr-1", "Dark mode", 0))
            .unwrap();
        assert!(db.adjust_comments_count("fr-1", 1, &ts(1)).unwrap());
        assert!(db.adjust_comments_count("fr-1", -1, &ts(2)).unwrap());
        assert!(db.adjust_comments_count("fr-1", -1, &ts(3)).unwrap());
        let loaded = db.get_feature_request("fr-1").unwrap().unwrap();
        assert_eq!(loaded.comments_count, 0);
        assert_eq!(loaded.updated_at, ts(3));
        assert!(!db.adjust_comments_count("missing", 1, &ts(4)).unwrap());
    }

    #[test]
    fn test_update_patch_leaves_unset_fields() {
        let db = test_db();
        db.insert_feature_request(&sample_request("fr-1", "Dark mode", 0))
            .unwrap();
        let patch = FeatureRequestPatch {
            status: Some(FeatureRequestStatus::WillDo),
            ..Default::default()
        };
        assert!(db.update_feature_request("fr-1", &patch, &ts(30)).unwrap());
        let loaded = db.get_feature_request("fr-1").unwrap().unwrap();
        assert_eq!(loaded.title, "Dark mode");
        assert_eq!(loaded.status, FeatureRequestStatus::WillDo);
        assert_eq!(loaded.updated_at, ts(30));
        assert!(!db.update_feature_request("missing", &patch, &ts(30)).unwrap());
    }

    #[test]
    fn test_delete_keeps_comments_but_drops_votes() {
        let db = test_db();
        db.insert_feature_request(&sample_request("fr-1", "Dark mode", 0))
            .unwrap();
        db.toggle_upvote("fr-1", "u1", &ts(1)).unwrap();
        db.insert_comment(&sample_comment("c1", "fr-1", 2)).unwrap();

        assert!(db.delete_feature_request("fr-1").unwrap());
        let votes: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM feature_request_upvotes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(votes, 0);
        assert!(db.get_comment("c1").unwrap().is_some());
    }

    #[test]
    fn test_counter_drift_detected_and_repaired() {
        let db = test_db();
        let mut request = sample_request("fr-1", "Dark mode", 0);
        request.upvoted_by = vec!["u1".to_string(), "u2".to_string()];
        request.upvotes = 5;
        request.comments_count = 0;
        db.insert_feature_request(&request).unwrap();
        db.insert_comment(&sample_comment("c1", "fr-1", 1)).unwrap();
        db.insert_feature_request(&sample_request("fr-2", "Clean", 1))
            .unwrap();

        let drift = db.find_counter_drift().unwrap();
        assert_eq!(drift.len(), 1);
        assert_eq!(drift[0].id, "fr-1");
        assert_eq!(drift[0].actual_upvotes, 2);
        assert_eq!(drift[0].actual_comments, 1);

        assert_eq!(db.repair_counters().unwrap(), 1);
        assert!(db.find_counter_drift().unwrap().is_empty());
        let repaired = db.get_feature_request("fr-1").unwrap().unwrap();
        assert_eq!(repaired.upvotes, 2);
        assert_eq!(repaired.comments_count, 1);
    }
}
