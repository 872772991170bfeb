// Feature request service
// Authoring rules, status gating and vote toggling over the feature request store.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::AuthContext;
use crate::db::{
    BoardDb, Cursor, FeatureRequest, FeatureRequestFilter, FeatureRequestPatch, Page,
    UpvoteOutcome,
};
use crate::error::BoardError;
use crate::types::{FeatureRequestSort, FeatureRequestStatus, TabGroup};
use crate::util::new_id;
use crate::validation;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeatureRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Partial edit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFeatureRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<FeatureRequestStatus>,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

/// Listing parameters. Also serves as the cache key for a list view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequestQuery {
    #[serde(flatten)]
    pub filter: FeatureRequestFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabGroup>,
    #[serde(default)]
    pub sort: FeatureRequestSort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabCount {
    pub tab: TabGroup,
    pub count: i64,
}

/// Trim, drop blanks and duplicates, and require every label to exist.
fn resolve_labels(db: &BoardDb, labels: &[String]) -> Result<Vec<String>, BoardError> {
    let mut resolved: Vec<String> = Vec::with_capacity(labels.len());
    for id in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if !resolved.iter().any(|r| r == id) {
            resolved.push(id.to_string());
        }
    }
    let missing = db.missing_label_ids(&resolved)?;
    if !missing.is_empty() {
        return Err(BoardError::validation(format!(
            "Unknown label: {}",
            missing.join(", ")
        )));
    }
    Ok(resolved)
}

/// Reject tabs the caller is not allowed to open.
pub fn ensure_tab_visible(auth: &AuthContext, tab: Option<TabGroup>) -> Result<(), BoardError> {
    match tab {
        Some(tab) if tab.admin_only() && !auth.is_admin() => Err(BoardError::permission(
            "only administrators can view archived requests",
        )),
        _ => Ok(()),
    }
}

/// Narrow the query's filter to the selected tab.
fn effective_filter(
    auth: &AuthContext,
    query: &FeatureRequestQuery,
) -> Result<FeatureRequestFilter, BoardError> {
    ensure_tab_visible(auth, query.tab)?;
    let mut filter = query.filter.clone();
    if let Some(tab) = query.tab {
        let tab_statuses = tab.statuses();
        filter.statuses = Some(match filter.statuses.take() {
            Some(requested) => requested
                .into_iter()
                .filter(|s| tab_statuses.contains(s))
                .collect(),
            None => tab_statuses,
        });
    }
    Ok(filter)
}

fn require_request(db: &BoardDb, id: &str) -> Result<FeatureRequest, BoardError> {
    db.get_feature_request(id)?
        .ok_or_else(|| BoardError::not_found("Feature request", id))
}

/// Create a feature request authored by the signed-in user. Returns its id.
pub fn create(
    db: &BoardDb,
    auth: &AuthContext,
    input: &CreateFeatureRequest,
) -> Result<String, BoardError> {
    let user = auth.require_user()?;
    let title = validation::title(&input.title)?;
    let description = validation::description(&input.description)?;
    let labels = resolve_labels(db, &input.labels)?;

    let now = Utc::now();
    let request = FeatureRequest {
        id: new_id(),
        title,
        description,
        status: FeatureRequestStatus::Open,
        upvotes: 0,
        upvoted_by: Vec::new(),
        labels,
        author_id: user.uid.clone(),
        author_name: super::author_name(user),
        author_email: user.email.clone(),
        comments_count: 0,
        created_at: now,
        updated_at: now,
    };
    db.with_transaction(|db| db.insert_feature_request(&request))?;

    log::info!("Feature request {} created by {}", request.id, user.uid);
    Ok(request.id)
}

pub fn get(db: &BoardDb, id: &str) -> Result<Option<FeatureRequest>, BoardError> {
    Ok(db.get_feature_request(id)?)
}

pub fn list(
    db: &BoardDb,
    auth: &AuthContext,
    query: &FeatureRequestQuery,
) -> Result<Page<FeatureRequest>, BoardError> {
    let filter = effective_filter(auth, query)?;
    let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
    let limit = super::page_size(query.limit);
    Ok(db.list_feature_requests(&filter, query.sort, limit, cursor.as_ref())?)
}

/// Title/description search layered over a listing query.
pub fn search(
    db: &BoardDb,
    auth: &AuthContext,
    term: &str,
    query: &FeatureRequestQuery,
) -> Result<Page<FeatureRequest>, BoardError> {
    let term = term.trim();
    if term.is_empty() {
        return Ok(Page::empty());
    }
    let mut query = query.clone();
    query.filter.search = Some(term.to_string());
    list(db, auth, &query)
}

/// Edit a request. Authors may edit their own; status changes need an admin.
pub fn update(
    db: &BoardDb,
    auth: &AuthContext,
    id: &str,
    input: &UpdateFeatureRequest,
) -> Result<FeatureRequest, BoardError> {
    let user = auth.require_user()?;
    let existing = require_request(db, id)?;
    if !auth.can_modify(&existing.author_id) {
        return Err(BoardError::permission(
            "only the author or an administrator can edit this request",
        ));
    }

    if let Some(status) = input.status {
        if status != existing.status && !auth.is_admin() {
            return Err(BoardError::permission("only administrators can change status"));
        }
    }

    let labels = match input.labels {
        Some(ref labels) => {
            let labels = resolve_labels(db, labels)?;
            if labels != existing.labels && existing.author_id != user.uid && !auth.is_admin() {
                return Err(BoardError::permission(
                    "only administrators can relabel other users' requests",
                ));
            }
            Some(labels)
        }
        None => None,
    };

    let patch = FeatureRequestPatch {
        title: input.title.as_deref().map(validation::title).transpose()?,
        description: input
            .description
            .as_deref()
            .map(validation::description)
            .transpose()?,
        status: input.status,
    };

    let now = Utc::now();
    db.with_transaction(|db| {
        db.update_feature_request(id, &patch, &now)?;
        if let Some(ref labels) = labels {
            db.set_feature_request_labels(id, labels)?;
        }
        Ok::<_, BoardError>(())
    })?;

    if let Some(status) = patch.status.filter(|s| *s != existing.status) {
        log::info!("Feature request {} moved to {} by {}", id, status, user.uid);
    }
    require_request(db, id)
}

/// Hard delete. Comments on the request are left in place.
pub fn delete(db: &BoardDb, auth: &AuthContext, id: &str) -> Result<(), BoardError> {
    let user = auth.require_user()?;
    let existing = require_request(db, id)?;
    if !auth.can_modify(&existing.author_id) {
        return Err(BoardError::permission(
            "only the author or an administrator can delete this request",
        ));
    }
    db.delete_feature_request(id)?;
    log::info!("Feature request {} deleted by {}", id, user.uid);
    Ok(())
}

/// Flip the caller's vote on a request.
pub fn toggle_upvote(
    db: &BoardDb,
    auth: &AuthContext,
    id: &str,
) -> Result<UpvoteOutcome, BoardError> {
    let user = auth.require_user()?;
    db.toggle_upvote(id, &user.uid, &Utc::now())?
        .ok_or_else(|| BoardError::not_found("Feature request", id))
}

/// Number of requests behind each tab the caller can see.
pub fn tab_counts(db: &BoardDb, is_admin: bool) -> Result<Vec<TabCount>, BoardError> {
    TabGroup::visible(is_admin)
        .into_iter()
        .map(|tab| {
            let filter = FeatureRequestFilter {
                statuses: Some(tab.statuses()),
                ..FeatureRequestFilter::default()
            };
            Ok(TabCount {
                tab,
                count: db.count_feature_requests(&filter)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::DbError;
    use crate::services::test_support::{admin, member};

    fn new_request(title: &str) -> CreateFeatureRequest {
        CreateFeatureRequest {
            title: title.to_string(),
            description: format!("Please add {}", title.to_lowercase()),
            labels: Vec::new(),
        }
    }

    fn set_status(db: &BoardDb, id: &str, status: FeatureRequestStatus) {
        let patch = FeatureRequestPatch {
            status: Some(status),
            ..FeatureRequestPatch::default()
        };
        db.update_feature_request(id, &patch, &Utc::now()).unwrap();
    }

    #[test]
    fn test_dark_mode_scenario() {
        let db = test_db();
        let author = member(&db, "author");
        let voter = member(&db, "voter");

        let id = create(
            &db,
            &author,
            &CreateFeatureRequest {
                title: "Dark mode".to_string(),
                description: "Please add dark mode".to_string(),
                labels: Vec::new(),
            },
        )
        .unwrap();
        let created = get(&db, &id).unwrap().unwrap();
        assert_eq!(created.status, FeatureRequestStatus::Open);
        assert_eq!(created.upvotes, 0);
        assert!(created.upvoted_by.is_empty());
        assert_eq!(created.author_name, "author");

        let first = toggle_upvote(&db, &voter, &id).unwrap();
        assert_eq!(first, UpvoteOutcome { upvoted: true, upvotes: 1 });
        let after_first = get(&db, &id).unwrap().unwrap();
        assert_eq!(after_first.upvoted_by, vec!["voter"]);

        let second = toggle_upvote(&db, &voter, &id).unwrap();
        assert_eq!(second, UpvoteOutcome { upvoted: false, upvotes: 0 });
        let after_second = get(&db, &id).unwrap().unwrap();
        assert!(after_second.upvoted_by.is_empty());
        assert_eq!(after_second.upvotes, 0);
    }

    #[test]
    fn test_create_requires_sign_in_and_valid_input() {
        let db = test_db();
        let err = create(&db, &AuthContext::signed_out(), &new_request("Dark mode")).unwrap_err();
        assert!(matches!(err, BoardError::NotSignedIn));

        let author = member(&db, "author");
        let mut blank = new_request("Dark mode");
        blank.title = "   ".to_string();
        assert!(matches!(
            create(&db, &author, &blank),
            Err(BoardError::Validation(_))
        ));

        let mut unknown_label = new_request("Dark mode");
        unknown_label.labels = vec!["l-missing".to_string()];
        assert!(matches!(
            create(&db, &author, &unknown_label),
            Err(BoardError::Validation(_))
        ));
    }

    #[test]
    fn test_status_change_is_admin_only() {
        let db = test_db();
        let author = member(&db, "author");
        let boss = admin(&db, "boss");
        let id = create(&db, &author, &new_request("Exports")).unwrap();

        let to_progress = UpdateFeatureRequest {
            status: Some(FeatureRequestStatus::InProgress),
            ..UpdateFeatureRequest::default()
        };
        let err = update(&db, &author, &id, &to_progress).unwrap_err();
        assert!(matches!(err, BoardError::PermissionDenied(_)));

        let updated = update(&db, &boss, &id, &to_progress).unwrap();
        assert_eq!(updated.status, FeatureRequestStatus::InProgress);

        // Re-sending the current status alongside an edit is not a change.
        let retitle = UpdateFeatureRequest {
            title: Some("CSV exports".to_string()),
            status: Some(FeatureRequestStatus::InProgress),
            ..UpdateFeatureRequest::default()
        };
        let updated = update(&db, &author, &id, &retitle).unwrap();
        assert_eq!(updated.title, "CSV exports");
    }

    #[test]
    fn test_only_author_or_admin_can_edit_or_delete() {
        let db = test_db();
        let author = member(&db, "author");
        let stranger = member(&db, "stranger");
        let boss = admin(&db, "boss");
        let id = create(&db, &author, &new_request("Webhooks")).unwrap();

        let edit = UpdateFeatureRequest {
            description: Some("Outgoing webhooks on status change".to_string()),
            ..UpdateFeatureRequest::default()
        };
        assert!(matches!(
            update(&db, &stranger, &id, &edit),
            Err(BoardError::PermissionDenied(_))
        ));
        assert!(matches!(
            delete(&db, &stranger, &id),
            Err(BoardError::PermissionDenied(_))
        ));

        db.conn_ref()
            .execute("INSERT INTO labels (id, name) VALUES ('l-api', 'API')", [])
            .unwrap();
        let relabel = UpdateFeatureRequest {
            labels: Some(vec!["l-api".to_string()]),
            ..UpdateFeatureRequest::default()
        };
        let updated = update(&db, &boss, &id, &relabel).unwrap();
        assert_eq!(updated.labels, vec!["l-api"]);

        delete(&db, &boss, &id).unwrap();
        assert!(get(&db, &id).unwrap().is_none());
        assert!(matches!(
            delete(&db, &boss, &id),
            Err(BoardError::NotFound { .. })
        ));
    }

    #[test]
    fn test_all_tab_excludes_archived() {
        let db = test_db();
        let author = member(&db, "author");
        let boss = admin(&db, "boss");
        let open = create(&db, &author, &new_request("Open one")).unwrap();
        let archived = create(&db, &author, &new_request("Old one")).unwrap();
        set_status(&db, &archived, FeatureRequestStatus::Archived);

        let all = FeatureRequestQuery {
            tab: Some(TabGroup::All),
            ..FeatureRequestQuery::default()
        };
        let page = list(&db, &author, &all).unwrap();
        let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![open.as_str()]);

        let archive_tab = FeatureRequestQuery {
            tab: Some(TabGroup::Archived),
            ..FeatureRequestQuery::default()
        };
        assert!(matches!(
            list(&db, &author, &archive_tab),
            Err(BoardError::PermissionDenied(_))
        ));
        let page = list(&db, &boss, &archive_tab).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, archived);
    }

    #[test]
    fn test_status_set_filter_returns_only_members() {
        let db = test_db();
        let author = member(&db, "author");
        let statuses = [
            FeatureRequestStatus::Open,
            FeatureRequestStatus::Considering,
            FeatureRequestStatus::Completed,
            FeatureRequestStatus::WontDo,
        ];
        for (i, status) in statuses.iter().enumerate() {
            let id = create(&db, &author, &new_request(&format!("Request {}", i))).unwrap();
            set_status(&db, &id, *status);
        }

        let query = FeatureRequestQuery {
            filter: FeatureRequestFilter {
                statuses: Some(vec![FeatureRequestStatus::Completed, FeatureRequestStatus::WontDo]),
                ..FeatureRequestFilter::default()
            },
            ..FeatureRequestQuery::default()
        };
        let page = list(&db, &author, &query).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items.iter().all(|r| matches!(
            r.status,
            FeatureRequestStatus::Completed | FeatureRequestStatus::WontDo
        )));

        // Tab and explicit set intersect.
        let narrowed = FeatureRequestQuery {
            tab: Some(TabGroup::Open),
            ..query
        };
        assert!(list(&db, &author, &narrowed).unwrap().items.is_empty());
    }

    #[test]
    fn test_pages_never_exceed_limit() {
        let db = test_db();
        let author = member(&db, "author");
        for i in 0..7 {
            create(&db, &author, &new_request(&format!("Request {}", i))).unwrap();
        }

        let mut query = FeatureRequestQuery {
            limit: Some(3),
            sort: FeatureRequestSort::oldest(),
            ..FeatureRequestQuery::default()
        };
        let mut seen = Vec::new();
        loop {
            let page = list(&db, &author, &query).unwrap();
            assert!(page.items.len() <= 3);
            seen.extend(page.items.iter().map(|r| r.id.clone()));
            match page.next_cursor {
                Some(cursor) => query.cursor = Some(cursor),
                None => break,
            }
        }
        assert_eq!(seen.len(), 7);
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 7);

        query.cursor = Some("garbage".to_string());
        assert!(matches!(
            list(&db, &author, &query),
            Err(BoardError::Store(DbError::InvalidCursor(_)))
        ));
    }

    #[test]
    fn test_search_with_blank_term_is_empty() {
        let db = test_db();
        let author = member(&db, "author");
        create(&db, &author, &new_request("Dark mode")).unwrap();
        create(&db, &author, &new_request("Exports")).unwrap();

        let query = FeatureRequestQuery::default();
        assert!(search(&db, &author, "  ", &query).unwrap().items.is_empty());
        let hits = search(&db, &author, "DARK", &query).unwrap();
        assert_eq!(hits.items.len(), 1);
        assert_eq!(hits.items[0].title, "Dark mode");
    }

    #[test]
    fn test_tab_counts_hide_archived_from_members() {
        let db = test_db();
        let author = member(&db, "author");
        let id = create(&db, &author, &new_request("Old one")).unwrap();
        set_status(&db, &id, FeatureRequestStatus::Archived);
        create(&db, &author, &new_request("New one")).unwrap();

        let counts = tab_counts(&db, false).unwrap();
        assert!(counts.iter().all(|c| c.tab != TabGroup::Archived));
        assert_eq!(counts[0], TabCount { tab: TabGroup::All, count: 1 });

        let counts = tab_counts(&db, true).unwrap();
        let archived = counts.iter().find(|c| c.tab == TabGroup::Archived).unwrap();
        assert_eq!(archived.count, 1);
    }

    #[test]
    fn test_toggle_on_missing_request_is_not_found() {
        let db = test_db();
        let voter = member(&db, "voter");
        assert!(matches!(
            toggle_upvote(&db, &voter, "nope"),
            Err(BoardError::NotFound { .. })
        ));
    }
}
