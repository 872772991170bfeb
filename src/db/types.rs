//! Shared type definitions for the database layer.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AnalyticsKind, AnalyticsPeriod, FeatureRequestStatus, Theme};

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Invalid pagination cursor: {0}")]
    InvalidCursor(String),
}

impl DbError {
    /// SQLite reported the database as busy or locked by another writer.
    pub fn is_busy(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// A document from the `feature_requests` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequest {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: FeatureRequestStatus,
    pub upvotes: i64,
    /// User ids that upvoted. Backed by a keyed table, never duplicated.
    pub upvoted_by: Vec<String>,
    /// Attached label ids.
    pub labels: Vec<String>,
    pub author_id: String,
    pub author_name: String,
    pub author_email: String,
    /// Denormalized count of comments on this request.
    pub comments_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureRequest {
    pub fn has_upvoted(&self, user_id: &str) -> bool {
        self.upvoted_by.iter().any(|uid| uid == user_id)
    }
}

/// A document from the `comments` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub feature_request_id: String,
    pub author_id: String,
    pub author_name: String,
    pub author_email: String,
    pub author_photo_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fallback label colors for rows written without them.
pub const DEFAULT_LABEL_BACKGROUND: &str = "#f3f4f6";
pub const DEFAULT_LABEL_TEXT: &str = "#374151";

/// A document from the `labels` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: String,
    pub name: String,
    pub background_color: String,
    pub text_color: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A document from the `users` collection, keyed by identity provider uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub photo_url: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// An entry on the admin email allow-list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEmail {
    pub email: String,
    pub added_by: String,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_PROJECT_NAME: &str = "Feature Upvote";
pub const DEFAULT_TAGLINE: &str = "A feature request and upvoting platform for product teams";
pub const DEFAULT_PRIMARY_COLOR: &str = "#3b82f6";

/// The singleton settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub project_name: String,
    pub tagline: String,
    pub primary_color: String,
    pub default_theme: Theme,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl AppSettings {
    /// Hard-coded defaults served when no settings document exists.
    pub fn defaults() -> Self {
        let now = Utc::now();
        Self {
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            tagline: DEFAULT_TAGLINE.to_string(),
            primary_color: DEFAULT_PRIMARY_COLOR.to_string(),
            default_theme: Theme::System,
            created_at: now,
            updated_at: now,
            updated_by: String::new(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Partial settings write. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_theme: Option<Theme>,
}

/// A memoized aggregate in the `analytics_cache` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsCacheEntry {
    pub id: String,
    pub kind: AnalyticsKind,
    pub period: AnalyticsPeriod,
    pub value: i64,
    pub last_updated: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AnalyticsCacheEntry {
    pub fn cache_id(kind: AnalyticsKind, period: AnalyticsPeriod) -> String {
        format!("{}_{}", kind.as_str(), period.as_str())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

// =============================================================================
// Pagination
// =============================================================================

/// Continuation token pointing just past the last row of a page.
///
/// Carries the full sort key of that row so the next query can resume with a
/// row-value comparison instead of an offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Value of the primary sort column when it is not `created_at`.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub sort_value: Option<i64>,
    #[serde(rename = "c")]
    pub created_at: String,
    #[serde(rename = "i")]
    pub id: String,
}

impl Cursor {
    pub fn encode(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, DbError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| DbError::InvalidCursor(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| DbError::InvalidCursor(e.to_string()))
    }
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            next_cursor: None,
        }
    }

    /// Build a page from `limit + 1` fetched rows.
    ///
    /// The extra row only signals that more exist; it is dropped, and the
    /// cursor points at the last row actually returned.
    pub(crate) fn from_overfetch(
        mut rows: Vec<T>,
        limit: usize,
        cursor_of: impl Fn(&T) -> Cursor,
    ) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|row| cursor_of(row).encode())
        } else {
            None
        };
        Self {
            items: rows,
            has_more,
            next_cursor,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            has_more: self.has_more,
            next_cursor: self.next_cursor,
        }
    }
}

// =============================================================================
// Feature request queries
// =============================================================================

/// Conjunction of optional predicates over `feature_requests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequestFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FeatureRequestStatus>,
    /// Status must be one of these. An empty set matches nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<FeatureRequestStatus>>,
    /// Request carries at least one of these labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvoted_by: Option<String>,
    /// Case-insensitive substring of title or description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

/// Field changes for a stored feature request. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequestPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FeatureRequestStatus>,
}

impl FeatureRequestPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.status.is_none()
    }
}

/// Result of flipping a user's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpvoteOutcome {
    /// Whether the user's vote is present after the toggle.
    pub upvoted: bool,
    pub upvotes: i64,
}

/// A feature request whose denormalized counters disagree with the truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterDrift {
    pub id: String,
    pub upvotes: i64,
    pub actual_upvotes: i64,
    pub comments_count: i64,
    pub actual_comments: i64,
}
