use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// Page size used when a query does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 10;
/// Hard ceiling for any single page.
pub const MAX_PAGE_SIZE: usize = 50;

/// Runtime configuration loaded from `~/.featureboard/config.json`.
///
/// Every field is defaulted so a missing or partial file still loads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Explicit database file. Falls back to `~/.featureboard/featureboard.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    /// Emails granted admin the first time they sign in.
    #[serde(default)]
    pub bootstrap_admins: Vec<String>,
    /// OAuth client id that Google ID tokens must be issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_client_id: Option<String>,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "max_page_size")]
    pub max_page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn max_page_size() -> usize {
    MAX_PAGE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            bootstrap_admins: Vec::new(),
            google_client_id: None,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

impl Config {
    /// Clamp a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        let max = self.max_page_size.clamp(1, MAX_PAGE_SIZE);
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, max)
    }

    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.bootstrap_admins
            .iter()
            .any(|e| e.eq_ignore_ascii_case(email.trim()))
    }
}

// =============================================================================
// Feature request status
// =============================================================================

/// Lifecycle status of a feature request.
///
/// Serialized with the display strings ("In Progress", "Won't Do", ...) so
/// stored rows and JSON payloads read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureRequestStatus {
    #[serde(rename = "Open")]
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Won't Do")]
    WontDo,
    #[serde(rename = "Considering")]
    Considering,
    #[serde(rename = "Will Do")]
    WillDo,
    #[serde(rename = "Archived")]
    Archived,
}

impl FeatureRequestStatus {
    /// Statuses any contributor sees in the default workflow.
    pub const USER: [FeatureRequestStatus; 3] = [Self::Open, Self::InProgress, Self::Completed];

    /// Triage outcomes set by admins.
    pub const ADMIN: [FeatureRequestStatus; 3] = [Self::WontDo, Self::Considering, Self::WillDo];

    pub const ALL: [FeatureRequestStatus; 7] = [
        Self::Open,
        Self::InProgress,
        Self::Completed,
        Self::WontDo,
        Self::Considering,
        Self::WillDo,
        Self::Archived,
    ];

    /// Everything except Archived.
    pub const PUBLIC: [FeatureRequestStatus; 6] = [
        Self::Open,
        Self::InProgress,
        Self::Completed,
        Self::WontDo,
        Self::Considering,
        Self::WillDo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::WontDo => "Won't Do",
            Self::Considering => "Considering",
            Self::WillDo => "Will Do",
            Self::Archived => "Archived",
        }
    }

    /// Decode a stored value, defaulting unknown strings to `Open`.
    pub fn from_stored(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::Open)
    }
}

impl Default for FeatureRequestStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl fmt::Display for FeatureRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("Unknown feature request status: {}", s))
    }
}

// =============================================================================
// Listing tabs
// =============================================================================

/// Status groupings used by the listing tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TabGroup {
    All,
    Open,
    InProgress,
    Done,
    Archived,
}

impl TabGroup {
    pub const ALL: [TabGroup; 5] = [
        Self::All,
        Self::Open,
        Self::InProgress,
        Self::Done,
        Self::Archived,
    ];

    pub fn statuses(&self) -> Vec<FeatureRequestStatus> {
        use FeatureRequestStatus as S;
        match self {
            Self::All => S::PUBLIC.to_vec(),
            Self::Open => vec![S::Open, S::Considering, S::WillDo],
            Self::InProgress => vec![S::InProgress],
            Self::Done => vec![S::Completed, S::WontDo],
            Self::Archived => vec![S::Archived],
        }
    }

    pub fn admin_only(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// Tabs a user is allowed to see.
    pub fn visible(is_admin: bool) -> Vec<TabGroup> {
        Self::ALL
            .iter()
            .copied()
            .filter(|tab| is_admin || !tab.admin_only())
            .collect()
    }
}

impl Default for TabGroup {
    fn default() -> Self {
        Self::Open
    }
}

// =============================================================================
// Sorting
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Votes,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRequestSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl FeatureRequestSort {
    pub fn most_voted() -> Self {
        Self {
            field: SortField::Votes,
            direction: SortDirection::Desc,
        }
    }

    pub fn newest() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }

    pub fn oldest() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Asc,
        }
    }
}

impl Default for FeatureRequestSort {
    fn default() -> Self {
        Self::newest()
    }
}

// =============================================================================
// Theme
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
            Self::System => "system",
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::System
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("Unknown theme: {}", other)),
        }
    }
}

// =============================================================================
// Analytics
// =============================================================================

/// Aggregate tracked by the analytics cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsKind {
    ActiveUsers,
    TotalRequests,
    TotalComments,
}

impl AnalyticsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveUsers => "active_users",
            Self::TotalRequests => "total_requests",
            Self::TotalComments => "total_comments",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl AnalyticsPeriod {
    pub const ALL: [AnalyticsPeriod; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// How long a cached value for this period stays fresh.
    pub fn cache_ttl(&self) -> chrono::Duration {
        match self {
            Self::Daily => chrono::Duration::hours(1),
            Self::Weekly => chrono::Duration::hours(6),
            Self::Monthly => chrono::Duration::hours(24),
        }
    }

    /// Activity window counted as "active" for this period.
    pub fn window(&self) -> chrono::Duration {
        match self {
            Self::Daily => chrono::Duration::days(1),
            Self::Weekly => chrono::Duration::days(7),
            Self::Monthly => chrono::Duration::days(30),
        }
    }
}

impl FromStr for AnalyticsKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active_users" => Ok(Self::ActiveUsers),
            "total_requests" => Ok(Self::TotalRequests),
            "total_comments" => Ok(Self::TotalComments),
            other => Err(format!("Unknown analytics type: {}", other)),
        }
    }
}

impl FromStr for AnalyticsPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("Unknown analytics period: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_display_strings() {
        let json = serde_json::to_string(&FeatureRequestStatus::WontDo).unwrap();
        assert_eq!(json, "\"Won't Do\"");
        let back: FeatureRequestStatus = serde_json::from_str("\"In Progress\"").unwrap();
        assert_eq!(back, FeatureRequestStatus::InProgress);
    }

    #[test]
    fn unknown_stored_status_defaults_to_open() {
        assert_eq!(
            FeatureRequestStatus::from_stored(Some("Shipped")),
            FeatureRequestStatus::Open
        );
        assert_eq!(FeatureRequestStatus::from_stored(None), FeatureRequestStatus::Open);
        assert_eq!(
            FeatureRequestStatus::from_stored(Some("will do")),
            FeatureRequestStatus::WillDo
        );
    }

    #[test]
    fn all_tab_excludes_archived() {
        let statuses = TabGroup::All.statuses();
        assert_eq!(statuses.len(), 6);
        assert!(!statuses.contains(&FeatureRequestStatus::Archived));
    }

    #[test]
    fn archived_tab_is_admin_only() {
        assert!(!TabGroup::visible(false).contains(&TabGroup::Archived));
        assert!(TabGroup::visible(true).contains(&TabGroup::Archived));
    }

    #[test]
    fn page_size_is_clamped() {
        let config = Config::default();
        assert_eq!(config.page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(config.page_size(Some(0)), 1);
        assert_eq!(config.page_size(Some(500)), MAX_PAGE_SIZE);
    }

    #[test]
    fn config_loads_from_partial_json() {
        let config: Config = serde_json::from_str(r#"{"bootstrapAdmins": ["Ops@Example.com"]}"#).unwrap();
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
        assert!(config.is_bootstrap_admin("ops@example.com"));
        assert!(!config.is_bootstrap_admin("someone@example.com"));
    }

    #[test]
    fn analytics_ttls_follow_period() {
        assert_eq!(AnalyticsPeriod::Daily.cache_ttl(), chrono::Duration::hours(1));
        assert_eq!(AnalyticsPeriod::Weekly.cache_ttl(), chrono::Duration::hours(6));
        assert_eq!(AnalyticsPeriod::Monthly.cache_ttl(), chrono::Duration::hours(24));
    }
}
