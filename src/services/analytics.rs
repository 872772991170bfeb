// Analytics service
// Memoized platform aggregates with period-based expiry.
//
// Reads are cache-aside: a fresh entry is served as is, otherwise the value
// is recomputed and written back. When recomputing fails the stale entry is
// served, or zero if there never was one. Analytics never return an error.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{AnalyticsCacheEntry, BoardDb, FeatureRequestFilter};
use crate::error::BoardError;
use crate::types::{AnalyticsKind, AnalyticsPeriod};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersAnalytics {
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub active_users: ActiveUsersAnalytics,
    pub total_feature_requests: i64,
    pub total_comments: i64,
    pub total_labels: i64,
}

/// Serve `(kind, period)` from the cache or recompute it with `compute`.
pub fn cached_aggregate<F>(
    db: &BoardDb,
    kind: AnalyticsKind,
    period: AnalyticsPeriod,
    now: DateTime<Utc>,
    compute: F,
) -> i64
where
    F: FnOnce(&BoardDb) -> Result<i64, BoardError>,
{
    let cached = match db.get_analytics_entry(kind, period) {
        Ok(entry) => entry,
        Err(e) => {
            log::warn!("Analytics cache read failed for {}: {}", kind.as_str(), e);
            None
        }
    };
    if let Some(ref entry) = cached {
        if !entry.is_expired(now) {
            return entry.value;
        }
    }

    let value = match compute(db) {
        Ok(value) => value,
        Err(e) => {
            log::error!(
                "Failed to compute {} ({}): {}",
                kind.as_str(),
                period.as_str(),
                e
            );
            return cached.map(|entry| entry.value).unwrap_or(0);
        }
    };

    let entry = AnalyticsCacheEntry {
        id: AnalyticsCacheEntry::cache_id(kind, period),
        kind,
        period,
        value,
        last_updated: now,
        expires_at: now + period.cache_ttl(),
    };
    if let Err(e) = db.put_analytics_entry(&entry) {
        log::warn!("Failed to cache {}: {}", entry.id, e);
    }
    value
}

/// Users whose last sign-in falls inside the period's window.
pub fn active_users(db: &BoardDb, period: AnalyticsPeriod, now: DateTime<Utc>) -> i64 {
    cached_aggregate(db, AnalyticsKind::ActiveUsers, period, now, |db| {
        Ok(db.count_active_users_since(&(now - period.window()))?)
    })
}

pub fn total_requests(db: &BoardDb, now: DateTime<Utc>) -> i64 {
    cached_aggregate(
        db,
        AnalyticsKind::TotalRequests,
        AnalyticsPeriod::Daily,
        now,
        |db| Ok(db.count_feature_requests(&FeatureRequestFilter::default())?),
    )
}

pub fn total_comments(db: &BoardDb, now: DateTime<Utc>) -> i64 {
    cached_aggregate(
        db,
        AnalyticsKind::TotalComments,
        AnalyticsPeriod::Daily,
        now,
        |db| Ok(db.count_all_comments()?),
    )
}

/// Uncached; zero when the count fails.
pub fn total_labels(db: &BoardDb) -> i64 {
    db.count_labels().unwrap_or_else(|e| {
        log::error!("Failed to count labels: {}", e);
        0
    })
}

pub fn active_users_analytics(db: &BoardDb, now: DateTime<Utc>) -> ActiveUsersAnalytics {
    ActiveUsersAnalytics {
        daily: active_users(db, AnalyticsPeriod::Daily, now),
        weekly: active_users(db, AnalyticsPeriod::Weekly, now),
        monthly: active_users(db, AnalyticsPeriod::Monthly, now),
        last_updated: now,
    }
}

pub fn platform_stats(db: &BoardDb, now: DateTime<Utc>) -> PlatformStats {
    PlatformStats {
        active_users: active_users_analytics(db, now),
        total_feature_requests: total_requests(db, now),
        total_comments: total_comments(db, now),
        total_labels: total_labels(db),
    }
}
