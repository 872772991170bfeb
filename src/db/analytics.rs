use super::*;

use crate::types::{AnalyticsKind, AnalyticsPeriod};

impl BoardDb {
    // =========================================================================
    // Analytics cache
    // =========================================================================

    /// Cached aggregate for `(kind, period)`, fresh or not.
    pub fn get_analytics_entry(
        &self,
        kind: AnalyticsKind,
        period: AnalyticsPeriod,
    ) -> Result<Option<AnalyticsCacheEntry>, DbError> {
        let id = AnalyticsCacheEntry::cache_id(kind, period);
        let mut stmt = self.conn.prepare(
            "SELECT value, last_updated, expires_at FROM analytics_cache WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            let updated_raw: Option<String> = row.get(1)?;
            let expires_raw: Option<String> = row.get(2)?;
            let last_updated = parse_timestamp(updated_raw.as_deref());
            // Without a stored expiry, treat the entry as already stale.
            let expires_at = match expires_raw {
                Some(raw) => parse_timestamp(Some(&raw)),
                None => last_updated,
            };
            Ok(AnalyticsCacheEntry {
                id: id.clone(),
                kind,
                period,
                value: row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                last_updated,
                expires_at,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn put_analytics_entry(&self, entry: &AnalyticsCacheEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO analytics_cache (id, kind, period, value, last_updated, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                value = excluded.value,
                last_updated = excluded.last_updated,
                expires_at = excluded.expires_at",
            params![
                entry.id,
                entry.kind.as_str(),
                entry.period.as_str(),
                entry.value,
                to_timestamp(&entry.last_updated),
                to_timestamp(&entry.expires_at),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::{test_db, ts};
    use super::*;

    #[test]
    fn test_put_then_overwrite_entry() {
        let db = test_db();
        assert!(db
            .get_analytics_entry(AnalyticsKind::TotalRequests, AnalyticsPeriod::Daily)
            .unwrap()
            .is_none());

        let mut entry = AnalyticsCacheEntry {
            id: AnalyticsCacheEntry::cache_id(AnalyticsKind::TotalRequests, AnalyticsPeriod::Daily),
            kind: AnalyticsKind::TotalRequests,
            period: AnalyticsPeriod::Daily,
            value: 7,
            last_updated: ts(0),
            expires_at: ts(60),
        };
        db.put_analytics_entry(&entry).unwrap();
        entry.value = 9;
        entry.expires_at = ts(120);
        db.put_analytics_entry(&entry).unwrap();

        let loaded = db
            .get_analytics_entry(AnalyticsKind::TotalRequests, AnalyticsPeriod::Daily)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, entry);
    }
}
