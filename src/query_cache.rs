//! Client-state query cache with stale times, prefix invalidation and
//! optimistic updates.
//!
//! Values are stored type-erased under hierarchical [`QueryKey`]s. Reads go
//! through [`QueryCache::fetch`], which serves fresh entries and otherwise
//! runs the fetcher under the read retry policy. Mutations are never retried;
//! [`run_optimistic`] applies a speculative value, rolls it back on failure
//! and invalidates the affected keys either way.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::BoardError;

// =============================================================================
// Keys
// =============================================================================

/// Hierarchical cache key. A key matches every key it is a prefix of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Key families per entity.
pub mod keys {
    use super::QueryKey;
    use serde::Serialize;

    /// Stable segment for structured query parameters.
    pub fn params_segment(params: &impl Serialize) -> String {
        serde_json::to_string(params).unwrap_or_default()
    }

    pub mod feature_requests {
        use super::*;

        pub fn all() -> QueryKey {
            QueryKey::new(["featureRequests"])
        }
        pub fn lists() -> QueryKey {
            all().child("list")
        }
        pub fn list(params: &impl Serialize) -> QueryKey {
            lists().child(params_segment(params))
        }
        pub fn details() -> QueryKey {
            all().child("detail")
        }
        pub fn detail(id: &str) -> QueryKey {
            details().child(id)
        }
        pub fn searches() -> QueryKey {
            all().child("search")
        }
        pub fn search(term: &str, params: &impl Serialize) -> QueryKey {
            searches().child(term).child(params_segment(params))
        }
        pub fn tab_counts(is_admin: bool) -> QueryKey {
            all().child("tabCounts").child(if is_admin { "admin" } else { "public" })
        }
    }

    pub mod comments {
        use super::*;

        pub fn all() -> QueryKey {
            QueryKey::new(["comments"])
        }
        pub fn lists() -> QueryKey {
            all().child("list")
        }
        pub fn list(params: &impl Serialize) -> QueryKey {
            lists().child(params_segment(params))
        }
        pub fn detail(id: &str) -> QueryKey {
            all().child("detail").child(id)
        }
        pub fn count(feature_request_id: &str) -> QueryKey {
            all().child("count").child(feature_request_id)
        }
    }

    pub mod users {
        use super::*;

        pub fn all() -> QueryKey {
            QueryKey::new(["users"])
        }
        pub fn lists() -> QueryKey {
            all().child("list")
        }
        pub fn list(params: &impl Serialize) -> QueryKey {
            lists().child(params_segment(params))
        }
        pub fn admins() -> QueryKey {
            all().child("admins")
        }
        pub fn admin_emails() -> QueryKey {
            all().child("adminEmails")
        }
        pub fn is_admin(email: &str) -> QueryKey {
            all().child("isAdmin").child(email.to_lowercase())
        }
        pub fn detail(uid: &str) -> QueryKey {
            all().child("detail").child(uid)
        }
        pub fn feature_requests(uid: &str, params: &impl Serialize) -> QueryKey {
            all()
                .child("featureRequests")
                .child(uid)
                .child(params_segment(params))
        }
        pub fn voted_feature_requests(uid: &str, params: &impl Serialize) -> QueryKey {
            all()
                .child("votedFeatureRequests")
                .child(uid)
                .child(params_segment(params))
        }
        pub fn stats(uid: &str) -> QueryKey {
            all().child("stats").child(uid)
        }
    }

    pub mod labels {
        use super::*;

        pub fn all() -> QueryKey {
            QueryKey::new(["labels"])
        }
        pub fn lists() -> QueryKey {
            all().child("list")
        }
        pub fn detail(id: &str) -> QueryKey {
            all().child("detail").child(id)
        }
    }

    pub mod settings {
        use super::*;

        pub fn all() -> QueryKey {
            QueryKey::new(["settings"])
        }
        pub fn app() -> QueryKey {
            all().child("app")
        }
    }

    pub mod analytics {
        use super::*;

        pub fn all() -> QueryKey {
            QueryKey::new(["analytics"])
        }
        pub fn active_users_all() -> QueryKey {
            all().child("activeUsers")
        }
        pub fn active_users(period: &str) -> QueryKey {
            active_users_all().child(period)
        }
        pub fn total_feature_requests() -> QueryKey {
            all().child("totalFeatureRequests")
        }
        pub fn total_comments() -> QueryKey {
            all().child("totalComments")
        }
        pub fn total_labels() -> QueryKey {
            all().child("totalLabels")
        }
        pub fn platform_stats() -> QueryKey {
            all().child("platformStats")
        }
    }
}

/// Stale times per query family.
pub mod stale {
    use std::time::Duration;

    const MINUTE: u64 = 60;

    pub const DEFAULT: Duration = Duration::from_secs(5 * MINUTE);
    pub const GC: Duration = Duration::from_secs(10 * MINUTE);
    pub const FEATURE_REQUESTS: Duration = Duration::from_secs(2 * MINUTE);
    pub const SEARCH: Duration = Duration::from_secs(MINUTE);
    pub const COMMENTS: Duration = Duration::from_secs(MINUTE);
    pub const COMMENT_COUNT: Duration = Duration::from_secs(2 * MINUTE);
    pub const USERS: Duration = Duration::from_secs(5 * MINUTE);
    pub const USER_REQUESTS: Duration = Duration::from_secs(2 * MINUTE);
    pub const ADMIN_STATUS: Duration = Duration::from_secs(10 * MINUTE);
    pub const LABELS: Duration = Duration::from_secs(10 * MINUTE);
    pub const SETTINGS: Duration = Duration::from_secs(5 * MINUTE);
    pub const ANALYTICS: Duration = Duration::from_secs(5 * MINUTE);
    pub const TOTALS: Duration = Duration::from_secs(10 * MINUTE);
    pub const LABEL_TOTALS: Duration = Duration::from_secs(30 * MINUTE);
}

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Same retry count, no waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling each time.
    fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Only transient failures (a busy store, identity provider trouble) are
/// retried; everything else is final on the first attempt.
fn should_retry_read(err: &BoardError) -> bool {
    err.is_retryable()
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Clone)]
struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
    last_access: Instant,
    stale_time: Duration,
    invalidated: bool,
}

impl Entry {
    fn new<T: Send + Sync + 'static>(value: T, stale_time: Duration) -> Self {
        let now = Instant::now();
        Self {
            value: Arc::new(value),
            fetched_at: now,
            last_access: now,
            stale_time,
            invalidated: false,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        !self.invalidated && now.saturating_duration_since(self.fetched_at) < self.stale_time
    }
}

pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    retry: RetryPolicy,
    gc_time: Duration,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl QueryCache {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retry,
            gc_time: stale::GC,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Cached value regardless of freshness.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &QueryKey) -> Option<T> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.last_access = Instant::now();
        entry.value.downcast_ref::<T>().cloned()
    }

    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        self.entries
            .lock()
            .get(key)
            .map(|e| e.is_fresh(Instant::now()))
            .unwrap_or(false)
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: QueryKey, value: T, stale_time: Duration) {
        self.entries.lock().insert(key, Entry::new(value, stale_time));
    }

    /// Replace an existing value in place. Returns `false` if there was no
    /// entry of type `T` under `key`.
    pub fn update<T, F>(&self, key: &QueryKey, f: F) -> bool
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> T,
    {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let Some(current) = entry.value.downcast_ref::<T>() else {
            return false;
        };
        entry.value = Arc::new(f(current));
        true
    }

    /// Serve a fresh cached value or fetch, store and return a new one.
    pub fn fetch<T, F>(&self, key: &QueryKey, stale_time: Duration, mut fetcher: F) -> Result<T, BoardError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Result<T, BoardError>,
    {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(key) {
                let now = Instant::now();
                if entry.is_fresh(now) {
                    if let Some(value) = entry.value.downcast_ref::<T>() {
                        entry.last_access = now;
                        return Ok(value.clone());
                    }
                }
            }
        }

        let mut retry = 0;
        loop {
            match fetcher() {
                Ok(value) => {
                    self.set(key.clone(), value.clone(), stale_time);
                    return Ok(value);
                }
                Err(e) if retry < self.retry.max_retries && should_retry_read(&e) => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    log::warn!(
                        "query {} retry {}/{} after error: {} (sleep {:?})",
                        key,
                        retry,
                        self.retry.max_retries,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Mark every entry under `prefix` stale. Values stay readable until
    /// the next fetch replaces them.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries.lock().iter_mut() {
            if key.starts_with(prefix) {
                entry.invalidated = true;
                count += 1;
            }
        }
        count
    }

    /// Drop every entry under `prefix`.
    pub fn remove(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Evict entries nobody has read for longer than the gc time.
    pub fn gc(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let gc_time = self.gc_time;
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_access) <= gc_time);
        before - entries.len()
    }

    /// Apply a speculative value to `key`, keeping a snapshot to roll back
    /// to. Nothing is applied when no entry of type `T` exists.
    pub fn optimistic<T, F>(&self, key: &QueryKey, apply: F) -> OptimisticUpdate<'_>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> T,
    {
        let mut entries = self.entries.lock();
        let previous = entries.get(key).cloned();
        let applied = match entries.get_mut(key) {
            Some(entry) => match entry.value.downcast_ref::<T>() {
                Some(current) => {
                    entry.value = Arc::new(apply(current));
                    true
                }
                None => false,
            },
            None => false,
        };
        OptimisticUpdate {
            cache: self,
            key: key.clone(),
            previous: if applied { previous } else { None },
            settled: !applied,
        }
    }
}

/// Snapshot guard returned by [`QueryCache::optimistic`].
///
/// Dropping the guard without calling [`commit`](Self::commit) rolls back.
pub struct OptimisticUpdate<'a> {
    cache: &'a QueryCache,
    key: QueryKey,
    previous: Option<Entry>,
    settled: bool,
}

impl OptimisticUpdate<'_> {
    pub fn commit(mut self) {
        self.settled = true;
    }

    pub fn rollback(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        let mut entries = self.cache.entries.lock();
        match self.previous.take() {
            Some(entry) => {
                entries.insert(self.key.clone(), entry);
            }
            None => {
                entries.remove(&self.key);
            }
        }
    }
}

impl Drop for OptimisticUpdate<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Snapshot, apply, run the mutation once, roll back on error, and
/// invalidate `key` plus every `settle` prefix whatever the outcome.
pub fn run_optimistic<T, R, A, M>(
    cache: &QueryCache,
    key: &QueryKey,
    apply: A,
    mutation: M,
    settle: &[QueryKey],
) -> Result<R, BoardError>
where
    T: Clone + Send + Sync + 'static,
    A: FnOnce(&T) -> T,
    M: FnOnce() -> Result<R, BoardError>,
{
    let update = cache.optimistic(key, apply);
    let result = mutation();
    match result {
        Ok(_) => update.commit(),
        Err(ref e) => {
            log::warn!("Mutation on {} failed, rolling back: {}", key, e);
            update.rollback();
        }
    }
    cache.invalidate(key);
    for prefix in settle {
        cache.invalidate(prefix);
    }
    result
}
