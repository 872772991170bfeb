//! Request-scoped command handlers.
//!
//! Each handler takes the shared [`AppState`] and the caller's
//! [`AuthContext`]. Reads go through the query cache. Mutations settle the
//! cache keys they touch and report through the notice queue. Every failure
//! leaves as a serializable [`CommandError`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::auth::{AuthContext, IdentityProvider};
use crate::db::{
    AdminEmail, AppSettings, BoardDb, Comment, FeatureRequest, Label, Page, SettingsUpdate,
    UpvoteOutcome, User,
};
use crate::error::{BoardError, CommandError};
use crate::notification::Notice;
use crate::query_cache::{keys, run_optimistic, stale, QueryKey};
use crate::services::analytics::{self, ActiveUsersAnalytics, PlatformStats};
use crate::services::comments::{self, CommentQuery, CreateComment};
use crate::services::feature_requests::{
    self, CreateFeatureRequest, FeatureRequestQuery, TabCount, UpdateFeatureRequest,
};
use crate::services::labels::{self, CreateLabel, UpdateLabel};
use crate::services::settings;
use crate::services::users::{self, UserStats};
use crate::state::{self, AppState};
use crate::types::{AnalyticsPeriod, Config, MAX_PAGE_SIZE};

const READ_BUDGET_MS: u128 = 100;
const WRITE_BUDGET_MS: u128 = 250;
const SIGN_IN_BUDGET_MS: u128 = 2000;

fn log_command_latency(command: &str, started: Instant, budget_ms: u128) {
    let elapsed_ms = started.elapsed().as_millis();
    if elapsed_ms > budget_ms {
        log::warn!(
            "{} exceeded latency budget: {}ms > {}ms",
            command,
            elapsed_ms,
            budget_ms
        );
    } else {
        log::debug!("{} completed in {}ms", command, elapsed_ms);
    }
}

/// Run a read. Failures are logged and returned, no notice.
fn read<T>(
    command: &str,
    f: impl FnOnce() -> Result<T, BoardError>,
) -> Result<T, CommandError> {
    let started = Instant::now();
    let result = f();
    log_command_latency(command, started, READ_BUDGET_MS);
    result.map_err(|e| {
        log::warn!("{} failed: {}", command, e);
        CommandError::from(e)
    })
}

/// Run a mutation. Failures always surface as a notice, successes only
/// when `success` is non-empty.
fn write<T>(
    state: &AppState,
    command: &str,
    success: &str,
    failure: &str,
    f: impl FnOnce() -> Result<T, BoardError>,
) -> Result<T, CommandError> {
    let started = Instant::now();
    let result = f();
    log_command_latency(command, started, WRITE_BUDGET_MS);
    match result {
        Ok(value) => {
            if !success.is_empty() {
                state.notices.success("Success", success);
            }
            Ok(value)
        }
        Err(e) => {
            let err = CommandError::from(&e);
            state.notices.error(failure, &err);
            Err(err)
        }
    }
}

/// Cache-aside read against the open database.
fn cached<T, F>(
    state: &AppState,
    key: &QueryKey,
    stale_time: Duration,
    fetch: F,
) -> Result<T, BoardError>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&BoardDb) -> Result<T, BoardError>,
{
    state.cache.fetch(key, stale_time, || state.with_db(&fetch))
}

// =============================================================================
// Feature requests
// =============================================================================

/// Resolve a page size against the configured limits. `fallback` stands in
/// for the configured default when the caller asked for none.
fn page_limit(state: &AppState, requested: Option<usize>, fallback: Option<usize>) -> Option<usize> {
    Some(state.config().page_size(requested.or(fallback)))
}

/// Apply the configured page size so equal requests share a cache key.
fn normalize_query(state: &AppState, mut query: FeatureRequestQuery) -> FeatureRequestQuery {
    query.limit = page_limit(state, query.limit, None);
    query
}

pub fn get_feature_requests(
    state: &AppState,
    auth: &AuthContext,
    query: FeatureRequestQuery,
) -> Result<Page<FeatureRequest>, CommandError> {
    read("get_feature_requests", || {
        feature_requests::ensure_tab_visible(auth, query.tab)?;
        let query = normalize_query(state, query);
        cached(
            state,
            &keys::feature_requests::list(&query),
            stale::FEATURE_REQUESTS,
            |db| feature_requests::list(db, auth, &query),
        )
    })
}

pub fn get_feature_request(
    state: &AppState,
    id: &str,
) -> Result<Option<FeatureRequest>, CommandError> {
    read("get_feature_request", || {
        cached(
            state,
            &keys::feature_requests::detail(id),
            stale::FEATURE_REQUESTS,
            |db| feature_requests::get(db, id),
        )
    })
}

pub fn search_feature_requests(
    state: &AppState,
    auth: &AuthContext,
    term: &str,
    query: FeatureRequestQuery,
) -> Result<Page<FeatureRequest>, CommandError> {
    read("search_feature_requests", || {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Page::empty());
        }
        feature_requests::ensure_tab_visible(auth, query.tab)?;
        let query = normalize_query(state, query);
        cached(
            state,
            &keys::feature_requests::search(term, &query),
            stale::SEARCH,
            |db| feature_requests::search(db, auth, term, &query),
        )
    })
}

pub fn get_tab_counts(state: &AppState, auth: &AuthContext) -> Result<Vec<TabCount>, CommandError> {
    let is_admin = auth.is_admin();
    read("get_tab_counts", || {
        cached(
            state,
            &keys::feature_requests::tab_counts(is_admin),
            stale::FEATURE_REQUESTS,
            |db| feature_requests::tab_counts(db, is_admin),
        )
    })
}

/// Returns the new request's id.
pub fn create_feature_request(
    state: &AppState,
    auth: &AuthContext,
    input: CreateFeatureRequest,
) -> Result<String, CommandError> {
    write(
        state,
        "create_feature_request",
        "Feature request created successfully!",
        "Failed to create feature request",
        || {
            let id = state.with_db(|db| feature_requests::create(db, auth, &input))?;
            state.cache.invalidate(&keys::feature_requests::all());
            state.cache.invalidate(&keys::users::all());
            state
                .cache
                .invalidate(&keys::analytics::total_feature_requests());
            Ok(id)
        },
    )
}

pub fn update_feature_request(
    state: &AppState,
    auth: &AuthContext,
    id: &str,
    input: UpdateFeatureRequest,
) -> Result<FeatureRequest, CommandError> {
    write(
        state,
        "update_feature_request",
        "Feature request updated successfully!",
        "Failed to update feature request",
        || {
            let updated = state.with_db(|db| feature_requests::update(db, auth, id, &input))?;
            state.cache.invalidate(&keys::feature_requests::all());
            state.cache.set(
                keys::feature_requests::detail(id),
                Some(updated.clone()),
                stale::FEATURE_REQUESTS,
            );
            Ok(updated)
        },
    )
}

pub fn delete_feature_request(
    state: &AppState,
    auth: &AuthContext,
    id: &str,
) -> Result<(), CommandError> {
    write(
        state,
        "delete_feature_request",
        "Feature request deleted successfully!",
        "Failed to delete feature request",
        || {
            state.with_db(|db| feature_requests::delete(db, auth, id))?;
            state.cache.remove(&keys::feature_requests::detail(id));
            state.cache.invalidate(&keys::feature_requests::all());
            state.cache.remove(&keys::comments::count(id));
            state.cache.invalidate(&keys::users::all());
            state
                .cache
                .invalidate(&keys::analytics::total_feature_requests());
            Ok(())
        },
    )
}

/// Flip `uid`'s membership in a cached request, never going below zero votes.
fn flip_vote(request: &FeatureRequest, uid: &str) -> FeatureRequest {
    let mut next = request.clone();
    if next.has_upvoted(uid) {
        next.upvoted_by.retain(|voter| voter != uid);
        next.upvotes = (next.upvotes - 1).max(0);
    } else {
        next.upvoted_by.push(uid.to_string());
        next.upvotes += 1;
    }
    next
}

/// Toggle the caller's vote, showing the result in the cache before the
/// store confirms it.
pub fn toggle_upvote(
    state: &AppState,
    auth: &AuthContext,
    id: &str,
) -> Result<UpvoteOutcome, CommandError> {
    write(state, "toggle_upvote", "", "Failed to update vote", || {
        let uid = auth.require_user()?.uid.clone();
        let settle = [
            keys::feature_requests::lists(),
            keys::feature_requests::searches(),
            keys::users::all(),
        ];
        run_optimistic(
            &state.cache,
            &keys::feature_requests::detail(id),
            |current: &Option<FeatureRequest>| current.as_ref().map(|fr| flip_vote(fr, &uid)),
            || state.with_db(|db| feature_requests::toggle_upvote(db, auth, id)),
            &settle,
        )
    })
}

// =============================================================================
// Comments
// =============================================================================

pub fn get_comments(state: &AppState, mut query: CommentQuery) -> Result<Page<Comment>, CommandError> {
    query.limit = page_limit(state, query.limit, Some(comments::COMMENT_PAGE_SIZE));
    read("get_comments", || {
        cached(state, &keys::comments::list(&query), stale::COMMENTS, |db| {
            comments::list(db, &query)
        })
    })
}

pub fn get_comment(state: &AppState, id: &str) -> Result<Option<Comment>, CommandError> {
    read("get_comment", || {
        cached(state, &keys::comments::detail(id), stale::COMMENTS, |db| {
            comments::get(db, id)
        })
    })
}

pub fn get_comment_count(state: &AppState, feature_request_id: &str) -> Result<i64, CommandError> {
    read("get_comment_count", || {
        cached(
            state,
            &keys::comments::count(feature_request_id),
            stale::COMMENT_COUNT,
            |db| comments::count_for(db, feature_request_id),
        )
    })
}

/// Keys a comment mutation on `feature_request_id` leaves stale.
fn comment_settle_keys(feature_request_id: &str, author_id: &str) -> [QueryKey; 5] {
    [
        keys::comments::lists(),
        keys::feature_requests::detail(feature_request_id),
        keys::feature_requests::lists(),
        keys::users::stats(author_id),
        keys::analytics::total_comments(),
    ]
}

/// Returns the new comment's id.
pub fn create_comment(
    state: &AppState,
    auth: &AuthContext,
    input: CreateComment,
) -> Result<String, CommandError> {
    write(
        state,
        "create_comment",
        "Comment added successfully!",
        "Failed to add comment",
        || {
            let uid = auth.require_user()?.uid.clone();
            run_optimistic(
                &state.cache,
                &keys::comments::count(&input.feature_request_id),
                |count: &i64| count + 1,
                || state.with_db(|db| comments::create(db, auth, &input)),
                &comment_settle_keys(&input.feature_request_id, &uid),
            )
        },
    )
}

pub fn update_comment(
    state: &AppState,
    auth: &AuthContext,
    id: &str,
    content: &str,
) -> Result<Comment, CommandError> {
    write(
        state,
        "update_comment",
        "Comment updated successfully!",
        "Failed to update comment",
        || {
            let updated = state.with_db(|db| comments::update(db, auth, id, content))?;
            state.cache.invalidate(&keys::comments::lists());
            state.cache.set(
                keys::comments::detail(id),
                Some(updated.clone()),
                stale::COMMENTS,
            );
            Ok(updated)
        },
    )
}

pub fn delete_comment(state: &AppState, auth: &AuthContext, id: &str) -> Result<(), CommandError> {
    write(
        state,
        "delete_comment",
        "Comment deleted successfully!",
        "Failed to delete comment",
        || {
            auth.require_user()?;
            let existing = state
                .with_db(|db| comments::get(db, id))?
                .ok_or_else(|| BoardError::not_found("Comment", id))?;
            run_optimistic(
                &state.cache,
                &keys::comments::count(&existing.feature_request_id),
                |count: &i64| (count - 1).max(0),
                || state.with_db(|db| comments::delete(db, auth, id)),
                &comment_settle_keys(&existing.feature_request_id, &existing.author_id),
            )?;
            state.cache.remove(&keys::comments::detail(id));
            Ok(())
        },
    )
}

// =============================================================================
// Labels
// =============================================================================

pub fn get_labels(state: &AppState) -> Result<Vec<Label>, CommandError> {
    read("get_labels", || {
        cached(state, &keys::labels::lists(), stale::LABELS, labels::list)
    })
}

pub fn get_label(state: &AppState, id: &str) -> Result<Option<Label>, CommandError> {
    read("get_label", || {
        cached(state, &keys::labels::detail(id), stale::LABELS, |db| {
            labels::get(db, id)
        })
    })
}

pub fn create_label(
    state: &AppState,
    auth: &AuthContext,
    input: CreateLabel,
) -> Result<Label, CommandError> {
    write(
        state,
        "create_label",
        "Label created successfully!",
        "Failed to create label",
        || {
            let label = state.with_db(|db| labels::create(db, auth, &input))?;
            state.cache.invalidate(&keys::labels::all());
            state.cache.invalidate(&keys::analytics::total_labels());
            Ok(label)
        },
    )
}

pub fn update_label(
    state: &AppState,
    auth: &AuthContext,
    id: &str,
    input: UpdateLabel,
) -> Result<Label, CommandError> {
    write(
        state,
        "update_label",
        "Label updated successfully!",
        "Failed to update label",
        || {
            let label = state.with_db(|db| labels::update(db, auth, id, &input))?;
            state.cache.invalidate(&keys::labels::lists());
            state
                .cache
                .set(keys::labels::detail(id), Some(label.clone()), stale::LABELS);
            Ok(label)
        },
    )
}

/// Also drops the label from every cached feature request.
pub fn delete_label(state: &AppState, auth: &AuthContext, id: &str) -> Result<(), CommandError> {
    write(
        state,
        "delete_label",
        "Label deleted successfully!",
        "Failed to delete label",
        || {
            state.with_db(|db| labels::delete(db, auth, id))?;
            state.cache.remove(&keys::labels::detail(id));
            state.cache.invalidate(&keys::labels::all());
            state.cache.invalidate(&keys::feature_requests::all());
            state.cache.invalidate(&keys::analytics::total_labels());
            Ok(())
        },
    )
}

// =============================================================================
// Sign-in
// =============================================================================

/// Authenticate a credential and mirror the identity into `users`.
///
/// The store work runs on a blocking task so the provider's runtime stays
/// free.
pub async fn sign_in(
    state: Arc<AppState>,
    provider: &dyn IdentityProvider,
    credential: &str,
) -> Result<AuthContext, CommandError> {
    let started = Instant::now();
    let result = sign_in_inner(Arc::clone(&state), provider, credential).await;
    log_command_latency("sign_in", started, SIGN_IN_BUDGET_MS);

    match result {
        Ok(auth) => {
            state.cache.invalidate(&keys::users::all());
            if let Some(user) = auth.user() {
                let name = crate::services::author_name(user);
                state
                    .notices
                    .success("Signed in", &format!("Welcome, {}!", name));
            }
            Ok(auth)
        }
        Err(e) => {
            let err = CommandError::from(&e);
            state.notices.error("Failed to sign in", &err);
            Err(err)
        }
    }
}

async fn sign_in_inner(
    state: Arc<AppState>,
    provider: &dyn IdentityProvider,
    credential: &str,
) -> Result<AuthContext, BoardError> {
    let identity = provider.authenticate(credential).await?;
    let bootstrap_admins = state.config().bootstrap_admins;

    tokio::task::spawn_blocking(move || {
        state.with_db(|db| {
            let user = users::upsert_on_login(db, &identity, &bootstrap_admins)?;
            users::auth_context(db, user)
        })
    })
    .await
    .map_err(|e| BoardError::Unavailable(format!("Sign-in task failed: {}", e)))?
}

/// Drop everything cached for the departing user.
pub fn sign_out(state: &AppState, auth: &AuthContext) -> AuthContext {
    if let Some(uid) = auth.uid() {
        state.cache.remove(&keys::users::all());
        log::info!("User {} signed out", uid);
        state.notices.success("Signed out", "You have been signed out.");
    }
    AuthContext::signed_out()
}

/// Rebuild the context for a returning session. Unknown users are signed out.
pub fn auth_context_for(state: &AppState, uid: &str) -> Result<AuthContext, CommandError> {
    read("auth_context_for", || {
        state.with_db(|db| match users::get(db, uid)? {
            Some(user) => users::auth_context(db, user),
            None => Ok(AuthContext::signed_out()),
        })
    })
}

// =============================================================================
// Users
// =============================================================================

#[derive(Serialize)]
struct PageParams<'a> {
    limit: Option<usize>,
    cursor: Option<&'a str>,
}

pub fn check_is_admin(state: &AppState, email: &str) -> Result<bool, CommandError> {
    let email = email.trim().to_lowercase();
    read("check_is_admin", || {
        cached(
            state,
            &keys::users::is_admin(&email),
            stale::ADMIN_STATUS,
            |db| users::check_is_admin(db, &email),
        )
    })
}

pub fn get_user(state: &AppState, uid: &str) -> Result<Option<User>, CommandError> {
    read("get_user", || {
        cached(state, &keys::users::detail(uid), stale::USERS, |db| {
            users::get(db, uid)
        })
    })
}

pub fn get_users(
    state: &AppState,
    auth: &AuthContext,
    limit: Option<usize>,
    cursor: Option<&str>,
) -> Result<Page<User>, CommandError> {
    let limit = page_limit(state, limit, None);
    read("get_users", || {
        auth.require_admin()?;
        let params = PageParams { limit, cursor };
        cached(state, &keys::users::list(&params), stale::USERS, |db| {
            users::list_users(db, auth, limit, cursor)
        })
    })
}

pub fn get_admin_users(state: &AppState, auth: &AuthContext) -> Result<Vec<User>, CommandError> {
    read("get_admin_users", || {
        auth.require_admin()?;
        cached(state, &keys::users::admins(), stale::USERS, |db| {
            users::list_admins(db, auth)
        })
    })
}

pub fn set_user_admin_status(
    state: &AppState,
    auth: &AuthContext,
    uid: &str,
    is_admin: bool,
) -> Result<User, CommandError> {
    let success = if is_admin {
        "User promoted to administrator."
    } else {
        "Administrator access removed."
    };
    write(
        state,
        "set_user_admin_status",
        success,
        "Failed to update user",
        || {
            let user = state.with_db(|db| users::set_admin_status(db, auth, uid, is_admin))?;
            state.cache.invalidate(&keys::users::all());
            Ok(user)
        },
    )
}

pub fn get_admin_emails(
    state: &AppState,
    auth: &AuthContext,
) -> Result<Vec<AdminEmail>, CommandError> {
    read("get_admin_emails", || {
        auth.require_admin()?;
        cached(state, &keys::users::admin_emails(), stale::USERS, |db| {
            users::list_admin_emails(db, auth)
        })
    })
}

/// Returns `false` when the email was already listed.
pub fn add_admin_email(
    state: &AppState,
    auth: &AuthContext,
    email: &str,
) -> Result<bool, CommandError> {
    write(
        state,
        "add_admin_email",
        "Admin email added.",
        "Failed to add admin email",
        || {
            let added = state.with_db(|db| users::add_admin_email(db, auth, email))?;
            state.cache.invalidate(&keys::users::all());
            Ok(added)
        },
    )
}

pub fn remove_admin_email(
    state: &AppState,
    auth: &AuthContext,
    email: &str,
) -> Result<bool, CommandError> {
    write(
        state,
        "remove_admin_email",
        "Admin email removed.",
        "Failed to remove admin email",
        || {
            let removed = state.with_db(|db| users::remove_admin_email(db, auth, email))?;
            state.cache.invalidate(&keys::users::all());
            Ok(removed)
        },
    )
}

pub fn get_user_feature_requests(
    state: &AppState,
    uid: &str,
    limit: Option<usize>,
    cursor: Option<&str>,
) -> Result<Page<FeatureRequest>, CommandError> {
    let limit = page_limit(state, limit, Some(users::PROFILE_PAGE_SIZE));
    read("get_user_feature_requests", || {
        let params = PageParams { limit, cursor };
        cached(
            state,
            &keys::users::feature_requests(uid, &params),
            stale::USER_REQUESTS,
            |db| users::user_feature_requests(db, uid, limit, cursor),
        )
    })
}

pub fn get_user_voted_feature_requests(
    state: &AppState,
    uid: &str,
    limit: Option<usize>,
    cursor: Option<&str>,
) -> Result<Page<FeatureRequest>, CommandError> {
    let limit = page_limit(state, limit, None);
    read("get_user_voted_feature_requests", || {
        let params = PageParams { limit, cursor };
        cached(
            state,
            &keys::users::voted_feature_requests(uid, &params),
            stale::USER_REQUESTS,
            |db| users::user_voted_feature_requests(db, uid, limit, cursor),
        )
    })
}

pub fn get_user_stats(state: &AppState, uid: &str) -> Result<UserStats, CommandError> {
    read("get_user_stats", || {
        cached(state, &keys::users::stats(uid), stale::USERS, |db| {
            users::user_stats(db, uid)
        })
    })
}

// =============================================================================
// Settings
// =============================================================================

pub fn get_settings(state: &AppState) -> Result<AppSettings, CommandError> {
    read("get_settings", || {
        let settings = cached(state, &keys::settings::app(), stale::SETTINGS, |db| {
            Ok(settings::get(db))
        })?;
        state.settings.replace(settings.clone());
        Ok(settings)
    })
}

fn publish_settings(state: &AppState, settings: &AppSettings) {
    state.settings.replace(settings.clone());
    state
        .cache
        .set(keys::settings::app(), settings.clone(), stale::SETTINGS);
}

pub fn update_settings(
    state: &AppState,
    auth: &AuthContext,
    input: SettingsUpdate,
) -> Result<AppSettings, CommandError> {
    write(
        state,
        "update_settings",
        "Settings saved successfully!",
        "Failed to save settings",
        || {
            let updated = state.with_db(|db| settings::update(db, auth, &input))?;
            publish_settings(state, &updated);
            Ok(updated)
        },
    )
}

pub fn reset_settings(state: &AppState, auth: &AuthContext) -> Result<AppSettings, CommandError> {
    write(
        state,
        "reset_settings",
        "Settings reset to defaults.",
        "Failed to reset settings",
        || {
            let defaults = state.with_db(|db| settings::reset(db, auth))?;
            publish_settings(state, &defaults);
            Ok(defaults)
        },
    )
}

/// Theme color of the current settings as `H S% L%`.
pub fn get_primary_color_hsl(state: &AppState) -> String {
    settings::primary_color_hsl(&state.settings.current_or_default())
}

// =============================================================================
// Analytics (admin)
// =============================================================================

fn admin_aggregate<T, F>(
    state: &AppState,
    auth: &AuthContext,
    command: &str,
    key: QueryKey,
    stale_time: Duration,
    compute: F,
) -> Result<T, CommandError>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&BoardDb) -> T,
{
    read(command, || {
        auth.require_admin()?;
        cached(state, &key, stale_time, |db| Ok(compute(db)))
    })
}

pub fn get_active_users(
    state: &AppState,
    auth: &AuthContext,
    period: AnalyticsPeriod,
) -> Result<i64, CommandError> {
    admin_aggregate(
        state,
        auth,
        "get_active_users",
        keys::analytics::active_users(period.as_str()),
        stale::ANALYTICS,
        |db| analytics::active_users(db, period, Utc::now()),
    )
}

pub fn get_active_users_analytics(
    state: &AppState,
    auth: &AuthContext,
) -> Result<ActiveUsersAnalytics, CommandError> {
    admin_aggregate(
        state,
        auth,
        "get_active_users_analytics",
        keys::analytics::active_users_all(),
        stale::ANALYTICS,
        |db| analytics::active_users_analytics(db, Utc::now()),
    )
}

pub fn get_total_feature_requests(
    state: &AppState,
    auth: &AuthContext,
) -> Result<i64, CommandError> {
    admin_aggregate(
        state,
        auth,
        "get_total_feature_requests",
        keys::analytics::total_feature_requests(),
        stale::TOTALS,
        |db| analytics::total_requests(db, Utc::now()),
    )
}

pub fn get_total_comments(state: &AppState, auth: &AuthContext) -> Result<i64, CommandError> {
    admin_aggregate(
        state,
        auth,
        "get_total_comments",
        keys::analytics::total_comments(),
        stale::TOTALS,
        |db| analytics::total_comments(db, Utc::now()),
    )
}

pub fn get_total_labels(state: &AppState, auth: &AuthContext) -> Result<i64, CommandError> {
    admin_aggregate(
        state,
        auth,
        "get_total_labels",
        keys::analytics::total_labels(),
        stale::LABEL_TOTALS,
        analytics::total_labels,
    )
}

pub fn get_platform_stats(
    state: &AppState,
    auth: &AuthContext,
) -> Result<PlatformStats, CommandError> {
    admin_aggregate(
        state,
        auth,
        "get_platform_stats",
        keys::analytics::platform_stats(),
        stale::ANALYTICS,
        |db| analytics::platform_stats(db, Utc::now()),
    )
}

// =============================================================================
// Configuration
// =============================================================================

pub fn get_config(state: &AppState) -> Config {
    state.config()
}

/// Re-read `~/.featureboard/config.json`.
pub fn reload_configuration(state: &AppState) -> Result<Config, CommandError> {
    write(
        state,
        "reload_configuration",
        "Configuration reloaded.",
        "Failed to reload configuration",
        || state::reload_config(state).map_err(BoardError::Config),
    )
}

/// Change the default and maximum page sizes and persist them.
pub fn set_page_sizes(
    state: &AppState,
    auth: &AuthContext,
    default_page_size: usize,
    max_page_size: usize,
) -> Result<Config, CommandError> {
    write(
        state,
        "set_page_sizes",
        "Page sizes updated.",
        "Failed to update page sizes",
        || {
            auth.require_admin()?;
            if !(1..=MAX_PAGE_SIZE).contains(&max_page_size) {
                return Err(BoardError::validation(format!(
                    "Maximum page size must be between 1 and {}",
                    MAX_PAGE_SIZE
                )));
            }
            if default_page_size == 0 || default_page_size > max_page_size {
                return Err(BoardError::validation(
                    "Default page size must be between 1 and the maximum page size",
                ));
            }
            let config = state::create_or_update_config(state, |config| {
                config.default_page_size = default_page_size;
                config.max_page_size = max_page_size;
            })
            .map_err(BoardError::Config)?;
            state.cache.invalidate(&keys::feature_requests::all());
            state.cache.invalidate(&keys::users::all());
            state.cache.invalidate(&keys::comments::lists());
            Ok(config)
        },
    )
}

// =============================================================================
// Notices & cache housekeeping
// =============================================================================

pub fn get_notices(state: &AppState) -> Vec<Notice> {
    state.notices.list()
}

pub fn dismiss_notice(state: &AppState, id: &str) -> bool {
    state.notices.dismiss(id)
}

pub fn drain_notices(state: &AppState) -> Vec<Notice> {
    state.notices.drain()
}

/// Evict cache entries nobody has read for a while. Returns how many went.
pub fn collect_cache_garbage(state: &AppState) -> usize {
    let evicted = state.cache.gc(Instant::now());
    if evicted > 0 {
        log::debug!("Evicted {} cached queries", evicted);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, StaticIdentityProvider};
    use crate::db::test_utils::test_db;
    use crate::notification::NoticeVariant;
    use crate::services::test_support::{admin, member};

    fn state() -> AppState {
        AppState::from_parts(test_db(), Config::default())
    }

    fn contexts(state: &AppState) -> (AuthContext, AuthContext) {
        state
            .with_db(|db| Ok((admin(db, "boss"), member(db, "voter"))))
            .unwrap()
    }

    fn new_request(state: &AppState, auth: &AuthContext, title: &str) -> String {
        create_feature_request(
            state,
            auth,
            CreateFeatureRequest {
                title: title.to_string(),
                description: format!("Please add {}", title.to_lowercase()),
                labels: Vec::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_toggle_upvote_updates_cached_detail() {
        let state = state();
        let (boss, voter) = contexts(&state);
        let id = new_request(&state, &boss, "Dark mode");

        let before = get_feature_request(&state, &id).unwrap().unwrap();
        assert_eq!(before.upvotes, 0);

        let outcome = toggle_upvote(&state, &voter, &id).unwrap();
        assert_eq!(outcome, UpvoteOutcome { upvoted: true, upvotes: 1 });

        let after = get_feature_request(&state, &id).unwrap().unwrap();
        assert_eq!(after.upvotes, 1);
        assert_eq!(after.upvoted_by, vec!["voter"]);
    }

    #[test]
    fn test_failed_toggle_rolls_back_and_notifies() {
        let state = state();
        let (boss, voter) = contexts(&state);
        let id = new_request(&state, &boss, "Dark mode");
        let cached = get_feature_request(&state, &id).unwrap();
        state.notices.drain();

        // Gone from the store while the cache still holds it.
        state
            .with_db(|db| Ok(db.delete_feature_request(&id)?))
            .unwrap();

        let err = toggle_upvote(&state, &voter, &id).unwrap_err();
        assert_eq!(err.code, "not_found");
        assert_eq!(
            state
                .cache
                .get::<Option<FeatureRequest>>(&keys::feature_requests::detail(&id)),
            Some(cached)
        );

        let notices = state.notices.list();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].variant, NoticeVariant::Destructive);
        assert_eq!(notices[0].title, "Failed to update vote");
    }

    #[test]
    fn test_comment_count_follows_mutations() {
        let state = state();
        let (boss, voter) = contexts(&state);
        let id = new_request(&state, &boss, "Exports");
        assert_eq!(get_comment_count(&state, &id).unwrap(), 0);

        let comment_id = create_comment(
            &state,
            &voter,
            CreateComment {
                feature_request_id: id.clone(),
                content: "Yes please".to_string(),
            },
        )
        .unwrap();
        assert_eq!(get_comment_count(&state, &id).unwrap(), 1);
        assert_eq!(
            get_feature_request(&state, &id).unwrap().unwrap().comments_count,
            1
        );

        delete_comment(&state, &voter, &comment_id).unwrap();
        assert_eq!(get_comment_count(&state, &id).unwrap(), 0);
        assert!(get_comment(&state, &comment_id).unwrap().is_none());
    }

    #[test]
    fn test_label_commands_report_permission_denied() {
        let state = state();
        let (boss, voter) = contexts(&state);
        let input = CreateLabel {
            name: "UI".to_string(),
            ..CreateLabel::default()
        };

        let err = create_label(&state, &voter, input.clone()).unwrap_err();
        assert_eq!(err.code, "permission_denied");
        assert!(!err.can_retry);

        assert!(get_labels(&state).unwrap().is_empty());
        create_label(&state, &boss, input).unwrap();
        assert_eq!(get_labels(&state).unwrap().len(), 1);
        assert_eq!(get_total_labels(&state, &boss).unwrap(), 1);
        assert!(get_total_labels(&state, &voter).is_err());
    }

    #[test]
    fn test_archived_tab_rejected_before_cache() {
        let state = state();
        let (boss, voter) = contexts(&state);
        let archived = FeatureRequestQuery {
            tab: Some(crate::types::TabGroup::Archived),
            ..FeatureRequestQuery::default()
        };
        assert!(get_feature_requests(&state, &boss, archived.clone()).is_ok());
        let err = get_feature_requests(&state, &voter, archived).unwrap_err();
        assert_eq!(err.code, "permission_denied");
    }

    #[test]
    fn test_settings_update_reaches_context() {
        let state = state();
        let (boss, _) = contexts(&state);
        update_settings(
            &state,
            &boss,
            SettingsUpdate {
                primary_color: Some("#10b981".to_string()),
                ..SettingsUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(state.settings.current_or_default().primary_color, "#10b981");
        assert_eq!(get_settings(&state).unwrap().primary_color, "#10b981");
        assert_ne!(get_primary_color_hsl(&state), "217 91% 60%");

        reset_settings(&state, &boss).unwrap();
        assert_eq!(get_primary_color_hsl(&state), "217 91% 60%");
    }

    #[test]
    fn test_page_sizes_validated() {
        let state = state();
        let (boss, voter) = contexts(&state);
        assert!(set_page_sizes(&state, &voter, 5, 20).is_err());
        assert!(set_page_sizes(&state, &boss, 30, 20).is_err());
        let config = set_page_sizes(&state, &boss, 5, 20).unwrap();
        assert_eq!(config.default_page_size, 5);
        assert_eq!(get_config(&state).max_page_size, 20);
    }

    #[test]
    fn test_lowered_max_page_size_caps_every_list() {
        let state = state();
        let (boss, voter) = contexts(&state);
        set_page_sizes(&state, &boss, 3, 5).unwrap();

        state
            .with_db(|db| {
                for i in 0..5 {
                    member(db, &format!("member-{}", i));
                }
                Ok(())
            })
            .unwrap();
        let page = get_users(&state, &boss, Some(50), None).unwrap();
        assert_eq!(page.items.len(), 5);
        assert!(page.has_more);

        let ids: Vec<String> = (0..7)
            .map(|i| new_request(&state, &boss, &format!("Request {}", i)))
            .collect();
        let authored = get_user_feature_requests(&state, "boss", None, None).unwrap();
        assert_eq!(authored.items.len(), 5);
        assert!(authored.has_more);

        for id in &ids {
            toggle_upvote(&state, &voter, id).unwrap();
        }
        let voted = get_user_voted_feature_requests(&state, "voter", Some(50), None).unwrap();
        assert_eq!(voted.items.len(), 5);
        assert!(voted.has_more);

        let first = ids[0].clone();

        for i in 0..7 {
            create_comment(
                &state,
                &voter,
                CreateComment {
                    feature_request_id: first.clone(),
                    content: format!("Comment {}", i),
                },
            )
            .unwrap();
        }
        let comments = get_comments(
            &state,
            CommentQuery {
                feature_request_id: first.clone(),
                limit: Some(50),
                cursor: None,
            },
        )
        .unwrap();
        assert_eq!(comments.items.len(), 5);
        assert!(comments.has_more);

        let default_sized = get_users(&state, &boss, None, None).unwrap();
        assert_eq!(default_sized.items.len(), 3);
    }

    #[tokio::test]
    async fn test_sign_in_mirrors_identity() {
        let config = Config {
            bootstrap_admins: vec!["owner@example.com".to_string()],
            ..Config::default()
        };
        let state = Arc::new(AppState::from_parts(test_db(), config));
        let provider = StaticIdentityProvider::new(Identity {
            uid: "u-owner".to_string(),
            email: "owner@example.com".to_string(),
            display_name: "Owner".to_string(),
            photo_url: String::new(),
        });

        let auth = sign_in(Arc::clone(&state), &provider, "token").await.unwrap();
        assert!(auth.is_admin());
        assert_eq!(auth.uid(), Some("u-owner"));
        assert!(state.notices.list().iter().any(|n| n.title == "Signed in"));

        let restored = auth_context_for(&state, "u-owner").unwrap();
        assert!(restored.is_admin());
        assert!(!auth_context_for(&state, "ghost").unwrap().is_signed_in());
        assert!(!sign_out(&state, &auth).is_signed_in());
    }
}
