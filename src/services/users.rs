// Users service
// Sign-in mirroring, admin resolution and profile queries.

use chrono::Utc;
use serde::Serialize;

use crate::auth::{AuthContext, Identity};
use crate::db::users::LoginProfile;
use crate::db::{AdminEmail, BoardDb, Cursor, FeatureRequest, FeatureRequestFilter, Page, User};
use crate::error::BoardError;
use crate::types::FeatureRequestSort;

/// Profile page size for a user's own requests.
pub const PROFILE_PAGE_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub feature_requests_count: i64,
    pub comments_count: i64,
}

/// Mirror an identity into `users`.
///
/// New users become admins when their email is on the stored admin list or
/// the configured bootstrap list. Returning users only get their profile and
/// login time refreshed.
pub fn upsert_on_login(
    db: &BoardDb,
    identity: &Identity,
    bootstrap_admins: &[String],
) -> Result<User, BoardError> {
    let email = identity.email.trim();
    let bootstrap = !email.is_empty()
        && bootstrap_admins
            .iter()
            .any(|e| e.trim().eq_ignore_ascii_case(email));
    let grant_admin = bootstrap || (!email.is_empty() && db.is_admin_email(email)?);

    let user = db.upsert_user_on_login(
        &LoginProfile {
            uid: &identity.uid,
            email,
            display_name: &identity.display_name,
            photo_url: &identity.photo_url,
        },
        grant_admin,
        &Utc::now(),
    )?;
    log::info!("User {} signed in", user.uid);
    Ok(user)
}

pub fn get(db: &BoardDb, uid: &str) -> Result<Option<User>, BoardError> {
    Ok(db.get_user(uid)?)
}

/// An email is admin if a stored admin user has it or it is on the admin list.
pub fn check_is_admin(db: &BoardDb, email: &str) -> Result<bool, BoardError> {
    let email = email.trim();
    if email.is_empty() {
        return Ok(false);
    }
    Ok(db.is_admin_user_email(email)? || db.is_admin_email(email)?)
}

/// Build the request context for a stored user.
pub fn auth_context(db: &BoardDb, user: User) -> Result<AuthContext, BoardError> {
    let listed = check_is_admin(db, &user.email)?;
    Ok(AuthContext::signed_in(user, listed))
}

pub fn list_admins(db: &BoardDb, auth: &AuthContext) -> Result<Vec<User>, BoardError> {
    auth.require_admin()?;
    Ok(db.list_admin_users()?)
}

/// Every user, newest first.
pub fn list_users(
    db: &BoardDb,
    auth: &AuthContext,
    limit: Option<usize>,
    cursor: Option<&str>,
) -> Result<Page<User>, BoardError> {
    auth.require_admin()?;
    let cursor = cursor.map(Cursor::decode).transpose()?;
    Ok(db.list_users(super::page_size(limit), cursor.as_ref())?)
}

/// Grant or revoke admin. Admins cannot revoke their own access.
pub fn set_admin_status(
    db: &BoardDb,
    auth: &AuthContext,
    uid: &str,
    is_admin: bool,
) -> Result<User, BoardError> {
    let actor = auth.require_admin()?;
    if actor.uid == uid && !is_admin {
        return Err(BoardError::permission(
            "administrators cannot remove their own admin access",
        ));
    }
    if !db.set_user_admin(uid, is_admin, &Utc::now())? {
        return Err(BoardError::not_found("User", uid));
    }
    log::info!(
        "Admin status of {} set to {} by {}",
        uid,
        is_admin,
        actor.uid
    );
    db.get_user(uid)?
        .ok_or_else(|| BoardError::not_found("User", uid))
}

// =============================================================================
// Admin email list
// =============================================================================

fn normalize_email(email: &str) -> Result<String, BoardError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(BoardError::validation(format!(
            "'{}' is not a valid email address",
            email
        ))),
    }
}

/// Returns `false` when the email was already listed.
pub fn add_admin_email(db: &BoardDb, auth: &AuthContext, email: &str) -> Result<bool, BoardError> {
    let actor = auth.require_admin()?;
    let email = normalize_email(email)?;
    Ok(db.add_admin_email(&email, &actor.uid, &Utc::now())?)
}

pub fn remove_admin_email(
    db: &BoardDb,
    auth: &AuthContext,
    email: &str,
) -> Result<bool, BoardError> {
    auth.require_admin()?;
    Ok(db.remove_admin_email(&email.trim().to_lowercase())?)
}

pub fn list_admin_emails(db: &BoardDb, auth: &AuthContext) -> Result<Vec<AdminEmail>, BoardError> {
    auth.require_admin()?;
    Ok(db.list_admin_emails()?)
}

// =============================================================================
// Profile
// =============================================================================

fn newest_matching(
    db: &BoardDb,
    filter: FeatureRequestFilter,
    limit: usize,
    cursor: Option<&str>,
) -> Result<Page<FeatureRequest>, BoardError> {
    let cursor = cursor.map(Cursor::decode).transpose()?;
    Ok(db.list_feature_requests(&filter, FeatureRequestSort::newest(), limit, cursor.as_ref())?)
}

/// Requests authored by `uid`, newest first.
pub fn user_feature_requests(
    db: &BoardDb,
    uid: &str,
    limit: Option<usize>,
    cursor: Option<&str>,
) -> Result<Page<FeatureRequest>, BoardError> {
    let filter = FeatureRequestFilter {
        author_id: Some(uid.to_string()),
        ..FeatureRequestFilter::default()
    };
    let limit = super::page_size(Some(limit.unwrap_or(PROFILE_PAGE_SIZE)));
    newest_matching(db, filter, limit, cursor)
}

/// Requests `uid` has upvoted, newest first.
pub fn user_voted_feature_requests(
    db: &BoardDb,
    uid: &str,
    limit: Option<usize>,
    cursor: Option<&str>,
) -> Result<Page<FeatureRequest>, BoardError> {
    let filter = FeatureRequestFilter {
        upvoted_by: Some(uid.to_string()),
        ..FeatureRequestFilter::default()
    };
    newest_matching(db, filter, super::page_size(limit), cursor)
}

pub fn user_stats(db: &BoardDb, uid: &str) -> Result<UserStats, BoardError> {
    let authored = FeatureRequestFilter {
        author_id: Some(uid.to_string()),
        ..FeatureRequestFilter::default()
    };
    Ok(UserStats {
        feature_requests_count: db.count_feature_requests(&authored)?,
        comments_count: db.count_comments_by_author(uid)?,
    })
}
