//! Business rules between commands and the store: permission checks,
//! validation and the multi-row writes that must happen together.

pub mod analytics;
pub mod comments;
pub mod feature_requests;
pub mod labels;
pub mod settings;
pub mod users;

use crate::db::User;
use crate::types::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`. Commands have
/// already applied the configured limits; this is the hard ceiling.
pub fn page_size(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Name stamped on authored documents.
pub(crate) fn author_name(user: &User) -> String {
    if user.display_name.trim().is_empty() {
        user.email.clone()
    } else {
        user.display_name.clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::auth::AuthContext;
    use crate::db::test_utils::ts;
    use crate::db::users::LoginProfile;
    use crate::db::BoardDb;

    fn sign_in(db: &BoardDb, uid: &str, admin: bool) -> AuthContext {
        let email = format!("{}@example.com", uid);
        let user = db
            .upsert_user_on_login(
                &LoginProfile {
                    uid,
                    email: &email,
                    display_name: uid,
                    photo_url: "",
                },
                admin,
                &ts(0),
            )
            .expect("upsert test user");
        AuthContext::signed_in(user, false)
    }

    pub fn member(db: &BoardDb, uid: &str) -> AuthContext {
        sign_in(db, uid, false)
    }

    pub fn admin(db: &BoardDb, uid: &str) -> AuthContext {
        sign_in(db, uid, true)
    }
}
