//! Authentication: identity providers and the request-scoped auth context.
//!
//! A provider turns a credential into an [`Identity`]; the command layer then
//! mirrors that identity into the `users` collection and builds an
//! [`AuthContext`] carrying the stored user and their admin status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::User;
use crate::error::BoardError;

/// Default endpoint for Google ID token verification.
pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Who the identity provider says the caller is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub photo_url: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a credential (ID token, session token, ...) to an identity.
    async fn authenticate(&self, credential: &str) -> Result<Identity, BoardError>;
}

// =============================================================================
// Static provider
// =============================================================================

/// Always signs in as one fixed identity. For local development and tests.
#[derive(Debug, Clone)]
pub struct StaticIdentityProvider {
    identity: Identity,
}

impl StaticIdentityProvider {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, _credential: &str) -> Result<Identity, BoardError> {
        Ok(self.identity.clone())
    }
}

// =============================================================================
// Google ID tokens
// =============================================================================

/// Subset of the tokeninfo response we rely on.
#[derive(Debug, Clone, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    #[serde(default)]
    email: Option<String>,
    /// Google returns this as the string "true"/"false".
    #[serde(default)]
    email_verified: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Verifies Google ID tokens against the tokeninfo endpoint.
pub struct GoogleIdTokenProvider {
    client: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl GoogleIdTokenProvider {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            endpoint: GOOGLE_TOKENINFO_URL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Check audience and email verification, then build the identity.
fn identity_from_token_info(info: TokenInfo, client_id: &str) -> Result<Identity, BoardError> {
    if info.aud != client_id {
        return Err(BoardError::permission(
            "ID token was issued for a different client",
        ));
    }
    if info.email_verified.as_deref() == Some("false") {
        return Err(BoardError::permission("Google account email is not verified"));
    }
    Ok(Identity {
        uid: info.sub,
        email: info.email.unwrap_or_default(),
        display_name: info.name.unwrap_or_default(),
        photo_url: info.picture.unwrap_or_default(),
    })
}

#[async_trait]
impl IdentityProvider for GoogleIdTokenProvider {
    async fn authenticate(&self, credential: &str) -> Result<Identity, BoardError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("id_token", credential)])
            .send()
            .await
            .map_err(|e| BoardError::Identity(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            log::warn!("Google rejected ID token: {}", status);
            return Err(BoardError::NotSignedIn);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BoardError::Identity(format!("tokeninfo {}: {}", status, body)));
        }

        let info: TokenInfo = resp
            .json()
            .await
            .map_err(|e| BoardError::Identity(e.to_string()))?;
        identity_from_token_info(info, &self.client_id)
    }
}

// =============================================================================
// Auth context
// =============================================================================

/// The signed-in user for one request, if any.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    user: Option<User>,
    is_admin: bool,
}

impl AuthContext {
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// `is_admin` combines the stored flag with the admin email list.
    pub fn signed_in(user: User, is_admin: bool) -> Self {
        let is_admin = is_admin || user.is_admin;
        Self {
            user: Some(user),
            is_admin,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.uid.as_str())
    }

    pub fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_some() && self.is_admin
    }

    pub fn require_user(&self) -> Result<&User, BoardError> {
        self.user.as_ref().ok_or(BoardError::NotSignedIn)
    }

    pub fn require_admin(&self) -> Result<&User, BoardError> {
        let user = self.require_user()?;
        if self.is_admin {
            Ok(user)
        } else {
            Err(BoardError::permission("administrator access required"))
        }
    }

    /// Authors may modify their own documents; admins may modify any.
    pub fn can_modify(&self, author_id: &str) -> bool {
        match self.user {
            Some(ref user) => self.is_admin || user.uid == author_id,
            None => false,
        }
    }
}
