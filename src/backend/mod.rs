//! Ports to the hosted Backend-as-a-Service.
//!
//! Identity management, row storage and change notifications are all
//! delegated to the backend. Each concern is a trait so the HTTP layer never
//! depends on the wire format of a specific provider.
#[cfg(test)]
pub(crate) mod memory;
pub mod realtime;
pub mod supabase;

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use url::Url;

use crate::error::Result;
use crate::profile::{
    CareerAssessment, LoginActivity, NewAssessment, NewLoginActivity,
    NewProfile, Profile,
};

/// Seconds before expiry at which an access token is considered stale.
const EXPIRY_MARGIN: i64 = 10;

/// Free-form metadata attached to an identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Authentication record owned by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl Identity {
    /// Best display name known for this identity.
    pub fn display_name(&self) -> String {
        self.user_metadata
            .full_name
            .clone()
            .or_else(|| self.user_metadata.name.clone())
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .map(str::to_owned)
            })
            .unwrap_or_default()
    }
}

/// Tokens issued by the backend for an identity.
#[derive(Clone, PartialEq, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds).
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: Identity,
}

impl Session {
    /// Session from a bare access token, without refresh capability.
    pub fn from_access_token(access_token: &str, user: Identity) -> Self {
        Self {
            access_token: access_token.to_owned(),
            refresh_token: None,
            expires_at: None,
            expires_in: None,
            user,
        }
    }

    /// Fill `expires_at` from `expires_in` when the backend omitted it.
    pub(crate) fn stamped(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs);
        }
        self
    }

    /// Whether the access token must be refreshed before use.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - EXPIRY_MARGIN <= now)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user.id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of an identity creation.
#[derive(Clone, Debug)]
pub struct SignUp {
    pub identity: Identity,
    /// Present when the backend does not require email confirmation.
    pub session: Option<Session>,
}

/// Supported external identity providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    LinkedIn,
}

impl OAuthProvider {
    pub const ALL: [OAuthProvider; 2] =
        [OAuthProvider::Google, OAuthProvider::LinkedIn];

    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::LinkedIn => "linkedin",
        }
    }
}

/// Tables the application reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    LoginActivity,
    CareerAssessments,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::LoginActivity => "login_activity",
            Table::CareerAssessments => "career_assessments",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "profiles" => Some(Table::Profiles),
            "login_activity" => Some(Table::LoginActivity),
            "career_assessments" => Some(Table::CareerAssessments),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Notifications were dropped because the subscriber lagged behind.
    Missed,
}

/// Row-change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Change {
    pub table: Table,
    pub kind: ChangeKind,
}

/// Live subscription to the changes of one table.
///
/// Releasing happens on drop, whatever the reason the owner goes away.
pub struct Subscription {
    table: Table,
    receiver: broadcast::Receiver<Change>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        table: Table,
        receiver: broadcast::Receiver<Change>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            table,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Wait for the next change. `None` once the feed is closed.
    pub async fn recv(&mut self) -> Option<Change> {
        match self.receiver.recv().await {
            Ok(change) => Some(change),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(table = self.table.as_str(), skipped, "subscriber lagged");
                Some(Change {
                    table: self.table,
                    kind: ChangeKind::Missed,
                })
            },
            Err(RecvError::Closed) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Password and OAuth based identity management.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an identity. `name` is kept as user metadata.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<SignUp>;

    /// Verify credentials and issue a session.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session>;

    /// URL the browser must visit to authenticate with `provider`.
    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url>;

    /// Exchange an authorization code obtained with PKCE.
    async fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<Session>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session>;

    /// Identity owning `access_token`.
    async fn get_user(&self, access_token: &str) -> Result<Identity>;

    /// Ask the backend to email a one-time recovery code.
    async fn send_recovery_code(
        &self,
        email: &str,
        redirect_to: &str,
    ) -> Result<()>;

    /// Verify a recovery code, issuing a session on success.
    async fn verify_recovery_code(
        &self,
        email: &str,
        token: &str,
    ) -> Result<Session>;

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> Result<Identity>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;
}

/// `profiles` table.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn insert(&self, token: &str, profile: &NewProfile) -> Result<Profile>;

    /// Exactly one row, [`ServerError::NotFound`](crate::error::ServerError::NotFound) otherwise.
    async fn find_by_id(&self, token: &str, id: &str) -> Result<Profile>;

    /// Every profile, newest first.
    async fn list(&self, token: &str) -> Result<Vec<Profile>>;

    async fn touch_last_login(
        &self,
        token: &str,
        id: &str,
        at: chrono::DateTime<Utc>,
    ) -> Result<()>;
}

/// `login_activity` table.
#[async_trait]
pub trait LoginActivityRepository: Send + Sync {
    async fn insert(&self, token: &str, activity: &NewLoginActivity) -> Result<()>;

    /// Every entry, newest first, with the owner's name and email.
    async fn list(&self, token: &str) -> Result<Vec<LoginActivity>>;
}

/// `career_assessments` table.
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    async fn insert(
        &self,
        token: &str,
        assessment: &NewAssessment,
    ) -> Result<CareerAssessment>;

    /// Assessments of `user_id`, newest first.
    async fn list_for_user(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Vec<CareerAssessment>>;

    async fn find_by_id(&self, token: &str, id: &str) -> Result<CareerAssessment>;
}

/// Publish/subscribe feed of row changes keyed by table.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Changes of `table` that `token` is allowed to read.
    async fn subscribe(&self, table: Table, token: &str) -> Result<Subscription>;
}
