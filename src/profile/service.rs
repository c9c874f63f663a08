use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{LoginActivity, NewLoginActivity, NewProfile, Profile};
use crate::backend::{Identity, LoginActivityRepository, ProfileRepository, Session};
use crate::error::{Result, ServerError};

/// Reads and writes of [`Profile`] records.
///
/// Bulk reads are unrestricted here. Callers must sit behind the admin guard,
/// and row-level policies of the backend remain the actual boundary.
#[derive(Clone)]
pub struct ProfileAccessor {
    profiles: Arc<dyn ProfileRepository>,
    activity: Arc<dyn LoginActivityRepository>,
}

/// Outcome of the two bookkeeping writes following a password sign-in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginRecord {
    pub activity_logged: bool,
    pub last_login_updated: bool,
}

impl ProfileAccessor {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        activity: Arc<dyn LoginActivityRepository>,
    ) -> Self {
        Self { profiles, activity }
    }

    /// Profile of the identity owning `session`.
    ///
    /// [`ServerError::NoSession`] without session,
    /// [`ServerError::NotFound`] when the row is missing.
    pub async fn current_profile(&self, session: Option<&Session>) -> Result<Profile> {
        let session = session.ok_or(ServerError::NoSession)?;
        self.profiles
            .find_by_id(&session.access_token, &session.user.id)
            .await
    }

    /// Every profile. Admin views only.
    pub async fn all_profiles(&self, token: &str) -> Result<Vec<Profile>> {
        self.profiles.list(token).await
    }

    /// Every login activity entry. Admin views only.
    pub async fn all_login_activity(&self, token: &str) -> Result<Vec<LoginActivity>> {
        self.activity.list(token).await
    }

    /// Create the profile matching a freshly created identity.
    pub async fn create(
        &self,
        token: &str,
        identity: &Identity,
        name: &str,
    ) -> Result<Profile> {
        let profile = NewProfile {
            id: identity.id.clone(),
            name: name.to_owned(),
            email: identity.email.clone().unwrap_or_default(),
            avatar_url: identity.user_metadata.avatar_url.clone(),
            created_at: Utc::now(),
        };
        self.profiles.insert(token, &profile).await
    }

    /// Profile of `session`, created from identity metadata when missing.
    pub async fn ensure(&self, session: &Session) -> Result<Profile> {
        match self.current_profile(Some(session)).await {
            Err(ServerError::NotFound) => {
                tracing::info!(user_id = session.user.id, "creating missing profile");
                let name = session.user.display_name();
                self.create(&session.access_token, &session.user, &name)
                    .await
            },
            result => result,
        }
    }

    /// Append a login activity entry and stamp `last_login`.
    ///
    /// Both writes run concurrently and independently; failures are logged.
    pub async fn record_login(
        &self,
        session: &Session,
        ip_address: &str,
        at: DateTime<Utc>,
    ) -> LoginRecord {
        let token = &session.access_token;
        let user_id = &session.user.id;
        let activity = NewLoginActivity {
            user_id: user_id.clone(),
            login_time: at,
            ip_address: ip_address.to_owned(),
        };

        let (logged, touched) = tokio::join!(
            self.activity.insert(token, &activity),
            self.profiles.touch_last_login(token, user_id, at),
        );

        if let Err(err) = &logged {
            tracing::error!(user_id, error = %err, "login activity not recorded");
        }
        if let Err(err) = &touched {
            tracing::error!(user_id, error = %err, "last login not updated");
        }

        LoginRecord {
            activity_logged: logged.is_ok(),
            last_login_updated: touched.is_ok(),
        }
    }
}
