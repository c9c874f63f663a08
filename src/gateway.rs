//! Authentication operations.
//!
//! Every operation returns a [`Result`]. Multi-step operations are not
//! atomic: a later step failing after an earlier one succeeded is logged and
//! reported, never compensated.
use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::backend::{IdentityProvider, OAuthProvider, Session, Identity};
use crate::error::Result;
use crate::pkce;
use crate::profile::{LoginRecord, Profile, ProfileAccessor};

pub const CALLBACK_ROUTE: &str = "/auth/callback";

/// Outcome of [`AuthGateway::sign_up`].
#[derive(Debug, Clone)]
pub struct SignUpReport {
    pub identity: Identity,
    /// Present when the backend signs the user in right away.
    pub session: Option<Session>,
    /// `None` when the profile row could not be created.
    pub profile: Option<Profile>,
}

/// Outcome of [`AuthGateway::sign_in`].
#[derive(Debug, Clone)]
pub struct SignInReport {
    pub session: Session,
    pub login: LoginRecord,
}

/// Wrapper over identity calls of the backend.
#[derive(Clone)]
pub struct AuthGateway {
    identity: Arc<dyn IdentityProvider>,
    profiles: ProfileAccessor,
    anon_key: String,
    site_url: String,
}

impl AuthGateway {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: ProfileAccessor,
        anon_key: &str,
        site_url: &str,
    ) -> Self {
        Self {
            identity,
            profiles,
            anon_key: anon_key.to_owned(),
            site_url: site_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Create an identity, then its profile.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<SignUpReport> {
        let sign_up = self.identity.sign_up(email, password, name).await?;
        tracing::info!(user_id = sign_up.identity.id, "identity created");

        let token = sign_up
            .session
            .as_ref()
            .map_or(self.anon_key.as_str(), |session| {
                session.access_token.as_str()
            });

        let profile = match self.profiles.create(token, &sign_up.identity, name).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::error!(
                    user_id = sign_up.identity.id,
                    error = %err,
                    "profile not created after sign up"
                );
                None
            },
        };

        Ok(SignUpReport {
            identity: sign_up.identity,
            session: sign_up.session,
            profile,
        })
    }

    /// Verify credentials, then record the login.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        ip_address: &str,
    ) -> Result<SignInReport> {
        let session = self.identity.sign_in_with_password(email, password).await?;
        let login = self
            .profiles
            .record_login(&session, ip_address, Utc::now())
            .await;

        Ok(SignInReport { session, login })
    }

    /// URL starting an OAuth flow bound to `code_verifier`.
    pub fn oauth_url(&self, provider: OAuthProvider, code_verifier: &str) -> Result<Url> {
        let redirect_to = format!("{}{CALLBACK_ROUTE}", self.site_url);
        self.identity
            .authorize_url(provider, &redirect_to, &pkce::challenge(code_verifier))
    }

    /// Finish an OAuth flow, creating the profile on first visit.
    pub async fn complete_oauth(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> Result<(Session, Profile)> {
        let session = self.identity.exchange_code(auth_code, code_verifier).await?;
        let profile = self.profiles.ensure(&session).await?;
        Ok((session, profile))
    }

    /// Ask for a recovery code by email.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        self.identity
            .send_recovery_code(email, &self.site_url)
            .await
    }

    /// Verify the recovery code, then set the new password.
    ///
    /// A wrong code never reaches the password update. If the update fails,
    /// the code is already consumed.
    pub async fn verify_otp_and_reset_password(
        &self,
        otp: &str,
        email: &str,
        new_password: &str,
    ) -> Result<Session> {
        let session = self.identity.verify_recovery_code(email, otp).await?;

        if let Err(err) = self
            .identity
            .update_password(&session.access_token, new_password)
            .await
        {
            tracing::error!(
                user_id = session.user.id,
                error = %err,
                "recovery code verified but password not updated"
            );
            return Err(err);
        }

        Ok(session)
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        self.identity.sign_out(access_token).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<Session> {
        self.identity.refresh_session(refresh_token).await
    }

    /// Session for a bare access token presented by the client.
    pub async fn session_from_token(&self, access_token: &str) -> Result<Session> {
        let user = self.identity.get_user(access_token).await?;
        Ok(Session::from_access_token(access_token, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, RECOVERY_CODE};
    use crate::error::ServerError;
    use crate::profile::Role;
    use std::sync::atomic::Ordering;

    fn gateway(backend: &Arc<MemoryBackend>) -> AuthGateway {
        AuthGateway::new(
            backend.clone(),
            ProfileAccessor::new(backend.clone(), backend.clone()),
            "anon",
            "http://localhost:8080/",
        )
    }

    #[tokio::test]
    async fn test_sign_up_creates_profile() {
        let backend = Arc::new(MemoryBackend::default());
        let report = gateway(&backend)
            .sign_up("a@b.com", "abcdef", "A B")
            .await
            .unwrap();

        let profile = report.profile.unwrap();
        assert_eq!(profile.id, report.identity.id);
        assert_eq!(profile.name, "A B");
        assert_eq!(profile.email, "a@b.com");
        assert!(profile.created_at <= Utc::now());
        assert_eq!(backend.profile_of(&report.identity.id), Some(profile));
    }

    #[tokio::test]
    async fn test_sign_up_survives_profile_failure() {
        let backend = Arc::new(MemoryBackend::default());
        backend.fail_profile_insert.store(true, Ordering::SeqCst);

        let report = gateway(&backend)
            .sign_up("a@b.com", "abcdef", "A B")
            .await
            .unwrap();
        assert!(report.profile.is_none());
        assert!(report.session.is_some());
        assert!(backend.profile_of(&report.identity.id).is_none());
    }

    #[tokio::test]
    async fn test_sign_in_records_login() {
        let backend = Arc::new(MemoryBackend::default());
        let id = backend.add_user("a@b.com", "abcdef", "A B", Role::User);

        let report = gateway(&backend)
            .sign_in("a@b.com", "abcdef", "192.168.1.20")
            .await
            .unwrap();
        assert!(report.login.activity_logged);
        assert!(report.login.last_login_updated);

        let activity = backend.activity();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].user_id, id);
        assert_eq!(activity[0].ip_address, "192.168.1.20");
        assert!(backend.profile_of(&id).unwrap().last_login.is_some());
    }

    #[tokio::test]
    async fn test_sign_in_wrong_password() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("a@b.com", "abcdef", "A B", Role::User);

        let err = gateway(&backend)
            .sign_in("a@b.com", "abcdeg", "127.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Backend { status: 400, .. }));
        assert!(backend.activity().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_otp_keeps_password() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("a@b.com", "abcdef", "A B", Role::User);
        let gateway = gateway(&backend);

        gateway.forgot_password("a@b.com").await.unwrap();
        let err = gateway
            .verify_otp_and_reset_password("654321", "a@b.com", "newpass")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Backend { status: 403, .. }));
        assert_eq!(backend.password_of("a@b.com").as_deref(), Some("abcdef"));

        gateway
            .verify_otp_and_reset_password(RECOVERY_CODE, "a@b.com", "newpass")
            .await
            .unwrap();
        assert_eq!(backend.password_of("a@b.com").as_deref(), Some("newpass"));
    }

    #[tokio::test]
    async fn test_oauth_round_trip() {
        let backend = Arc::new(MemoryBackend::default());
        let gateway = gateway(&backend);
        let verifier = pkce::generate_verifier();

        let url = gateway.oauth_url(OAuthProvider::Google, &verifier).unwrap();
        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert!(pairs.contains(&(
            "redirect_to".into(),
            "http://localhost:8080/auth/callback".into()
        )));
        assert!(pairs.contains(&("code_challenge".into(), pkce::challenge(&verifier))));

        backend.grant_oauth_code("code", "g@b.com", &pkce::challenge(&verifier));
        assert!(gateway.complete_oauth("code", "other-verifier").await.is_err());

        backend.grant_oauth_code("code", "g@b.com", &pkce::challenge(&verifier));
        let (session, profile) = gateway.complete_oauth("code", &verifier).await.unwrap();
        assert_eq!(session.user.id, profile.id);
    }
}
