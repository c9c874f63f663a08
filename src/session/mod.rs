//! Per-browser authentication state.
//!
//! A [`SessionStore`] is the single owner of the state of one browser
//! session. It only changes through [`SessionStore::dispatch`]; readers
//! observe it through a `watch` channel.
mod registry;

pub use registry::*;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::backend::Session;
use crate::guard;
use crate::profile::{Profile, ProfileAccessor};

/// Authentication state of a browser session.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum SessionState {
    /// Initial session not resolved yet.
    #[default]
    Initializing,
    Anonymous,
    Authenticated {
        session: Session,
        /// `None` when the profile could not be fetched.
        profile: Option<Profile>,
        /// Always equals the loaded profile role, `false` without profile.
        is_admin: bool,
    },
}

impl SessionState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionState::Initializing)
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated { session, .. } => Some(session),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, SessionState::Authenticated { is_admin: true, .. })
    }
}

/// Notification emitted by the identity flows.
#[derive(Clone, Debug)]
pub enum AuthEvent {
    InitialSession(Option<Session>),
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    PasswordRecovery(Session),
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::InitialSession(_) => "INITIAL_SESSION",
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthEvent::PasswordRecovery(_) => "PASSWORD_RECOVERY",
        }
    }

    /// Whether the event moves the user to their landing page.
    fn navigates(&self) -> bool {
        matches!(self, AuthEvent::SignedIn(_) | AuthEvent::PasswordRecovery(_))
    }
}

/// JSON view of a [`SessionState`].
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub status: &'static str,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub profile: Option<Profile>,
    pub is_admin: bool,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Initializing => SessionView::empty("initializing"),
            SessionState::Anonymous => SessionView::empty("anonymous"),
            SessionState::Authenticated {
                session,
                profile,
                is_admin,
            } => SessionView {
                status: "authenticated",
                user_id: Some(session.user.id.clone()),
                email: session.user.email.clone(),
                profile: profile.clone(),
                is_admin: *is_admin,
            },
        }
    }
}

impl SessionView {
    fn empty(status: &'static str) -> Self {
        Self {
            status,
            user_id: None,
            email: None,
            profile: None,
            is_admin: false,
        }
    }
}

/// Owner of the state of one browser session.
pub struct SessionStore {
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    profiles: ProfileAccessor,
    code_verifier: Mutex<Option<String>>,
    last_active: Mutex<Instant>,
    refreshing: tokio::sync::Mutex<()>,
}

impl SessionStore {
    pub fn new(profiles: ProfileAccessor) -> Self {
        Self {
            state: watch::Sender::new(SessionState::Initializing),
            epoch: AtomicU64::new(0),
            profiles,
            code_verifier: Mutex::new(None),
            last_active: Mutex::new(Instant::now()),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    /// Apply `event`, returning the route to navigate to, if any.
    ///
    /// Events carrying a session fetch the profile. A fetch overtaken by a
    /// later dispatch is discarded, so the last dispatched event wins.
    pub async fn dispatch(&self, event: AuthEvent) -> Option<&'static str> {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let name = event.name();
        let navigates = event.navigates();
        metrics::counter!("auth_events_total", "event" => name).increment(1);
        tracing::debug!(event = name, epoch, "auth event dispatched");

        let session = match event {
            AuthEvent::SignedOut | AuthEvent::InitialSession(None) => {
                self.state.send_replace(SessionState::Anonymous);
                return None;
            },
            AuthEvent::InitialSession(Some(session))
            | AuthEvent::SignedIn(session)
            | AuthEvent::TokenRefreshed(session)
            | AuthEvent::PasswordRecovery(session) => session,
        };

        let profile = match self.profiles.current_profile(Some(&session)).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(user_id = session.user.id, error = %err, "profile not loaded");
                None
            },
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(event = name, epoch, "stale profile fetch discarded");
            return None;
        }

        let is_admin = profile.as_ref().is_some_and(Profile::is_admin);
        self.state.send_replace(SessionState::Authenticated {
            session,
            profile,
            is_admin,
        });

        navigates.then(|| guard::landing_route(is_admin))
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Wait until the state left [`SessionState::Initializing`].
    pub async fn settled(&self) -> SessionState {
        let mut receiver = self.state.subscribe();
        match receiver.wait_for(SessionState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Current backend session, if authenticated.
    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    /// Whether the store carries a signed-in user or an OAuth flow in
    /// progress.
    pub fn holds_state(&self) -> bool {
        self.state.borrow().session().is_some() || self.code_verifier.lock().is_some()
    }

    /// Keep the PKCE verifier of an OAuth flow in progress.
    pub fn set_code_verifier(&self, verifier: String) {
        *self.code_verifier.lock() = Some(verifier);
    }

    /// Verifier of the OAuth flow in progress, usable once.
    pub fn take_code_verifier(&self) -> Option<String> {
        self.code_verifier.lock().take()
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    /// Refresh the access token when it expired.
    ///
    /// A failed refresh signs the session out.
    pub async fn refresh_if_expired(&self, gateway: &crate::gateway::AuthGateway) {
        let _guard = self.refreshing.lock().await;

        let Some(session) = self.session() else {
            return;
        };
        if !session.is_expired(Utc::now().timestamp()) {
            return;
        }

        let event = match &session.refresh_token {
            Some(refresh_token) => match gateway.refresh(refresh_token).await {
                Ok(session) => AuthEvent::TokenRefreshed(session),
                Err(err) => {
                    tracing::warn!(user_id = session.user.id, error = %err, "token refresh failed");
                    AuthEvent::SignedOut
                },
            },
            None => AuthEvent::SignedOut,
        };
        self.dispatch(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProfileRepository;
    use crate::backend::memory::MemoryBackend;
    use crate::error::Result;
    use crate::profile::{NewProfile, Role};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use tokio::sync::Notify;

    fn store(backend: &Arc<MemoryBackend>) -> SessionStore {
        SessionStore::new(ProfileAccessor::new(backend.clone(), backend.clone()))
    }

    #[tokio::test]
    async fn test_initial_session_without_session() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store(&backend);
        assert_eq!(store.snapshot(), SessionState::Initializing);

        assert_eq!(store.dispatch(AuthEvent::InitialSession(None)).await, None);
        assert_eq!(store.settled().await, SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_signed_in_sets_role_and_navigates() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("admin@b.com", "abcdef", "Admin", Role::Admin);
        backend.add_user("user@b.com", "abcdef", "User", Role::User);

        let admin = store(&backend);
        let target = admin
            .dispatch(AuthEvent::SignedIn(backend.session_for("admin@b.com")))
            .await;
        assert_eq!(target, Some(guard::ADMIN_ROUTE));
        assert!(admin.snapshot().is_admin());

        let user = store(&backend);
        let target = user
            .dispatch(AuthEvent::SignedIn(backend.session_for("user@b.com")))
            .await;
        assert_eq!(target, Some(guard::DASHBOARD_ROUTE));
        match user.snapshot() {
            SessionState::Authenticated { profile, is_admin, .. } => {
                assert!(!is_admin);
                assert_eq!(profile.unwrap().role, Role::User);
            },
            state => panic!("unexpected state {state:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_admin() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("admin@b.com", "abcdef", "Admin", Role::Admin);
        backend.fail_profile_read.store(true, AtomicOrdering::SeqCst);

        let store = store(&backend);
        store
            .dispatch(AuthEvent::SignedIn(backend.session_for("admin@b.com")))
            .await;
        match store.snapshot() {
            SessionState::Authenticated { profile, is_admin, .. } => {
                assert!(profile.is_none());
                assert!(!is_admin);
            },
            state => panic!("unexpected state {state:?}"),
        }
    }

    /// Profile reads held until the gate opens.
    struct GatedProfiles {
        inner: Arc<MemoryBackend>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl ProfileRepository for GatedProfiles {
        async fn insert(&self, token: &str, profile: &NewProfile) -> Result<Profile> {
            ProfileRepository::insert(&*self.inner, token, profile).await
        }

        async fn find_by_id(&self, token: &str, id: &str) -> Result<Profile> {
            self.gate.notified().await;
            ProfileRepository::find_by_id(&*self.inner, token, id).await
        }

        async fn list(&self, token: &str) -> Result<Vec<Profile>> {
            ProfileRepository::list(&*self.inner, token).await
        }

        async fn touch_last_login(
            &self,
            token: &str,
            id: &str,
            at: chrono::DateTime<Utc>,
        ) -> Result<()> {
            self.inner.touch_last_login(token, id, at).await
        }
    }

    #[tokio::test]
    async fn test_sign_out_wins_over_pending_fetch() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("admin@b.com", "abcdef", "Admin", Role::Admin);
        let gate = Arc::new(Notify::new());
        let profiles = GatedProfiles {
            inner: backend.clone(),
            gate: Arc::clone(&gate),
        };
        let store = Arc::new(SessionStore::new(ProfileAccessor::new(
            Arc::new(profiles),
            backend.clone(),
        )));

        let session = backend.session_for("admin@b.com");
        let signing_in = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.dispatch(AuthEvent::SignedIn(session)).await }
        });
        while store.epoch.load(AtomicOrdering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        store.dispatch(AuthEvent::SignedOut).await;
        gate.notify_one();

        assert_eq!(signing_in.await.unwrap(), None);
        assert_eq!(store.snapshot(), SessionState::Anonymous);
        assert!(!store.snapshot().is_admin());
    }

    #[tokio::test]
    async fn test_code_verifier_used_once() {
        let backend = Arc::new(MemoryBackend::default());
        let store = store(&backend);
        store.set_code_verifier("verifier".into());
        assert_eq!(store.take_code_verifier().as_deref(), Some("verifier"));
        assert_eq!(store.take_code_verifier(), None);
    }

    #[tokio::test]
    async fn test_view() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("admin@b.com", "abcdef", "Admin", Role::Admin);
        let store = store(&backend);
        store
            .dispatch(AuthEvent::SignedIn(backend.session_for("admin@b.com")))
            .await;

        let view = SessionView::from(&store.snapshot());
        assert_eq!(view.status, "authenticated");
        assert_eq!(view.email.as_deref(), Some("admin@b.com"));
        assert!(view.is_admin);
        assert_eq!(SessionView::from(&SessionState::Anonymous).status, "anonymous");
    }
}
