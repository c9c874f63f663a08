//! In-memory backend double for tests.
//!
//! Implements every port with plain maps. Failures of single steps can be
//! forced to exercise partial-completion paths.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use url::Url;

use crate::backend::{
    AssessmentRepository, Change, ChangeFeed, ChangeKind, IdentityProvider,
    LoginActivityRepository, OAuthProvider, ProfileRepository, Session,
    SignUp, Subscription, Table, Identity, UserMetadata,
};
use crate::error::{Result, ServerError};
use crate::pkce;
use crate::profile::{
    CareerAssessment, LoginActivity, NewAssessment, NewLoginActivity,
    NewProfile, Profile, ProfileSummary, Role,
};

/// Code mailed by [`IdentityProvider::send_recovery_code`].
pub const RECOVERY_CODE: &str = "123456";
const TOKEN_LIFETIME: i64 = 3600;

fn rejected(status: u16, code: &str, message: &str) -> ServerError {
    ServerError::Backend {
        status,
        code: Some(code.to_owned()),
        message: message.to_owned(),
    }
}

struct Account {
    identity: Identity,
    password: String,
}

struct Grant {
    user_id: String,
    challenge: String,
}

#[derive(Default)]
struct Store {
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    grants: HashMap<String, Grant>,
    recovery: HashMap<String, String>,
    profiles: Vec<Profile>,
    activity: Vec<LoginActivity>,
    assessments: Vec<CareerAssessment>,
    sequence: u64,
}

impl Store {
    fn next(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn issue(&mut self, user_id: &str) -> Result<Session> {
        let n = self.next();
        let access_token = format!("access-{n}");
        let refresh_token = format!("refresh-{n}");
        self.access_tokens
            .insert(access_token.clone(), user_id.to_owned());
        self.refresh_tokens
            .insert(refresh_token.clone(), user_id.to_owned());

        Ok(Session {
            access_token,
            refresh_token: Some(refresh_token),
            expires_at: Some(Utc::now().timestamp() + TOKEN_LIFETIME),
            expires_in: Some(TOKEN_LIFETIME),
            user: self.identity(user_id)?,
        })
    }

    fn identity(&self, user_id: &str) -> Result<Identity> {
        self.accounts
            .values()
            .find(|account| account.identity.id == user_id)
            .map(|account| account.identity.clone())
            .ok_or_else(|| rejected(404, "user_not_found", "User not found"))
    }

    fn owner(&self, access_token: &str) -> Result<String> {
        self.access_tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| rejected(401, "bad_jwt", "invalid JWT"))
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
    feeds: Mutex<HashMap<Table, broadcast::Sender<Change>>>,
    feed_tokens: Mutex<HashMap<Table, String>>,
    bulk_reads: AtomicUsize,
    pub fail_profile_insert: AtomicBool,
    pub fail_activity_insert: AtomicBool,
    pub fail_profile_read: AtomicBool,
}

impl MemoryBackend {
    /// Register an identity and its profile, returning the identity id.
    pub fn add_user(&self, email: &str, password: &str, name: &str, role: Role) -> String {
        let mut store = self.store.lock();
        let id = format!("user-{}", store.next());
        store.accounts.insert(
            email.to_owned(),
            Account {
                identity: Identity {
                    id: id.clone(),
                    email: Some(email.to_owned()),
                    user_metadata: UserMetadata {
                        name: Some(name.to_owned()),
                        ..Default::default()
                    },
                },
                password: password.to_owned(),
            },
        );
        store.profiles.push(Profile {
            id: id.clone(),
            name: name.to_owned(),
            email: email.to_owned(),
            avatar_url: None,
            created_at: Utc::now(),
            last_login: None,
            role,
        });
        id
    }

    /// Issue a session without going through a sign-in.
    pub fn session_for(&self, email: &str) -> Session {
        let mut store = self.store.lock();
        let id = store.accounts[email].identity.id.clone();
        store.issue(&id).unwrap()
    }

    /// Register an authorization code as an OAuth provider would.
    pub fn grant_oauth_code(&self, code: &str, email: &str, challenge: &str) {
        let mut store = self.store.lock();
        let user_id = match store.accounts.get(email) {
            Some(account) => account.identity.id.clone(),
            None => {
                let id = format!("user-{}", store.next());
                store.accounts.insert(
                    email.to_owned(),
                    Account {
                        identity: Identity {
                            id: id.clone(),
                            email: Some(email.to_owned()),
                            user_metadata: UserMetadata {
                                full_name: Some("Oauth User".into()),
                                avatar_url: Some("https://cdn.test/avatar.png".into()),
                                ..Default::default()
                            },
                        },
                        password: String::default(),
                    },
                );
                id
            },
        };
        store.grants.insert(
            code.to_owned(),
            Grant {
                user_id,
                challenge: challenge.to_owned(),
            },
        );
    }

    pub fn password_of(&self, email: &str) -> Option<String> {
        self.store
            .lock()
            .accounts
            .get(email)
            .map(|account| account.password.clone())
    }

    pub fn profile_of(&self, id: &str) -> Option<Profile> {
        self.store
            .lock()
            .profiles
            .iter()
            .find(|profile| profile.id == id)
            .cloned()
    }

    pub fn activity(&self) -> Vec<LoginActivity> {
        self.store.lock().activity.clone()
    }

    pub fn is_token_valid(&self, access_token: &str) -> bool {
        self.store.lock().access_tokens.contains_key(access_token)
    }

    /// Stop accepting `access_token`, as once its lifetime is over.
    pub fn expire(&self, access_token: &str) {
        self.store.lock().access_tokens.remove(access_token);
    }

    /// Token of the latest subscription to `table`.
    pub fn feed_token(&self, table: Table) -> Option<String> {
        self.feed_tokens.lock().get(&table).cloned()
    }

    /// Number of unrestricted list calls served.
    pub fn bulk_reads(&self) -> usize {
        self.bulk_reads.load(Ordering::SeqCst)
    }

    /// Live subscriptions on `table`.
    pub fn subscribers(&self, table: Table) -> usize {
        self.feeds
            .lock()
            .get(&table)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Emit a row change to subscribers of `table`.
    pub fn notify(&self, table: Table, kind: ChangeKind) {
        if let Some(sender) = self.feeds.lock().get(&table) {
            let _ = sender.send(Change { table, kind });
        }
    }

    /// Insert an activity row as another client would.
    pub fn record_login(&self, user_id: &str, at: DateTime<Utc>) {
        let mut store = self.store.lock();
        let n = store.next();
        store.activity.push(LoginActivity {
            id: format!("activity-{n}"),
            user_id: user_id.to_owned(),
            login_time: at,
            ip_address: "10.0.0.1".into(),
            profiles: None,
        });
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<SignUp> {
        let mut store = self.store.lock();
        if store.accounts.contains_key(email) {
            return Err(rejected(422, "user_already_exists", "User already registered"));
        }

        let id = format!("user-{}", store.next());
        let identity = Identity {
            id: id.clone(),
            email: Some(email.to_owned()),
            user_metadata: UserMetadata {
                name: Some(name.to_owned()),
                ..Default::default()
            },
        };
        store.accounts.insert(
            email.to_owned(),
            Account {
                identity: identity.clone(),
                password: password.to_owned(),
            },
        );
        let session = store.issue(&id)?;

        Ok(SignUp {
            identity,
            session: Some(session),
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let mut store = self.store.lock();
        let id = match store.accounts.get(email) {
            Some(account) if account.password == password => account.identity.id.clone(),
            _ => {
                return Err(rejected(400, "invalid_credentials", "Invalid login credentials"));
            },
        };
        store.issue(&id)
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url> {
        Ok(Url::parse_with_params(
            "https://memory.test/auth/v1/authorize",
            &[
                ("provider", provider.as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
            ],
        )?)
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<Session> {
        let mut store = self.store.lock();
        let grant = store
            .grants
            .remove(auth_code)
            .ok_or_else(|| rejected(404, "flow_state_not_found", "invalid flow state"))?;
        if grant.challenge != pkce::challenge(code_verifier) {
            return Err(rejected(400, "bad_code_verifier", "code challenge does not match"));
        }
        store.issue(&grant.user_id)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let mut store = self.store.lock();
        let id = store
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| rejected(400, "refresh_token_not_found", "Invalid Refresh Token"))?;
        store.issue(&id)
    }

    async fn get_user(&self, access_token: &str) -> Result<Identity> {
        let store = self.store.lock();
        let id = store.owner(access_token)?;
        store.identity(&id)
    }

    async fn send_recovery_code(&self, email: &str, _redirect_to: &str) -> Result<()> {
        let mut store = self.store.lock();
        if store.accounts.contains_key(email) {
            store
                .recovery
                .insert(email.to_owned(), RECOVERY_CODE.to_owned());
        }
        Ok(())
    }

    async fn verify_recovery_code(&self, email: &str, token: &str) -> Result<Session> {
        let mut store = self.store.lock();
        if store.recovery.get(email).map(String::as_str) != Some(token) {
            return Err(rejected(403, "otp_expired", "Token has expired or is invalid"));
        }
        store.recovery.remove(email);
        let id = store.accounts[email].identity.id.clone();
        store.issue(&id)
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<Identity> {
        let mut store = self.store.lock();
        let id = store.owner(access_token)?;
        let account = store
            .accounts
            .values_mut()
            .find(|account| account.identity.id == id)
            .ok_or_else(|| rejected(404, "user_not_found", "User not found"))?;
        account.password = password.to_owned();
        Ok(account.identity.clone())
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let mut store = self.store.lock();
        let id = store.owner(access_token)?;
        store.access_tokens.retain(|_, owner| *owner != id);
        store.refresh_tokens.retain(|_, owner| *owner != id);
        Ok(())
    }
}

#[async_trait]
impl ProfileRepository for MemoryBackend {
    async fn insert(&self, _token: &str, profile: &NewProfile) -> Result<Profile> {
        if self.fail_profile_insert.load(Ordering::SeqCst) {
            return Err(rejected(409, "23505", "duplicate key value violates unique constraint"));
        }

        let profile = Profile {
            id: profile.id.clone(),
            name: profile.name.clone(),
            email: profile.email.clone(),
            avatar_url: profile.avatar_url.clone(),
            created_at: profile.created_at,
            last_login: None,
            role: Role::User,
        };
        self.store.lock().profiles.push(profile.clone());
        Ok(profile)
    }

    async fn find_by_id(&self, _token: &str, id: &str) -> Result<Profile> {
        if self.fail_profile_read.load(Ordering::SeqCst) {
            return Err(rejected(500, "XX000", "internal error"));
        }
        self.profile_of(id).ok_or(ServerError::NotFound)
    }

    async fn list(&self, token: &str) -> Result<Vec<Profile>> {
        self.store.lock().owner(token)?;
        self.bulk_reads.fetch_add(1, Ordering::SeqCst);
        let mut profiles = self.store.lock().profiles.clone();
        profiles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(profiles)
    }

    async fn touch_last_login(&self, _token: &str, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut store = self.store.lock();
        if let Some(profile) = store.profiles.iter_mut().find(|profile| profile.id == id) {
            profile.last_login = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl LoginActivityRepository for MemoryBackend {
    async fn insert(&self, _token: &str, activity: &NewLoginActivity) -> Result<()> {
        if self.fail_activity_insert.load(Ordering::SeqCst) {
            return Err(rejected(403, "42501", "permission denied for table login_activity"));
        }
        self.record_login(&activity.user_id, activity.login_time);
        if let Some(entry) = self.store.lock().activity.last_mut() {
            entry.ip_address = activity.ip_address.clone();
        }
        Ok(())
    }

    async fn list(&self, token: &str) -> Result<Vec<LoginActivity>> {
        let store = self.store.lock();
        store.owner(token)?;
        self.bulk_reads.fetch_add(1, Ordering::SeqCst);
        let mut activity = store
            .activity
            .iter()
            .cloned()
            .map(|mut entry| {
                entry.profiles = store
                    .profiles
                    .iter()
                    .find(|profile| profile.id == entry.user_id)
                    .map(|profile| ProfileSummary {
                        name: profile.name.clone(),
                        email: profile.email.clone(),
                    });
                entry
            })
            .collect::<Vec<_>>();
        activity.sort_by(|a, b| b.login_time.cmp(&a.login_time));
        Ok(activity)
    }
}

#[async_trait]
impl AssessmentRepository for MemoryBackend {
    async fn insert(&self, _token: &str, assessment: &NewAssessment) -> Result<CareerAssessment> {
        let mut store = self.store.lock();
        let n = store.next();
        let assessment = CareerAssessment {
            id: format!("assessment-{n}"),
            user_id: assessment.user_id.clone(),
            assessment_date: assessment.assessment_date,
            skills_assessment: assessment.skills_assessment.clone(),
            recommended_paths: assessment.recommended_paths.clone(),
            strengths: assessment.strengths.clone(),
            areas_to_improve: assessment.areas_to_improve.clone(),
        };
        store.assessments.push(assessment.clone());
        Ok(assessment)
    }

    async fn list_for_user(&self, _token: &str, user_id: &str) -> Result<Vec<CareerAssessment>> {
        let mut assessments = self
            .store
            .lock()
            .assessments
            .iter()
            .filter(|assessment| assessment.user_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        assessments.sort_by(|a, b| b.assessment_date.cmp(&a.assessment_date));
        Ok(assessments)
    }

    async fn find_by_id(&self, _token: &str, id: &str) -> Result<CareerAssessment> {
        self.store
            .lock()
            .assessments
            .iter()
            .find(|assessment| assessment.id == id)
            .cloned()
            .ok_or(ServerError::NotFound)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, table: Table, token: &str) -> Result<Subscription> {
        self.store.lock().owner(token)?;
        self.feed_tokens.lock().insert(table, token.to_owned());
        let receiver = self
            .feeds
            .lock()
            .entry(table)
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe();
        Ok(Subscription::new(table, receiver, || {}))
    }
}
