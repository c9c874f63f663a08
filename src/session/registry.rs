use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;

use super::{AuthEvent, SessionStore};
use crate::gateway::AuthGateway;
use crate::profile::ProfileAccessor;

const SESSION_ID_BYTES: usize = 32;
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

fn session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Store of the browser session behind a request.
#[derive(Clone)]
pub struct ClientSession {
    /// Opaque cookie value, `None` while the store is not kept.
    pub id: Option<String>,
    pub store: Arc<SessionStore>,
}

/// Every live [`SessionStore`], keyed by cookie value.
///
/// Only stores holding something worth remembering are kept: a signed-in
/// user or an OAuth flow in progress. Anonymous visitors get a transient
/// store per request.
pub struct SessionRegistry {
    stores: RwLock<HashMap<String, Arc<SessionStore>>>,
    gateway: AuthGateway,
    profiles: ProfileAccessor,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        gateway: AuthGateway,
        profiles: ProfileAccessor,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            stores: RwLock::default(),
            gateway,
            profiles,
            idle_timeout,
        }
    }

    /// Find the kept store of `id`, or open a transient one.
    ///
    /// Transient stores are settled on return, authenticated from `bearer`
    /// when given. Kept stores get their access token refreshed when it
    /// expired.
    pub async fn resolve(&self, id: Option<&str>, bearer: Option<&str>) -> ClientSession {
        let known = id.and_then(|id| {
            self.stores
                .read()
                .get(id)
                .map(|store| (id.to_owned(), Arc::clone(store)))
        });

        if let Some((id, store)) = known {
            store.touch();
            store.refresh_if_expired(&self.gateway).await;
            return ClientSession {
                id: Some(id),
                store,
            };
        }

        let session = match bearer {
            Some(token) => match self.gateway.session_from_token(token).await {
                Ok(session) => Some(session),
                Err(err) => {
                    tracing::debug!(error = %err, "bearer token rejected");
                    None
                },
            },
            None => None,
        };

        let store = Arc::new(SessionStore::new(self.profiles.clone()));
        store.dispatch(AuthEvent::InitialSession(session)).await;

        ClientSession { id: None, store }
    }

    /// Keep a transient store once it holds state, returning its new id.
    pub fn keep(&self, store: &Arc<SessionStore>) -> Option<String> {
        if !store.holds_state() {
            return None;
        }

        let id = session_id();
        let count = {
            let mut stores = self.stores.write();
            stores.insert(id.clone(), Arc::clone(store));
            stores.len()
        };
        metrics::gauge!("sessions_active").set(count as f64);
        tracing::debug!(sessions = count, "browser session kept");

        Some(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionStore>> {
        self.stores.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }

    /// Forget stores idle for longer than the timeout.
    pub fn prune(&self) -> usize {
        let mut stores = self.stores.write();
        let before = stores.len();
        stores.retain(|_, store| store.idle_for() < self.idle_timeout);
        let pruned = before - stores.len();

        metrics::gauge!("sessions_active").set(stores.len() as f64);
        if pruned > 0 {
            tracing::debug!(pruned, remaining = stores.len(), "idle sessions pruned");
        }
        pruned
    }

    /// Prune idle stores periodically.
    pub fn spawn_pruner(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.prune();
                    },
                    None => break,
                }
            }
        })
    }
}
