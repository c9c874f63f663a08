//! Admin dashboard data.
//!
//! Lists are always fetched whole. A change notification on a table triggers
//! a full refetch of that table; nothing is merged incrementally.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::backend::{ChangeFeed, Table};
use crate::error::Result;
use crate::gateway::AuthGateway;
use crate::profile::{LoginActivity, Profile, ProfileAccessor};
use crate::session::SessionStore;

pub const NO_ACTIVITY: &str = "No login activity found";
const UNKNOWN: &str = "Unknown";
/// Days shown on the login chart.
const CHART_DAYS: usize = 14;
/// Period of the token check of an idle feed.
const RENEW_INTERVAL: Duration = Duration::from_secs(60);

/// Headline counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total_users: usize,
    pub total_logins: usize,
    pub active_users_today: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyLogins {
    pub date: NaiveDate,
    pub count: usize,
}

/// Line of the login activity table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActivityRow {
    Entry {
        name: String,
        email: String,
        login_time: DateTime<Utc>,
        ip_address: String,
    },
    Placeholder {
        message: &'static str,
    },
}

/// Everything the admin dashboard renders.
#[derive(Debug, Serialize)]
pub struct AdminView {
    pub stats: UserStats,
    pub logins_by_day: Vec<DailyLogins>,
    pub users: Vec<Profile>,
    pub activity: Vec<ActivityRow>,
}

/// Both admin lists, fetched together.
#[derive(Debug, Clone, Default)]
pub struct AdminSnapshot {
    pub profiles: Vec<Profile>,
    pub activity: Vec<LoginActivity>,
}

/// Profiles whose name or email contains `query`, ignoring case.
pub fn filter_profiles<'a>(profiles: &'a [Profile], query: &str) -> Vec<&'a Profile> {
    let query = query.to_lowercase();
    profiles
        .iter()
        .filter(|profile| {
            profile.name.to_lowercase().contains(&query)
                || profile.email.to_lowercase().contains(&query)
        })
        .collect()
}

impl AdminSnapshot {
    pub async fn fetch(accessor: &ProfileAccessor, token: &str) -> Result<Self> {
        let (profiles, activity) = tokio::try_join!(
            accessor.all_profiles(token),
            accessor.all_login_activity(token),
        )?;
        Ok(Self { profiles, activity })
    }

    /// Counters, `today` being a UTC date.
    pub fn stats(&self, today: NaiveDate) -> UserStats {
        let active_users_today = self
            .activity
            .iter()
            .filter(|entry| entry.login_time.date_naive() == today)
            .map(|entry| entry.user_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        UserStats {
            total_users: self.profiles.len(),
            total_logins: self.activity.len(),
            active_users_today,
        }
    }

    /// Logins per UTC day, oldest first, limited to the latest days.
    pub fn logins_by_day(&self) -> Vec<DailyLogins> {
        let mut days = BTreeMap::<NaiveDate, usize>::new();
        for entry in &self.activity {
            *days.entry(entry.login_time.date_naive()).or_default() += 1;
        }

        let skip = days.len().saturating_sub(CHART_DAYS);
        days.into_iter()
            .skip(skip)
            .map(|(date, count)| DailyLogins { date, count })
            .collect()
    }

    pub fn activity_rows(&self) -> Vec<ActivityRow> {
        if self.activity.is_empty() {
            return vec![ActivityRow::Placeholder {
                message: NO_ACTIVITY,
            }];
        }

        self.activity
            .iter()
            .map(|entry| {
                let (name, email) = match &entry.profiles {
                    Some(owner) => (owner.name.clone(), owner.email.clone()),
                    None => (UNKNOWN.to_owned(), UNKNOWN.to_owned()),
                };
                ActivityRow::Entry {
                    name,
                    email,
                    login_time: entry.login_time,
                    ip_address: entry.ip_address.clone(),
                }
            })
            .collect()
    }

    pub fn view(&self, query: &str, today: NaiveDate) -> AdminView {
        AdminView {
            stats: self.stats(today),
            logins_by_day: self.logins_by_day(),
            users: filter_profiles(&self.profiles, query)
                .into_iter()
                .cloned()
                .collect(),
            activity: self.activity_rows(),
        }
    }
}

/// Refetched list pushed to a live dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "table", content = "rows", rename_all = "snake_case")]
pub enum AdminUpdate {
    Profiles(Vec<Profile>),
    LoginActivity(Vec<LoginActivity>),
}

impl AdminUpdate {
    pub fn table(&self) -> Table {
        match self {
            AdminUpdate::Profiles(_) => Table::Profiles,
            AdminUpdate::LoginActivity(_) => Table::LoginActivity,
        }
    }
}

async fn refetch(accessor: &ProfileAccessor, token: &str, table: Table) -> Result<AdminUpdate> {
    metrics::counter!("admin_refetch_total", "table" => table.as_str()).increment(1);
    match table {
        Table::LoginActivity => Ok(AdminUpdate::LoginActivity(
            accessor.all_login_activity(token).await?,
        )),
        _ => Ok(AdminUpdate::Profiles(accessor.all_profiles(token).await?)),
    }
}

/// Access token of `store` while it is an admin session.
fn admin_token(store: &SessionStore) -> Option<String> {
    let state = store.snapshot();
    state
        .session()
        .filter(|_| state.is_admin())
        .map(|session| session.access_token.clone())
}

/// Push a fresh list to `updates` whenever a watched table changes.
///
/// Expired tokens are refreshed before refetching, and subscriptions follow
/// the current token. Runs until the receiver goes away, the feed ends, or
/// `store` is no longer an admin session. Subscriptions are released on
/// return.
pub async fn watch(
    gateway: AuthGateway,
    accessor: ProfileAccessor,
    feed: Arc<dyn ChangeFeed>,
    store: Arc<SessionStore>,
    updates: mpsc::Sender<AdminUpdate>,
) -> Result<()> {
    let mut session_changes = store.subscribe();
    let Some(mut token) = admin_token(&store) else {
        return Ok(());
    };
    let mut profiles = feed.subscribe(Table::Profiles, &token).await?;
    let mut activity = feed.subscribe(Table::LoginActivity, &token).await?;
    let mut renew = tokio::time::interval(RENEW_INTERVAL);
    tracing::debug!("admin feed started");

    loop {
        // `Some(None)` wakes up without a change to refetch.
        let wake = tokio::select! {
            change = profiles.recv() => change.map(|change| Some(change.table)),
            change = activity.recv() => change.map(|change| Some(change.table)),
            changed = session_changes.changed() => changed.ok().map(|()| None),
            _ = renew.tick() => Some(None),
            _ = updates.closed() => break,
        };
        let Some(table) = wake else {
            tracing::warn!("change feed ended");
            break;
        };

        store.refresh_if_expired(&gateway).await;
        let Some(current) = admin_token(&store) else {
            tracing::debug!("admin feed stopped, session is no longer admin");
            break;
        };
        if current != token {
            // Subscribe with the new token before the old subscriptions go.
            profiles = feed.subscribe(Table::Profiles, &current).await?;
            activity = feed.subscribe(Table::LoginActivity, &current).await?;
            token = current;
        }

        let Some(table) = table else {
            continue;
        };
        match refetch(&accessor, &token, table).await {
            Ok(update) => {
                if updates.send(update).await.is_err() {
                    break;
                }
            },
            Err(err) => {
                tracing::error!(table = table.as_str(), error = %err, "refetch failed");
            },
        }
    }

    tracing::debug!("admin feed stopped");
    Ok(())
}
