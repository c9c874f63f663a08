//! Application-level user records.
mod service;

pub use service::*;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ADMIN_ROLE: &str = "admin";
const USER_ROLE: &str = "user";

/// Authorization tier stored on a [`Profile`].
///
/// Anything but the exact `admin` string is a regular user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl From<Option<String>> for Role {
    fn from(role: Option<String>) -> Self {
        match role.as_deref() {
            Some(ADMIN_ROLE) => Role::Admin,
            _ => Role::User,
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => ADMIN_ROLE.into(),
            Role::User => USER_ROLE.into(),
        }
    }
}

/// Profile as saved on `profiles` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub role: Role,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Row inserted when an identity is created.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Owner columns joined on login activity reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub name: String,
    pub email: String,
}

/// Append-only log entry of a successful password sign-in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoginActivity {
    pub id: String,
    pub user_id: String,
    pub login_time: DateTime<Utc>,
    pub ip_address: String,
    #[serde(default)]
    pub profiles: Option<ProfileSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewLoginActivity {
    pub user_id: String,
    pub login_time: DateTime<Utc>,
    pub ip_address: String,
}

/// Result of a career assessment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CareerAssessment {
    pub id: String,
    pub user_id: String,
    pub assessment_date: DateTime<Utc>,
    #[serde(default)]
    pub skills_assessment: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommended_paths: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_to_improve: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewAssessment {
    pub user_id: String,
    pub assessment_date: DateTime<Utc>,
    pub skills_assessment: BTreeMap<String, f64>,
    pub recommended_paths: Vec<String>,
    pub strengths: Vec<String>,
    pub areas_to_improve: Vec<String>,
}
