//! PostgREST table access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde_json::json;

use super::SupabaseClient;
use crate::backend::{
    AssessmentRepository, ChangeFeed, LoginActivityRepository,
    ProfileRepository, Subscription, Table,
};
use crate::error::Result;
use crate::profile::{
    CareerAssessment, LoginActivity, NewAssessment, NewLoginActivity,
    NewProfile, Profile,
};

/// Ask PostgREST for exactly one row instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const RETURN_REPRESENTATION: &str = "return=representation";
const RETURN_MINIMAL: &str = "return=minimal";
const ACTIVITY_WITH_OWNER: &str = "*,profiles(name,email)";

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

impl SupabaseClient {
    fn table(
        &self,
        method: Method,
        table: Table,
        token: &str,
    ) -> Result<RequestBuilder> {
        self.request(method, &format!("rest/v1/{}", table.as_str()), Some(token))
    }
}

#[async_trait]
impl ProfileRepository for SupabaseClient {
    async fn insert(&self, token: &str, profile: &NewProfile) -> Result<Profile> {
        let request = self
            .table(Method::POST, Table::Profiles, token)?
            .header("Prefer", RETURN_REPRESENTATION)
            .header("Accept", SINGLE_OBJECT)
            .json(profile);
        self.send(request).await
    }

    async fn find_by_id(&self, token: &str, id: &str) -> Result<Profile> {
        let request = self
            .table(Method::GET, Table::Profiles, token)?
            .header("Accept", SINGLE_OBJECT)
            .query(&[("select", "*"), ("id", eq(id).as_str())]);
        self.send(request).await
    }

    async fn list(&self, token: &str) -> Result<Vec<Profile>> {
        let request = self
            .table(Method::GET, Table::Profiles, token)?
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        self.send(request).await
    }

    async fn touch_last_login(
        &self,
        token: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let request = self
            .table(Method::PATCH, Table::Profiles, token)?
            .header("Prefer", RETURN_MINIMAL)
            .query(&[("id", eq(id).as_str())])
            .json(&json!({ "last_login": at }));
        self.execute(request).await
    }
}

#[async_trait]
impl LoginActivityRepository for SupabaseClient {
    async fn insert(&self, token: &str, activity: &NewLoginActivity) -> Result<()> {
        let request = self
            .table(Method::POST, Table::LoginActivity, token)?
            .header("Prefer", RETURN_MINIMAL)
            .json(activity);
        self.execute(request).await
    }

    async fn list(&self, token: &str) -> Result<Vec<LoginActivity>> {
        let request = self
            .table(Method::GET, Table::LoginActivity, token)?
            .query(&[
                ("select", ACTIVITY_WITH_OWNER),
                ("order", "login_time.desc"),
            ]);
        self.send(request).await
    }
}

#[async_trait]
impl AssessmentRepository for SupabaseClient {
    async fn insert(
        &self,
        token: &str,
        assessment: &NewAssessment,
    ) -> Result<CareerAssessment> {
        let request = self
            .table(Method::POST, Table::CareerAssessments, token)?
            .header("Prefer", RETURN_REPRESENTATION)
            .header("Accept", SINGLE_OBJECT)
            .json(assessment);
        self.send(request).await
    }

    async fn list_for_user(
        &self,
        token: &str,
        user_id: &str,
    ) -> Result<Vec<CareerAssessment>> {
        let request = self
            .table(Method::GET, Table::CareerAssessments, token)?
            .query(&[
                ("select", "*"),
                ("user_id", eq(user_id).as_str()),
                ("order", "assessment_date.desc"),
            ]);
        self.send(request).await
    }

    async fn find_by_id(&self, token: &str, id: &str) -> Result<CareerAssessment> {
        let request = self
            .table(Method::GET, Table::CareerAssessments, token)?
            .header("Accept", SINGLE_OBJECT)
            .query(&[("select", "*"), ("id", eq(id).as_str())]);
        self.send(request).await
    }
}

#[async_trait]
impl ChangeFeed for SupabaseClient {
    async fn subscribe(&self, table: Table, token: &str) -> Result<Subscription> {
        Ok(self.realtime.subscribe(table, token))
    }
}
