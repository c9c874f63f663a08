//! Supabase adapter over its GoTrue and PostgREST HTTP APIs.
mod auth;
mod rest;

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::backend::realtime::RealtimeClient;
use crate::error::{Result, ServerError};

const TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
/// PostgREST code for "JSON object requested, multiple (or no) rows returned".
const NO_SINGLE_ROW: &str = "PGRST116";

/// Client for one Supabase project.
#[derive(Clone, Debug)]
pub struct SupabaseClient {
    http: Client,
    base: Url,
    anon_key: String,
    realtime: RealtimeClient,
}

/// Every error shape returned by GoTrue or PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn message(&self) -> Option<String> {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
    }

    fn code(&self) -> Option<String> {
        self.error_code.clone().or_else(|| match &self.code {
            Some(serde_json::Value::String(code)) => Some(code.clone()),
            _ => self.error.clone(),
        })
    }
}

impl SupabaseClient {
    /// Create a new [`SupabaseClient`].
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let mut base = Url::parse(url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        let realtime = RealtimeClient::new(&base, anon_key)?;

        tracing::debug!(%base, "backend client created");

        Ok(Self {
            http,
            base,
            anon_key: anon_key.to_owned(),
            realtime,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// Build a request carrying the project key and a bearer token.
    ///
    /// Without user token, the anon key is used as bearer.
    fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<RequestBuilder> {
        let url = self.endpoint(path)?;
        Ok(self
            .http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(&self.anon_key)))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ErrorBody>(&body).unwrap_or_default();
        let code = error.code();

        if code.as_deref() == Some(NO_SINGLE_ROW) {
            return Err(ServerError::NotFound);
        }

        Err(ServerError::Backend {
            status: status.as_u16(),
            code,
            message: error
                .message()
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_owned()),
        })
    }

    /// Send and decode a JSON body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = Self::check(request.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// Send and ignore the body.
    async fn execute(&self, request: RequestBuilder) -> Result<()> {
        Self::check(request.send().await?).await?;
        Ok(())
    }
}
