//! HTTP routes.
pub mod admin;
pub mod assessments;
pub mod auth;
pub mod callback;
pub mod pages;
pub mod status;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::Serialize;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::backend::Session;
use crate::error::ServerError;
use crate::profile::Profile;
use crate::session::{ClientSession, SessionState};

const FORWARDED_FOR: &str = "x-forwarded-for";
const OTP_LENGTH: usize = 6;

/// JSON body validated before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Address of the client, as seen through proxies.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR)
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.split(',').next())
            .map(|ip| ip.trim().to_owned())
            .filter(|ip| !ip.is_empty());

        let ip = forwarded.unwrap_or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .to_string()
        });

        Ok(ClientIp(ip))
    }
}

/// Settled session of an authenticated caller.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub session: Session,
    pub profile: Option<Profile>,
    pub is_admin: bool,
}

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let client = parts
            .extensions
            .get::<ClientSession>()
            .cloned()
            .ok_or(ServerError::NoSession)?;

        match client.store.settled().await {
            SessionState::Authenticated {
                session,
                profile,
                is_admin,
            } => Ok(Authenticated {
                session,
                profile,
                is_admin,
            }),
            _ => Err(ServerError::NoSession),
        }
    }
}

/// Body of successful auth operations.
#[derive(Debug, Serialize)]
pub struct Outcome<T: Serialize> {
    /// Notification to show to the user.
    pub message: &'static str,
    /// Page to go to next, if any.
    pub redirect: Option<&'static str>,
    #[serde(flatten)]
    pub details: T,
}

/// Outcome without details.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}

pub(crate) fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

pub(crate) fn numeric_code(value: &str) -> Result<(), ValidationError> {
    if value.len() != OTP_LENGTH || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new("otp"));
    }
    Ok(())
}

/// Application state over an in-memory backend.
#[cfg(test)]
pub fn state(backend: &std::sync::Arc<crate::backend::memory::MemoryBackend>) -> crate::AppState {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::Configuration;
    use crate::gateway::AuthGateway;
    use crate::profile::ProfileAccessor;
    use crate::session::SessionRegistry;

    let config = Arc::new(Configuration::default());
    let profiles = ProfileAccessor::new(backend.clone(), backend.clone());
    let gateway = AuthGateway::new(backend.clone(), profiles.clone(), "anon", &config.url);
    let sessions = Arc::new(SessionRegistry::new(
        gateway.clone(),
        profiles.clone(),
        Duration::from_secs(config.session.idle_timeout),
    ));

    crate::AppState {
        config,
        gateway,
        profiles,
        assessments: backend.clone(),
        feed: backend.clone(),
        sessions,
        placeholder: false,
        metrics: None,
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_numeric_code() {
        assert!(super::numeric_code("123456").is_ok());
        assert!(super::numeric_code("12345").is_err());
        assert!(super::numeric_code("12345a").is_err());
        assert!(super::numeric_code("１２３４５６").is_err());
    }

    #[test]
    fn test_not_blank() {
        assert!(super::not_blank("A B").is_ok());
        assert!(super::not_blank("   ").is_err());
    }
}
