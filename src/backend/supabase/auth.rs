//! GoTrue identity endpoints.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use super::SupabaseClient;
use crate::backend::{IdentityProvider, OAuthProvider, Session, SignUp, Identity};
use crate::error::Result;

const CODE_CHALLENGE_METHOD: &str = "s256";
const RECOVERY: &str = "recovery";

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: SignUpData<'a>,
}

#[derive(Serialize)]
struct SignUpData<'a> {
    name: &'a str,
}

/// `/signup` answers with a session when email confirmation is disabled,
/// with the bare user otherwise.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(Session),
    User(Identity),
}

#[derive(Serialize)]
struct PkceBody<'a> {
    auth_code: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct RecoverBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    r#type: &'static str,
    email: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct PasswordBody<'a> {
    password: &'a str,
}

impl SupabaseClient {
    async fn token(&self, grant_type: &str, body: &impl Serialize) -> Result<Session> {
        let request = self
            .request(Method::POST, "auth/v1/token", None)?
            .query(&[("grant_type", grant_type)])
            .json(body);
        Ok(self.send::<Session>(request).await?.stamped())
    }
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<SignUp> {
        let request = self
            .request(Method::POST, "auth/v1/signup", None)?
            .json(&SignUpBody {
                email,
                password,
                data: SignUpData { name },
            });

        Ok(match self.send::<SignUpResponse>(request).await? {
            SignUpResponse::Session(session) => {
                let session = session.stamped();
                SignUp {
                    identity: session.user.clone(),
                    session: Some(session),
                }
            },
            SignUpResponse::User(identity) => SignUp {
                identity,
                session: None,
            },
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.token("password", &Credentials { email, password }).await
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<Url> {
        let mut url = self.endpoint("auth/v1/authorize")?;
        url.query_pairs_mut()
            .append_pair("provider", provider.as_str())
            .append_pair("redirect_to", redirect_to)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
        Ok(url)
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<Session> {
        self.token(
            "pkce",
            &PkceBody {
                auth_code,
                code_verifier,
            },
        )
        .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        self.token("refresh_token", &RefreshBody { refresh_token })
            .await
    }

    async fn get_user(&self, access_token: &str) -> Result<Identity> {
        let request = self.request(Method::GET, "auth/v1/user", Some(access_token))?;
        self.send(request).await
    }

    async fn send_recovery_code(&self, email: &str, redirect_to: &str) -> Result<()> {
        let request = self
            .request(Method::POST, "auth/v1/recover", None)?
            .query(&[("redirect_to", redirect_to)])
            .json(&RecoverBody { email });
        self.execute(request).await
    }

    async fn verify_recovery_code(&self, email: &str, token: &str) -> Result<Session> {
        let request = self
            .request(Method::POST, "auth/v1/verify", None)?
            .json(&VerifyBody {
                r#type: RECOVERY,
                email,
                token,
            });
        Ok(self.send::<Session>(request).await?.stamped())
    }

    async fn update_password(&self, access_token: &str, password: &str) -> Result<Identity> {
        let request = self
            .request(Method::PUT, "auth/v1/user", Some(access_token))?
            .json(&PasswordBody { password });
        self.send(request).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let request = self.request(Method::POST, "auth/v1/logout", Some(access_token))?;
        self.execute(request).await
    }
}
