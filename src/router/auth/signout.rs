//! Sign out of the current session.

use axum::extract::State;
use axum::{Extension, Json};

use crate::guard::LANDING_ROUTE;
use crate::router::{Empty, Outcome};
use crate::session::{AuthEvent, ClientSession};
use crate::{AppState, ServerError};

pub const SIGNED_OUT: &str = "Signed out successfully";

/// A backend failure leaves the session untouched.
pub async fn handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
) -> Result<Json<Outcome<Empty>>, ServerError> {
    if let Some(session) = client.store.session() {
        state.gateway.sign_out(&session.access_token).await?;
        tracing::debug!(user_id = session.user.id, "signed out");
    }
    client.store.dispatch(AuthEvent::SignedOut).await;

    Ok(Json(Outcome {
        message: SIGNED_OUT,
        redirect: Some(LANDING_ROUTE),
        details: Empty {},
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;

    use crate::backend::memory::MemoryBackend;
    use crate::profile::Role;
    use crate::*;

    #[tokio::test]
    async fn test_signout_closes_admin() {
        let backend = Arc::new(MemoryBackend::default());
        backend.add_user("admin@b.com", "abcdef", "Admin", Role::Admin);
        let app = app(router::state(&backend));

        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/api/auth/signin",
            json!({ "email": "admin@b.com", "password": "abcdef" }).to_string(),
        )
        .await;
        let cookie = session_cookie(&response).unwrap();

        let response = make_request(Some(&cookie), app.clone(), Method::GET, "/admin", String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(
            Some(&cookie),
            app.clone(),
            Method::POST,
            "/api/auth/signout",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], super::SIGNED_OUT);
        assert_eq!(body["redirect"], "/");

        let response = make_request(Some(&cookie), app.clone(), Method::GET, "/admin", String::default()).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let response = make_request(
            Some(&cookie),
            app,
            Method::GET,
            "/api/auth/session",
            String::default(),
        )
        .await;
        assert_eq!(body_json(response).await["status"], "anonymous");
    }

    #[tokio::test]
    async fn test_signout_when_anonymous() {
        let backend = Arc::new(MemoryBackend::default());
        let app = app(router::state(&backend));

        let response = make_request(None, app, Method::POST, "/api/auth/signout", String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
