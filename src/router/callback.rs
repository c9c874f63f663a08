//! Landing route of OAuth providers.

use axum::Extension;
use axum::extract::{Query, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Redirect, Response};
use serde::Deserialize;

use crate::guard;
use crate::session::{AuthEvent, ClientSession};
use crate::{AppState, ServerError};

const REFRESH: &str = "refresh";
/// Send the browser back to the landing page after a failure.
const BACK_TO_LANDING: &str = "3; url=/";

#[derive(Debug, Default, Deserialize)]
pub struct Callback {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn complete(
    state: &AppState,
    client: &ClientSession,
    query: Callback,
) -> Result<&'static str, ServerError> {
    if let Some(error) = query.error {
        return Err(ServerError::OAuth(query.error_description.unwrap_or(error)));
    }
    let code = query
        .code
        .ok_or_else(|| ServerError::OAuth("No authorization code received".into()))?;
    let verifier = client
        .store
        .take_code_verifier()
        .ok_or_else(|| ServerError::OAuth("No sign-in in progress".into()))?;

    let (session, profile) = state.gateway.complete_oauth(&code, &verifier).await?;
    tracing::info!(user_id = profile.id, "oauth sign-in completed");

    let redirect = client.store.dispatch(AuthEvent::SignedIn(session)).await;
    Ok(redirect.unwrap_or_else(|| guard::landing_route(profile.is_admin())))
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
    Query(query): Query<Callback>,
) -> Response {
    match complete(&state, &client, query).await {
        Ok(to) => Redirect::to(to).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "oauth callback failed");
            let err = match err {
                ServerError::OAuth(_) => err,
                other => ServerError::OAuth(other.to_string()),
            };

            let mut response = err.into_response();
            response
                .headers_mut()
                .insert(REFRESH, HeaderValue::from_static(BACK_TO_LANDING));
            response
        },
    }
}
