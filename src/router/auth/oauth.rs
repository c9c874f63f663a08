//! Start a sign-in with an external provider.

use axum::Extension;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::response::Redirect;

use crate::backend::OAuthProvider;
use crate::pkce;
use crate::session::ClientSession;
use crate::{AppState, ServerError};

/// Redirect the browser to `provider`, keeping the PKCE verifier in its
/// session until the callback.
pub async fn handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
    provider: Result<Path<OAuthProvider>, PathRejection>,
) -> Result<Redirect, ServerError> {
    let Path(provider) = provider?;
    let verifier = pkce::generate_verifier();
    let url = state.gateway.oauth_url(provider, &verifier)?;
    client.store.set_code_verifier(verifier);

    tracing::debug!(provider = provider.as_str(), "oauth flow started");
    Ok(Redirect::to(url.as_str()))
}
