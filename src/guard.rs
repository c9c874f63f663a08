//! Route guards.
//!
//! Predicates over [`SessionState`], evaluated again on every request. Guards
//! only decide what a browser is shown; they are not a security boundary.
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Extension;

use crate::session::{ClientSession, SessionState};

pub const LANDING_ROUTE: &str = "/";
pub const DASHBOARD_ROUTE: &str = "/dashboard";
pub const ADMIN_ROUTE: &str = "/admin";

/// Decision of a guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Granted,
    Redirect(&'static str),
    /// Session not resolved yet.
    Pending,
}

/// Dashboard matching a role.
pub fn landing_route(is_admin: bool) -> &'static str {
    if is_admin { ADMIN_ROUTE } else { DASHBOARD_ROUTE }
}

pub fn authenticated_only(state: &SessionState) -> Access {
    match state {
        SessionState::Initializing => Access::Pending,
        SessionState::Anonymous => Access::Redirect(LANDING_ROUTE),
        SessionState::Authenticated { .. } => Access::Granted,
    }
}

pub fn admin_only(state: &SessionState) -> Access {
    match state {
        SessionState::Initializing => Access::Pending,
        SessionState::Anonymous => Access::Redirect(LANDING_ROUTE),
        SessionState::Authenticated { is_admin: true, .. } => Access::Granted,
        SessionState::Authenticated { .. } => Access::Redirect(DASHBOARD_ROUTE),
    }
}

pub fn anonymous_only(state: &SessionState) -> Access {
    match state {
        SessionState::Initializing => Access::Pending,
        SessionState::Anonymous => Access::Granted,
        SessionState::Authenticated { is_admin, .. } => {
            Access::Redirect(landing_route(*is_admin))
        },
    }
}

async fn enforce(
    guard: fn(&SessionState) -> Access,
    client: ClientSession,
    req: Request,
    next: Next,
) -> Response {
    let state = client.store.settled().await;

    match guard(&state) {
        Access::Granted => next.run(req).await,
        Access::Redirect(to) => {
            tracing::debug!(from = %req.uri().path(), to, "guard redirect");
            Redirect::to(to).into_response()
        },
        Access::Pending => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Middleware for [`authenticated_only`] routes.
pub async fn require_user(
    Extension(client): Extension<ClientSession>,
    req: Request,
    next: Next,
) -> Response {
    enforce(authenticated_only, client, req, next).await
}

/// Middleware for [`admin_only`] routes.
pub async fn require_admin(
    Extension(client): Extension<ClientSession>,
    req: Request,
    next: Next,
) -> Response {
    enforce(admin_only, client, req, next).await
}

/// Middleware for [`anonymous_only`] routes.
pub async fn require_anonymous(
    Extension(client): Extension<ClientSession>,
    req: Request,
    next: Next,
) -> Response {
    enforce(anonymous_only, client, req, next).await
}
