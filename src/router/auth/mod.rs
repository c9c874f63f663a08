//! Authentication HTTP API.
pub mod oauth;
pub mod password;
pub mod session;
pub mod signin;
pub mod signout;
pub mod signup;

use axum::Router;
use axum::routing::{get, post};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // `POST /api/auth/signup` goes to `signup`.
        .route("/api/auth/signup", post(signup::handler))
        // `POST /api/auth/signin` goes to `signin`.
        .route("/api/auth/signin", post(signin::handler))
        // `GET /api/auth/oauth/google` starts an OAuth flow.
        .route("/api/auth/oauth/{provider}", get(oauth::handler))
        .route("/api/auth/password/forgot", post(password::forgot))
        .route("/api/auth/password/reset", post(password::reset))
        .route("/api/auth/signout", post(signout::handler))
        .route("/api/auth/session", get(session::handler))
}
