//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::AppState;

const BEARER: &str = "Bearer ";

/// Attach the [`ClientSession`](crate::session::ClientSession) of the
/// browser to the request.
///
/// Requests without a known cookie run on a transient store. The cookie is
/// only issued once the handler left state worth keeping in it.
pub async fn session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let cookie_name = state.config.session.cookie_name.clone();
    let id = jar.get(&cookie_name).map(|cookie| cookie.value().to_owned());
    let bearer = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .map(str::to_owned);

    let client = state.sessions.resolve(id.as_deref(), bearer.as_deref()).await;
    req.extensions_mut().insert(client.clone());
    let response = next.run(req).await;

    if client.id.is_some() {
        return response;
    }
    let Some(id) = state.sessions.keep(&client.store) else {
        return response;
    };

    let cookie = Cookie::build((cookie_name, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.session.secure_cookie);
    (jar.add(cookie), response).into_response()
}
