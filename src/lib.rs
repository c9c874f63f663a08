//! Career Compass is the session and role gateway of a career guidance
//! platform built on a hosted backend.

#![forbid(unsafe_code)]

pub mod admin;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
mod middleware;
pub mod pkce;
pub mod profile;
mod router;
pub mod session;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use backend::supabase::SupabaseClient;
use backend::{AssessmentRepository, ChangeFeed};
use gateway::AuthGateway;
use profile::ProfileAccessor;
use session::SessionRegistry;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    cookie: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// `name=value` pair of the session cookie set on `response`.
#[cfg(test)]
pub fn session_cookie(response: &axum::http::Response<axum::body::Body>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::to_owned)
}

#[cfg(test)]
pub async fn body_json(response: axum::http::Response<axum::body::Body>) -> serde_json::Value {
    use http_body_util::BodyExt;

    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub gateway: AuthGateway,
    pub profiles: ProfileAccessor,
    pub assessments: Arc<dyn AssessmentRepository>,
    pub feed: Arc<dyn ChangeFeed>,
    pub sessions: Arc<SessionRegistry>,
    /// Backend credentials are placeholders.
    pub placeholder: bool,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE, header::SET_COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION, header::COOKIE]),
        );

    let anonymous = Router::new()
        // `GET /` goes to `landing`.
        .route("/", get(router::pages::landing))
        .route_layer(AxumMiddleware::from_fn(guard::require_anonymous));

    let user = Router::new()
        // `GET /dashboard` goes to `dashboard`.
        .route("/dashboard", get(router::pages::dashboard))
        .route_layer(AxumMiddleware::from_fn(guard::require_user));

    let admin = Router::new()
        // `GET /admin?q=` goes to `view`.
        .route("/admin", get(router::admin::view))
        .route("/admin/events", get(router::admin::events))
        .route_layer(AxumMiddleware::from_fn(guard::require_admin));

    let browser = Router::new()
        .merge(anonymous)
        .merge(user)
        .merge(admin)
        .route(gateway::CALLBACK_ROUTE, get(router::callback::handler))
        .merge(router::auth::router())
        .route(
            "/api/assessments",
            get(router::assessments::list).post(router::assessments::create),
        )
        .route("/api/assessments/{id}", get(router::assessments::get))
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            middleware::session,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(router::status::metrics))
        .merge(browser)
        .fallback(router::pages::not_found)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let mut config = config::Configuration::default();
    if let Ok(path) = std::env::var("CONFIG_PATH") {
        config = config.path(path.into());
    }
    let config = config.read()?;

    let credentials = config.backend_credentials();
    let client = Arc::new(SupabaseClient::new(&credentials.url, &credentials.anon_key)?);

    let profiles = ProfileAccessor::new(client.clone(), client.clone());
    let gateway = AuthGateway::new(
        client.clone(),
        profiles.clone(),
        &credentials.anon_key,
        &config.url,
    );
    let sessions = Arc::new(SessionRegistry::new(
        gateway.clone(),
        profiles.clone(),
        Duration::from_secs(config.session.idle_timeout),
    ));

    Ok(AppState {
        config,
        gateway,
        profiles,
        assessments: client.clone(),
        feed: client,
        sessions,
        placeholder: credentials.placeholder,
        metrics,
    })
}
