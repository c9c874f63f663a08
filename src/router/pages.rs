//! Browser pages.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::backend::OAuthProvider;
use crate::error::ResponseError;
use crate::profile::{CareerAssessment, Profile};
use crate::router::Authenticated;
use crate::{AppState, ServerError};

/// Sign-in page.
#[derive(Debug, Serialize)]
pub struct Landing {
    pub name: String,
    pub providers: [OAuthProvider; 2],
    /// Backend credentials are missing, nothing will work.
    pub placeholder: bool,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub profile: Option<Profile>,
    pub assessments: Vec<CareerAssessment>,
}

pub async fn landing(State(state): State<AppState>) -> Json<Landing> {
    Json(Landing {
        name: state.config.name.clone(),
        providers: OAuthProvider::ALL,
        placeholder: state.placeholder,
    })
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: Authenticated,
) -> Result<Json<Dashboard>, ServerError> {
    let assessments = state
        .assessments
        .list_for_user(&user.session.access_token, &user.session.user.id)
        .await?;

    Ok(Json(Dashboard {
        profile: user.profile,
        assessments,
    }))
}

pub async fn not_found(uri: Uri) -> Response {
    ResponseError::default()
        .title("Page not found.")
        .details("The requested page does not exist.")
        .instance(uri.path())
        .status(StatusCode::NOT_FOUND)
        .into_response()
        .unwrap_or_else(|_| StatusCode::NOT_FOUND.into_response())
}
