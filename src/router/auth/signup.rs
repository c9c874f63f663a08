//! Create an account.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::router::{Outcome, Valid, not_blank};
use crate::session::{AuthEvent, ClientSession};
use crate::{AppState, ServerError};

pub const VERIFY_EMAIL: &str = "Please check your email to verify your account.";

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Body {
    #[validate(custom(function = "not_blank", message = "Name is required."))]
    pub name: String,
    #[validate(email(message = "Email must be formated."))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignedUp {
    pub user_id: String,
    /// `false` when the identity exists without its profile row.
    pub profile_created: bool,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
    Valid(body): Valid<Body>,
) -> Result<Json<Outcome<SignedUp>>, ServerError> {
    let report = state
        .gateway
        .sign_up(&body.email, &body.password, body.name.trim())
        .await?;

    let redirect = match report.session {
        Some(session) => client.store.dispatch(AuthEvent::SignedIn(session)).await,
        None => None,
    };

    Ok(Json(Outcome {
        message: VERIFY_EMAIL,
        redirect,
        details: SignedUp {
            user_id: report.identity.id,
            profile_created: report.profile.is_some(),
        },
    }))
}
