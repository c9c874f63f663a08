//! Password sign-in.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::profile::LoginRecord;
use crate::router::{ClientIp, Outcome, Valid};
use crate::session::{AuthEvent, ClientSession};
use crate::{AppState, ServerError};

pub const SIGNED_IN: &str = "Signed in successfully";

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Body {
    #[validate(email(message = "Email must be formated."))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
    ClientIp(ip): ClientIp,
    Valid(body): Valid<Body>,
) -> Result<Json<Outcome<LoginRecord>>, ServerError> {
    let report = state.gateway.sign_in(&body.email, &body.password, &ip).await?;
    let redirect = client
        .store
        .dispatch(AuthEvent::SignedIn(report.session))
        .await;

    Ok(Json(Outcome {
        message: SIGNED_IN,
        redirect,
        details: report.login,
    }))
}
