//! Password recovery with an emailed one-time code.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::router::{Empty, Outcome, Valid, numeric_code};
use crate::session::{AuthEvent, ClientSession};
use crate::{AppState, ServerError};

pub const CODE_SENT: &str = "Check your email for the OTP code to reset your password";
pub const PASSWORD_RESET: &str = "Your password has been reset successfully";

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Forgot {
    #[validate(email(message = "Email must be formated."))]
    pub email: String,
}

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Reset {
    #[validate(email(message = "Email must be formated."))]
    pub email: String,
    #[validate(custom(function = "numeric_code", message = "Code must be 6 digits."))]
    pub otp: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters."))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match."))]
    pub confirm_password: String,
}

pub async fn forgot(
    State(state): State<AppState>,
    Valid(body): Valid<Forgot>,
) -> Result<Json<Outcome<Empty>>, ServerError> {
    state.gateway.forgot_password(&body.email).await?;

    Ok(Json(Outcome {
        message: CODE_SENT,
        redirect: None,
        details: Empty {},
    }))
}

/// Verify the code, set the new password and sign the user in.
pub async fn reset(
    State(state): State<AppState>,
    Extension(client): Extension<ClientSession>,
    Valid(body): Valid<Reset>,
) -> Result<Json<Outcome<Empty>>, ServerError> {
    let session = state
        .gateway
        .verify_otp_and_reset_password(&body.otp, &body.email, &body.password)
        .await?;
    let redirect = client
        .store
        .dispatch(AuthEvent::PasswordRecovery(session))
        .await;

    Ok(Json(Outcome {
        message: PASSWORD_RESET,
        redirect,
        details: Empty {},
    }))
}
