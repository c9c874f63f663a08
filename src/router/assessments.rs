//! Career assessments of the signed-in user.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::profile::{CareerAssessment, NewAssessment};
use crate::router::{Authenticated, Valid};
use crate::{AppState, ServerError};

fn finite_scores(scores: &BTreeMap<String, f64>) -> Result<(), ValidationError> {
    if scores.values().all(|score| score.is_finite()) {
        Ok(())
    } else {
        Err(ValidationError::new("finite"))
    }
}

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    #[validate(custom(function = "finite_scores", message = "Scores must be numbers."))]
    pub skills_assessment: BTreeMap<String, f64>,
    #[serde(default)]
    pub recommended_paths: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub areas_to_improve: Vec<String>,
}

/// Assessments of the caller, newest first.
pub async fn list(
    State(state): State<AppState>,
    user: Authenticated,
) -> Result<Json<Vec<CareerAssessment>>, ServerError> {
    let assessments = state
        .assessments
        .list_for_user(&user.session.access_token, &user.session.user.id)
        .await?;
    Ok(Json(assessments))
}

pub async fn create(
    State(state): State<AppState>,
    user: Authenticated,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<CareerAssessment>), ServerError> {
    let assessment = NewAssessment {
        user_id: user.session.user.id.clone(),
        assessment_date: Utc::now(),
        skills_assessment: body.skills_assessment,
        recommended_paths: body.recommended_paths,
        strengths: body.strengths,
        areas_to_improve: body.areas_to_improve,
    };

    let saved = state
        .assessments
        .insert(&user.session.access_token, &assessment)
        .await?;
    tracing::debug!(user_id = saved.user_id, id = saved.id, "assessment saved");

    Ok((StatusCode::CREATED, Json(saved)))
}

/// One assessment of the caller. Assessments of other users are not found.
pub async fn get(
    State(state): State<AppState>,
    user: Authenticated,
    Path(id): Path<String>,
) -> Result<Json<CareerAssessment>, ServerError> {
    let assessment = state
        .assessments
        .find_by_id(&user.session.access_token, &id)
        .await?;

    if assessment.user_id != user.session.user.id {
        return Err(ServerError::NotFound);
    }
    Ok(Json(assessment))
}
