use axum::{
    extract::{Path, State},
    Json,
};

use crate::dto::submission_dto::{DuplicateCheckResponse, SubmitFormRequest, SubmitFormResponse};
use crate::error::{Error, Result};
use crate::AppState;

#[axum::debug_handler]
pub async fn submit_form(
    State(state): State<AppState>,
    Json(payload): Json<SubmitFormRequest>,
) -> Result<Json<SubmitFormResponse>> {
    let outcome = state.submission_service.submit(payload).await?;
    Ok(Json(SubmitFormResponse {
        status: "success".to_string(),
        authenticated: outcome.submitter.authenticated,
    }))
}

#[axum::debug_handler]
pub async fn check_duplicate(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<DuplicateCheckResponse>> {
    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(Error::BadRequest("user_id must not be empty".into()));
    }
    let exists = state.submission_service.is_duplicate(&user_id).await?;
    Ok(Json(DuplicateCheckResponse { user_id, exists }))
}
