//! `POST /api/apply-actions`

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use triage_core::{ApplyActionsResponse, BatchOrchestrator, ErrorResponse, parse_batch};

use crate::AppState;

use super::{access_token, error_response};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApplyActionsRequest {
    pub access_token: Option<String>,
    /// Only checked for being an array; elements are decoded one at a time.
    pub actions: Option<Value>,
}

pub async fn apply_actions(
    State(state): State<AppState>,
    Json(request): Json<ApplyActionsRequest>,
) -> Response {
    let token = match access_token(request.access_token) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let entries = match parse_batch(request.actions) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(error = %err, "rejecting action batch");
            return error_response(StatusCode::BAD_REQUEST, ErrorResponse::new(err.to_string()));
        }
    };

    let gmail = state.gmail(&token);
    let results = BatchOrchestrator::new(&gmail)
        .with_locks(state.label_locks())
        .apply_entries(&entries)
        .await;

    (StatusCode::OK, Json(ApplyActionsResponse { results })).into_response()
}
