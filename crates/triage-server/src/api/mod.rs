//! HTTP API handlers for the triage web UI.
//!
//! - `POST /api/apply-actions` applies a batch of proposed actions
//! - `GET /api/emails` lists the inbox with decoded labels and priority
//! - `GET /api/emails/{id}` previews one message
//!
//! Every route acts with the caller's Gmail access token; nothing is stored server side.

pub mod apply_actions;
pub mod emails;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use triage_core::ErrorResponse;

use crate::AppState;

pub const MISSING_ACCESS_TOKEN: &str = "Missing access_token";

/// Create the API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/apply-actions", post(apply_actions::apply_actions))
        .route("/emails", get(emails::list_emails))
        .route("/emails/{id}", get(emails::get_email))
}

pub(crate) fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

/// The token from a request, treating an empty string as absent.
pub(crate) fn access_token(token: Option<String>) -> Result<String, Response> {
    token.filter(|t| !t.is_empty()).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(MISSING_ACCESS_TOKEN),
        )
    })
}
