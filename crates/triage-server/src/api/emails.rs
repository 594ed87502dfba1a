//! `GET /api/emails` and `GET /api/emails/{id}`

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::error;

use triage_core::inbox::{DEFAULT_MAX_RESULTS, get_email_content, list_email_summaries};
use triage_core::{EmailListResponse, ErrorResponse};

use crate::AppState;

use super::{access_token, error_response};

#[derive(Debug, Default, Deserialize)]
pub struct ListEmailsQuery {
    pub access_token: Option<String>,
    /// Kept as text so a malformed value falls back to the default instead of a 400.
    #[serde(rename = "maxResults")]
    pub max_results: Option<String>,
}

impl ListEmailsQuery {
    fn max_results(&self) -> u32 {
        self.max_results
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_RESULTS)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub access_token: Option<String>,
}

pub async fn list_emails(
    State(state): State<AppState>,
    Query(query): Query<ListEmailsQuery>,
) -> Response {
    let max_results = query.max_results();
    let token = match access_token(query.access_token) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let gmail = state.gmail(&token);
    match list_email_summaries(&gmail, max_results).await {
        Ok(emails) => (StatusCode::OK, Json(EmailListResponse { emails })).into_response(),
        Err(err) => {
            error!(error = %err, "failed to fetch emails");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to fetch emails").with_details(err),
            )
        }
    }
}

pub async fn get_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let token = match access_token(query.access_token) {
        Ok(token) => token,
        Err(response) => return response,
    };

    let gmail = state.gmail(&token);
    match get_email_content(&gmail, &id).await {
        Ok(content) => (StatusCode::OK, Json(content)).into_response(),
        Err(err) => {
            error!(email_id = %id, error = %err, "failed to fetch email content");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("Failed to fetch email content").with_details(err),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{json_body, state_for};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn list_query(token: Option<&str>, max_results: Option<&str>) -> Query<ListEmailsQuery> {
        Query(ListEmailsQuery {
            access_token: token.map(str::to_string),
            max_results: max_results.map(str::to_string),
        })
    }

    #[test]
    fn max_results_defaults_and_parses() {
        assert_eq!(list_query(None, None).0.max_results(), 10);
        assert_eq!(list_query(None, Some("25")).0.max_results(), 25);
        assert_eq!(list_query(None, Some("many")).0.max_results(), 10);
    }

    #[tokio::test]
    async fn list_requires_token() {
        let server = MockServer::start().await;
        let response = list_emails(State(state_for(&server)), list_query(Some(""), None)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Missing access_token" })
        );
    }

    #[tokio::test]
    async fn lists_emails_with_labels_and_priority() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("maxResults", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m1", "threadId": "t1" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "labels": [
                    { "id": "UNREAD", "name": "UNREAD", "type": "system" },
                    { "id": "Label_1", "name": "github", "type": "user",
                      "color": { "backgroundColor": "#4a86e8", "textColor": "#000000" } },
                    { "id": "Label_2", "name": "P2", "type": "user" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "snippet": "Your build failed",
                "labelIds": ["UNREAD", "Label_1", "Label_2"],
                "internalDate": "1700000000000",
                "payload": {
                    "mimeType": "text/plain",
                    "headers": [
                        { "name": "Subject", "value": "CI" },
                        { "name": "From", "value": "ci@x.com" },
                        { "name": "Date", "value": "Tue, 14 Nov 2023 22:13:20 +0000" }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let response = list_emails(
            State(state_for(&server)),
            list_query(Some("token"), Some("2")),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let email = &body["emails"][0];
        assert_eq!(email["id"], "m1");
        assert_eq!(email["subject"], "CI");
        assert_eq!(email["read"], false);
        assert_eq!(email["priority"], 2);
        assert_eq!(
            email["labels"],
            json!([{ "name": "github", "color": "#4a86e8", "priority": 2 }])
        );
        assert_eq!(email["receivedAt"], "2023-11-14T22:13:20Z");
    }

    #[tokio::test]
    async fn list_failure_is_a_500_with_details() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Insufficient Permission" }
            })))
            .mount(&server)
            .await;

        let response =
            list_emails(State(state_for(&server)), list_query(Some("token"), None)).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Failed to fetch emails");
        assert!(
            body["details"]
                .as_str()
                .expect("details")
                .contains("Insufficient Permission")
        );
    }

    #[tokio::test]
    async fn get_email_returns_preview() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "payload": {
                    "mimeType": "text/html",
                    "headers": [
                        { "name": "Subject", "value": "Hello" },
                        { "name": "To", "value": "me@x.com" }
                    ],
                    "body": { "data": "PGI-aGk8L2I-" }
                }
            })))
            .mount(&server)
            .await;

        let response = get_email(
            State(state_for(&server)),
            Path("m1".to_string()),
            Query(TokenQuery {
                access_token: Some("token".into()),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "subject": "Hello",
                "from": "",
                "to": "me@x.com",
                "date": "",
                "html": "<b>hi</b>",
                "text": null
            })
        );
    }

    #[tokio::test]
    async fn get_email_failure_is_a_500() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = get_email(
            State(state_for(&server)),
            Path("nope".to_string()),
            Query(TokenQuery {
                access_token: Some("token".into()),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["error"],
            "Failed to fetch email content"
        );
    }
}
