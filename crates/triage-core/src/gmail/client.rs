use std::hash::{DefaultHasher, Hash, Hasher};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::gmail::types::{
    ApiErrorEnvelope, Draft, DraftMessage, Label, ListLabelsResponse, ListMessagesResponse,
    Message, ModifyMessageRequest, NewDraft, NewLabel,
};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";
/// The authenticated user, as Gmail spells it in paths.
const USER_ID: &str = "me";

#[derive(Debug, Error)]
pub enum GmailClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gmail api error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized: access token rejected")]
    Unauthorized,
}

impl GmailClientError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GmailClientError::Http(err) => err.status(),
            GmailClientError::Api { status, .. } => Some(*status),
            GmailClientError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            GmailClientError::Decode(_) => None,
        }
    }
}

/// Gmail REST client bound to a single caller-supplied access token.
///
/// Token acquisition and refresh happen elsewhere; a rejected token surfaces as
/// [`GmailClientError::Unauthorized`].
#[derive(Clone)]
pub struct GmailClient {
    http: Client,
    access_token: String,
    api_base: String,
}

impl GmailClient {
    pub fn new(http: Client, access_token: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Stable per account, without exposing the token: the API base plus a hash of
    /// the access token.
    pub fn account_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.access_token.hash(&mut hasher);
        format!("{}/{}#{:016x}", self.api_base, USER_ID, hasher.finish())
    }

    pub async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError> {
        let url = format!("{}/{}/messages/{}", self.api_base, USER_ID, message_id);
        self.send_json(self.http.get(&url).query(&[("format", "full")]))
            .await
    }

    pub async fn list_messages(
        &self,
        query: Option<&str>,
        page_token: Option<&str>,
        max_results: Option<u32>,
    ) -> Result<ListMessagesResponse, GmailClientError> {
        let url = format!("{}/{}/messages", self.api_base, USER_ID);
        let mut builder = self.http.get(&url);
        if let Some(q) = query {
            builder = builder.query(&[("q", q)]);
        }
        if let Some(token) = page_token {
            builder = builder.query(&[("pageToken", token)]);
        }
        if let Some(max) = max_results {
            builder = builder.query(&[("maxResults", max)]);
        }
        self.send_json(builder).await
    }

    /// Fetches all labels for the user's Gmail account.
    pub async fn list_labels(&self) -> Result<ListLabelsResponse, GmailClientError> {
        let url = format!("{}/{}/labels", self.api_base, USER_ID);
        self.send_json(self.http.get(&url)).await
    }

    pub async fn create_label(&self, label: &NewLabel) -> Result<Label, GmailClientError> {
        let url = format!("{}/{}/labels", self.api_base, USER_ID);
        self.send_json(self.http.post(&url).json(label)).await
    }

    /// Adds and removes label ids on a single message.
    pub async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    ) -> Result<Message, GmailClientError> {
        let url = format!(
            "{}/{}/messages/{}/modify",
            self.api_base, USER_ID, message_id
        );
        let body = ModifyMessageRequest {
            add_label_ids,
            remove_label_ids,
        };
        self.send_json(self.http.post(&url).json(&body)).await
    }

    /// Creates a draft from a base64url-encoded RFC 822 message.
    pub async fn create_draft(&self, raw: String) -> Result<Draft, GmailClientError> {
        let url = format!("{}/{}/drafts", self.api_base, USER_ID);
        let body = NewDraft {
            message: DraftMessage { raw },
        };
        self.send_json(self.http.post(&url).json(&body)).await
    }

    async fn send_json<T>(&self, builder: reqwest::RequestBuilder) -> Result<T, GmailClientError>
    where
        T: DeserializeOwned,
    {
        let response = builder.bearer_auth(&self.access_token).send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(GmailClientError::Unauthorized);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(GmailClientError::Api {
                status,
                message: api_error_message(&body, status),
            });
        }

        serde_json::from_str(&body).map_err(GmailClientError::Decode)
    }
}

/// Prefer Google's own `error.message`; fall back to the raw body or the status text.
fn api_error_message(body: &str, status: StatusCode) -> String {
    if let Ok(envelope) = serde_json::from_str::<ApiErrorEnvelope>(body) {
        if !envelope.error.message.is_empty() {
            return envelope.error.message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed.to_string()
    }
}
