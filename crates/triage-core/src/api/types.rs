//! Response types shared with the web UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::actions::ActionResult;

/// A user label as shown next to a message in the inbox list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EmailLabel {
    /// Display name, without the `Custom_` namespace.
    pub name: String,
    pub color: String,
    /// The message's effective priority, repeated on each label for the UI's grouping.
    pub priority: u32,
}

/// One row of the inbox list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EmailSummary {
    pub id: String,
    pub snippet: Option<String>,
    pub subject: String,
    pub from: String,
    /// Raw `Date` header.
    pub date: String,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub labels: Option<Vec<EmailLabel>>,
    pub priority: u32,
    /// From Gmail's `internalDate`, when present and valid.
    pub received_at: Option<DateTime<Utc>>,
}

/// Full preview of one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EmailContent {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EmailListResponse {
    pub emails: Vec<EmailSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApplyActionsResponse {
    pub results: Vec<ActionResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl ToString) -> Self {
        self.details = Some(details.to_string());
        self
    }
}
