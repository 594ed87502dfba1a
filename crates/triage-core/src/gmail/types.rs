use serde::{Deserialize, Serialize};

/// Minimal message stub returned by list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageId {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePartBody {
    #[serde(default)]
    pub size: i64,
    pub data: Option<String>,
    #[serde(rename = "attachmentId")]
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePart {
    #[serde(rename = "partId")]
    pub part_id: Option<String>,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// Value of the first header whose name matches exactly.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds", default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
    pub payload: Option<MessagePart>,
    #[serde(rename = "sizeEstimate")]
    pub size_estimate: Option<u64>,
    pub raw: Option<String>,
}

impl Message {
    /// Headers of the top-level payload, if the message carried any.
    pub fn headers(&self) -> Option<&[Header]> {
        self.payload
            .as_ref()
            .map(|p| p.headers.as_slice())
            .filter(|headers| !headers.is_empty())
    }

    /// Exact-name header lookup on the top-level payload; empty when absent.
    pub fn header_or_empty(&self, name: &str) -> String {
        self.payload
            .as_ref()
            .and_then(|p| p.header(name))
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageId>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate")]
    pub result_size_estimate: Option<u64>,
}

pub const LABEL_TYPE_USER: &str = "user";
pub const LABEL_TYPE_SYSTEM: &str = "system";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelColor {
    #[serde(rename = "backgroundColor")]
    pub background_color: Option<String>,
    #[serde(rename = "textColor")]
    pub text_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub label_type: Option<String>,
    #[serde(rename = "messageListVisibility")]
    pub message_list_visibility: Option<String>,
    #[serde(rename = "labelListVisibility")]
    pub label_list_visibility: Option<String>,
    pub color: Option<LabelColor>,
}

impl Label {
    pub fn is_user(&self) -> bool {
        self.label_type.as_deref() == Some(LABEL_TYPE_USER)
    }

    pub fn background_color(&self) -> Option<&str> {
        self.color
            .as_ref()
            .and_then(|c| c.background_color.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListLabelsResponse {
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Request body for `POST labels`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewLabel {
    pub name: String,
    #[serde(rename = "labelListVisibility")]
    pub label_list_visibility: String,
    #[serde(rename = "messageListVisibility")]
    pub message_list_visibility: String,
    pub color: LabelColor,
}

impl NewLabel {
    /// A label that always shows in the label list and the message list.
    pub fn visible(name: impl Into<String>, background: &str, text: &str) -> Self {
        Self {
            name: name.into(),
            label_list_visibility: "labelShow".to_string(),
            message_list_visibility: "show".to_string(),
            color: LabelColor {
                background_color: Some(background.to_string()),
                text_color: Some(text.to_string()),
            },
        }
    }
}

/// Request body for `POST messages/{id}/modify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifyMessageRequest {
    #[serde(rename = "addLabelIds", skip_serializing_if = "Vec::is_empty", default)]
    pub add_label_ids: Vec<String>,
    #[serde(rename = "removeLabelIds", skip_serializing_if = "Vec::is_empty", default)]
    pub remove_label_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftMessage {
    pub raw: String,
}

/// Request body for `POST drafts`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewDraft {
    pub message: DraftMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Draft {
    pub id: String,
    pub message: Option<MessageId>,
}

/// Error envelope returned by Google APIs.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}
